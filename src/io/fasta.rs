use anyhow::{bail, Context, Result};
use std::io::BufRead;

use super::open_input;
use crate::sequence::Sequence;

/// FASTA 读取器：多行序列拼接、转大写、去掉空白，RNA 中的 `U` 记为 `T`
pub struct FastaReader<R: BufRead> {
    reader: R,
    buf: String,
    done: bool,
    peek_header: Option<String>,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            done: false,
            peek_header: None,
        }
    }

    pub fn next_record(&mut self) -> Result<Option<Sequence>> {
        if self.done {
            return Ok(None);
        }

        let header = if let Some(h) = self.peek_header.take() {
            h
        } else {
            loop {
                self.buf.clear();
                let n = self.reader.read_line(&mut self.buf)?;
                if n == 0 {
                    self.done = true;
                    return Ok(None);
                }
                if self.buf.starts_with('>') {
                    break self.buf[1..].trim().to_string();
                }
            }
        };
        // 只保留第一个空白前的名字
        let id = header.split_whitespace().next().unwrap_or("").to_string();

        let mut seq: Vec<u8> = Vec::new();
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf)?;
            if n == 0 {
                self.done = true;
                break;
            }
            if self.buf.starts_with('>') {
                self.peek_header = Some(self.buf[1..].trim().to_string());
                break;
            }
            for &b in self.buf.as_bytes() {
                match b.to_ascii_uppercase() {
                    b'\n' | b'\r' | b' ' | b'\t' => {}
                    b'U' => seq.push(b'T'),
                    c => seq.push(c),
                }
            }
        }

        Ok(Some(Sequence::new(id, seq)))
    }
}

/// 读入全部靶序列；空文件、空序列、重名都视为错误
pub fn read_targets(path: &str) -> Result<Vec<Sequence>> {
    let mut reader = FastaReader::new(open_input(path)?);
    let mut targets: Vec<Sequence> = Vec::new();
    while let Some(rec) = reader.next_record().with_context(|| format!("reading targets from '{}'", path))? {
        if rec.is_empty() {
            bail!("target '{}' in '{}' has no sequence", rec.id, path);
        }
        if targets.iter().any(|t| t.id == rec.id) {
            bail!("duplicate target name '{}' in '{}'", rec.id, path);
        }
        targets.push(rec);
    }
    if targets.is_empty() {
        bail!("FASTA file '{}' contains no targets", path);
    }
    log::info!("loaded {} target(s) from {}", targets.len(), path);
    Ok(targets)
}
