use anyhow::{anyhow, bail, Context, Result};
use std::io::BufRead;

use super::open_input;
use crate::sequence::{pair_base_id, ReadPair, Sequence};

/// 四行一条的 FASTQ 读取器（不支持折行）
pub struct FastqReader<R: BufRead> {
    reader: R,
    buf: String,
    done: bool,
    line: u64,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: String::new(), done: false, line: 0 }
    }

    fn read_line(&mut self) -> Result<usize> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf)?;
        if n > 0 { self.line += 1; }
        Ok(n)
    }

    pub fn next_record(&mut self) -> Result<Option<Sequence>> {
        if self.done { return Ok(None); }

        // header，跳过记录之间的空行
        loop {
            if self.read_line()? == 0 { self.done = true; return Ok(None); }
            if !self.buf.trim().is_empty() { break; }
        }
        if !self.buf.starts_with('@') {
            return Err(anyhow!("line {}: FASTQ header not starting with '@'", self.line));
        }
        let id = self.buf[1..].split_whitespace().next().unwrap_or("").to_string();

        if self.read_line()? == 0 { return Err(anyhow!("line {}: unexpected EOF after header", self.line)); }
        let seq = self.buf.trim_end().as_bytes().to_ascii_uppercase();

        if self.read_line()? == 0 || !self.buf.starts_with('+') {
            return Err(anyhow!("line {}: missing '+' line", self.line));
        }

        if self.read_line()? == 0 { return Err(anyhow!("line {}: missing quality line", self.line)); }
        let qual = self.buf.trim_end().as_bytes().to_vec();
        if qual.len() != seq.len() {
            return Err(anyhow!("line {}: seq/qual length mismatch for '{}'", self.line, id));
        }

        Ok(Some(Sequence::with_quality(id, seq, qual)))
    }
}

/// 同步读取 R1/R2 两个文件，按顺序配对并编号
pub struct PairedFastqReader<R: BufRead> {
    r1: FastqReader<R>,
    r2: FastqReader<R>,
    next_index: u64,
}

impl PairedFastqReader<Box<dyn BufRead + Send>> {
    /// 打开两个 FASTQ 文件，`.gz` 自动解压
    pub fn open(r1_path: &str, r2_path: &str) -> Result<Self> {
        Ok(Self::new(open_input(r1_path)?, open_input(r2_path)?))
    }
}

impl<R: BufRead> PairedFastqReader<R> {
    pub fn new(r1: R, r2: R) -> Self {
        Self { r1: FastqReader::new(r1), r2: FastqReader::new(r2), next_index: 0 }
    }

    pub fn next_pair(&mut self) -> Result<Option<ReadPair>> {
        let index = self.next_index;
        let r1 = self.r1.next_record().with_context(|| format!("reading R1 of pair {}", index))?;
        let r2 = self.r2.next_record().with_context(|| format!("reading R2 of pair {}", index))?;
        let (r1, r2) = match (r1, r2) {
            (None, None) => return Ok(None),
            (Some(r1), Some(r2)) => (r1, r2),
            (Some(_), None) => bail!("R2 ended before R1 at pair {}", index),
            (None, Some(_)) => bail!("R1 ended before R2 at pair {}", index),
        };
        if pair_base_id(&r1.id) != pair_base_id(&r2.id) {
            bail!("mate id mismatch at pair {}: '{}' vs '{}'", index, r1.id, r2.id);
        }
        self.next_index += 1;
        Ok(Some(ReadPair { index, r1, r2 }))
    }

    /// 最多读取 `size` 对；读完时返回空批次
    pub fn next_batch(&mut self, size: usize) -> Result<Vec<ReadPair>> {
        let mut batch = Vec::with_capacity(size);
        while batch.len() < size {
            match self.next_pair()? {
                Some(pair) => batch.push(pair),
                None => break,
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn parse_records_with_description() {
        let data = b"@r1/1 extra\nacgt\n+\nIIII\n\n@r2/1\nGG\n+r2\n#I\n";
        let mut r = FastqReader::new(Cursor::new(&data[..]));
        let a = r.next_record().unwrap().unwrap();
        assert_eq!(a.id, "r1/1");
        assert_eq!(a.characters, b"ACGT");
        assert_eq!(a.quality.as_deref(), Some(&b"IIII"[..]));
        let b = r.next_record().unwrap().unwrap();
        assert_eq!(b.id, "r2/1");
        assert!(r.next_record().unwrap().is_none());
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut r = FastqReader::new(Cursor::new(&b"@x\nACGT\n+\nII\n"[..]));
        assert!(r.next_record().is_err());
    }

    #[test]
    fn pairs_are_read_in_lockstep() {
        let r1 = b"@p0/1\nACGT\n+\nIIII\n@p1/1\nTTTT\n+\nIIII\n";
        let r2 = b"@p0/2\nCCCC\n+\nIIII\n@p1/2\nGGGG\n+\nIIII\n";
        let mut p = PairedFastqReader::new(Cursor::new(&r1[..]), Cursor::new(&r2[..]));
        let batch = p.next_batch(8).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].index, 1);
        assert_eq!(batch[1].r2.characters, b"GGGG");
        assert!(p.next_batch(8).unwrap().is_empty());
    }

    #[test]
    fn mate_id_mismatch_is_malformed_input() {
        let r1 = b"@p0/1\nACGT\n+\nIIII\n";
        let r2 = b"@q0/2\nACGT\n+\nIIII\n";
        let mut p = PairedFastqReader::new(Cursor::new(&r1[..]), Cursor::new(&r2[..]));
        let err = p.next_pair().unwrap_err();
        assert!(err.to_string().contains("mate id mismatch"));
    }

    #[test]
    fn gzip_input_is_detected() {
        use flate2::{write::GzEncoder, Compression};
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r1.fastq.gz");
        let mut enc = GzEncoder::new(std::fs::File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"@p0/1\nACGT\n+\nIIII\n").unwrap();
        enc.finish().unwrap();
        let plain = dir.path().join("r2.fastq");
        std::fs::write(&plain, b"@p0/2\nTTTT\n+\nIIII\n").unwrap();

        let mut p = PairedFastqReader::open(path.to_str().unwrap(), plain.to_str().unwrap()).unwrap();
        let pair = p.next_pair().unwrap().unwrap();
        assert_eq!(pair.r1.characters, b"ACGT");
        assert_eq!(pair.r2.characters, b"TTTT");
        assert!(p.next_pair().unwrap().is_none());
    }
}
