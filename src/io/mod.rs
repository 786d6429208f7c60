//! FASTA 靶序列与成对 FASTQ 读段的读取。

pub mod fasta;
pub mod fastq;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 打开输入文件；以 gzip 魔数开头时透明解压
pub fn open_input(path: &str) -> Result<Box<dyn BufRead + Send>> {
    let mut f = File::open(path).with_context(|| format!("cannot open '{}'", path))?;
    let mut magic = [0u8; 2];
    let n = f.read(&mut magic).with_context(|| format!("cannot read '{}'", path))?;
    let f = File::open(path).with_context(|| format!("cannot reopen '{}'", path))?;
    if n == 2 && magic == GZIP_MAGIC {
        log::debug!("{}: gzip input", path);
        Ok(Box::new(BufReader::new(flate2::read::MultiGzDecoder::new(f))))
    } else {
        Ok(Box::new(BufReader::new(f)))
    }
}

pub use fasta::{read_targets, FastaReader};
pub use fastq::{FastqReader, PairedFastqReader};
