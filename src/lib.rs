//! # spats-rust
//!
//! SHAPE-seq 读段处理：把成对读段组装成片段，按描述符切分出各个段，
//! 按掩码分到处理 / 对照通道统计 RT 终止位点，再算出反应性剖面。
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use spats_rust::config::RunConfig;
//! use spats_rust::io::{read_targets, PairedFastqReader};
//! use spats_rust::pipeline::{self, Engine};
//! use spats_rust::profile::write_profiles;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = RunConfig::from_file("run.json")?;
//! let targets = read_targets("targets.fa")?;
//! let engine = Engine::new(config, &targets)?;
//! let reads = PairedFastqReader::open("R1.fq.gz", "R2.fq.gz")?;
//! let tally = pipeline::run(&engine, reads, None, 4)?;
//! write_profiles(&mut std::io::stdout(), &tally.counts, 0, 1, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## 模块说明
//!
//! - [`index`]：基于 k-mer 的精确 / 部分匹配索引
//! - [`align`]：仿射间隙全局比对与 seed-and-extend 比对查找
//! - [`fragment`]：R1/R2 重叠合并成片段
//! - [`segment`]：段描述符与片段切分
//! - [`target`]：多靶序列路由
//! - [`profile`]：掩码计数与 beta / theta / rho
//! - [`pipeline`]：多线程处理流水线
//! - [`io`]：FASTA / FASTQ（含 gzip）读取
//! - [`config`]：JSON 运行配置
//! - [`util`]：IUPAC / 反向互补等工具函数

pub mod align;
pub mod config;
pub mod failure;
pub mod fragment;
pub mod index;
pub mod io;
pub mod pipeline;
pub mod profile;
pub mod segment;
pub mod sequence;
pub mod target;
pub mod util;
