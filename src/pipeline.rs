//! 读段对处理流水线：片段组装 → 靶序列路由 → 段匹配 → 掩码分类 → 计数。
//!
//! 线程模型：
//! - 读取线程按批次把读段对送进有界 channel；
//! - rayon 线程池内每个工作者持有自己的缓存与计数，处理完后归并；
//! - 可选的写出线程把逐对结果写成 TSV（行序不保证与输入一致）。

use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufWriter, Write};
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Sender};
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::config::RunConfig;
use crate::failure::{Failure, FailureKind};
use crate::fragment::{Fragment, FragmentMaker, FragmentStats, OverlapPath};
use crate::io::PairedFastqReader;
use crate::profile::{Counts, Mask, Observation};
use crate::segment::{SegmentMatcher, SegmentResult};
use crate::sequence::{pair_base_id, ReadPair, Sequence};
use crate::target::TargetCatalog;

/// 在途批次数上限
const CHANNEL_BUFFER_SIZE: usize = 64;

pub const RECORD_HEADER: &str = "pair_id\tsuccess\tfailure\tfailed_segment\ttarget\tmask\tsite\tend\tmutations\toverlap";

/// 可计数片段在计数表中的 (行, 掩码, 事件)
pub type CountKey = (usize, usize, Observation);

/// 单个片段的分类结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub failure: Option<FailureKind>,
    pub failed_segment: Option<String>,
    pub target: Option<usize>,
    /// 计数表中的行；cotrans 模式下由靶序列与 `end` 共同决定
    pub row: Option<usize>,
    pub mask: Option<usize>,
    /// RT 终止位点，靶序列坐标 `0..=n`
    pub site: Option<usize>,
    pub end: Option<usize>,
    /// 靶序列段上的错配 + indel 数
    pub mutations: usize,
    /// 以下三组是 1 起的位点下标（与终止计数同一坐标），已排序去重
    pub mutation_sites: Vec<usize>,
    pub insert_sites: Vec<usize>,
    pub delete_sites: Vec<usize>,
    pub overlap: usize,
    pub reverse_order: bool,
    pub path: OverlapPath,
    pub barcode: Option<Vec<u8>>,
}

impl Classification {
    fn failed(failure: Failure) -> Self {
        Self { failure: Some(failure.kind), failed_segment: failure.segment, ..Default::default() }
    }

    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// 可计数时返回计数行、掩码和这一片段的事件
    pub fn count_key(&self) -> Option<CountKey> {
        if !self.success() {
            return None;
        }
        let obs = Observation {
            site: self.site?,
            mutations: self.mutation_sites.clone(),
            inserts: self.insert_sites.clone(),
            deletes: self.delete_sites.clone(),
        };
        Some((self.row?, self.mask?, obs))
    }

    /// 记下靶序列段上每个错配 / indel 的位点。
    /// 靶序列上第 p 个碱基（0 起）记在下标 p+1；不等长替换按突变计。
    fn with_target_events(mut self, sr: &SegmentResult) -> Self {
        let base = sr.segment_start as isize + 1;
        self.mutation_sites = sr.errors.iter().map(|&e| sr.segment_start + e + 1).collect();
        for indel in &sr.indels {
            let Ok(site) = usize::try_from(base + indel.error_index) else { continue };
            if indel.is_substitution() {
                self.mutation_sites.push(site);
            } else if indel.insert {
                self.insert_sites.push(site);
            } else {
                self.delete_sites.push(site);
            }
        }
        for sites in [&mut self.mutation_sites, &mut self.insert_sites, &mut self.delete_sites] {
            sites.sort_unstable();
            sites.dedup();
        }
        self
    }

    fn with_fragment(mut self, frag: &Fragment) -> Self {
        self.overlap = frag.overlap;
        self.reverse_order = frag.reverse_order;
        self.path = frag.path;
        self
    }
}

/// 片段（或 R1|R2）到分类结果的缓存，每个工作者一份
pub type FragmentCache = HashMap<Vec<u8>, Classification>;

/// 一次运行的只读处理状态，可在线程间共享
pub struct Engine {
    config: RunConfig,
    maker: FragmentMaker,
    catalog: TargetCatalog,
    /// 与 catalog 中的靶序列同序
    matchers: Vec<SegmentMatcher>,
    masks: Vec<Mask>,
    /// 每个靶序列在计数表中的第一行
    row_offsets: Vec<usize>,
    target_pos: usize,
    mask_pos: usize,
    barcode_pos: Option<usize>,
}

impl Engine {
    pub fn new(config: RunConfig, targets: &[Sequence]) -> Result<Self> {
        config.validate()?;
        let catalog = TargetCatalog::new(targets, config.target_word_length, config.target_min_length)?;
        let matchers = targets
            .iter()
            .map(|t| SegmentMatcher::new(config.descriptor_for(t)?).with_context(|| format!("matcher for target '{}'", t.id)))
            .collect::<Result<Vec<_>>>()?;
        let descriptor = matchers.first().context("no targets")?.descriptor();
        let position = |key: &str| descriptor.position(key).with_context(|| format!("segment '{}' not in descriptor", key));
        let target_pos = position(&config.target_segment)?;
        let mask_pos = position(&config.mask_segment)?;
        let barcode_pos = config.barcode_segment.as_deref().map(position).transpose()?;
        let masks = config.mask_patterns()?;
        let mut row_offsets = Vec::with_capacity(targets.len());
        let mut rows = 0;
        for t in targets {
            row_offsets.push(rows);
            rows += if config.cotrans { t.len() + 1 - cotrans_first_end(&config, t.len()) } else { 1 };
        }
        log::info!(
            "engine ready: {} target(s), {} count rows, {} segments, masks {}",
            catalog.len(),
            rows,
            descriptor.len(),
            masks.iter().map(Mask::name).join("/")
        );
        Ok(Self {
            maker: FragmentMaker::new(config.fragment.clone()),
            config,
            catalog,
            matchers,
            masks,
            row_offsets,
            target_pos,
            mask_pos,
            barcode_pos,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.catalog
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    /// 全零的计数，布局与本次运行一致
    pub fn counts_template(&self) -> Counts {
        let mut rows: Vec<(String, Vec<u8>)> = Vec::new();
        for t in self.catalog.targets() {
            if self.config.cotrans {
                for end in cotrans_first_end(&self.config, t.n())..=t.n() {
                    rows.push((format!("{}_{}", t.name, end), t.characters[..end].to_vec()));
                }
            } else {
                rows.push((t.name.clone(), t.characters.clone()));
            }
        }
        Counts::new(&self.masks, &rows).with_mutations(self.config.count_mutations, self.config.handle_indels)
    }

    /// 片段落在哪一行；cotrans 模式下末端短于最短长度时没有对应行
    fn row_for(&self, target: usize, end: usize) -> Option<usize> {
        let offset = self.row_offsets[target];
        if !self.config.cotrans {
            return Some(offset);
        }
        let first = cotrans_first_end(&self.config, self.catalog.get(target).n());
        (end >= first).then(|| offset + end - first)
    }

    pub fn new_tally(&self) -> Tally {
        Tally::new(self.counts_template())
    }

    /// 对已组装好的片段做路由、段匹配和掩码分类
    pub fn classify(&self, seq: &Sequence) -> Classification {
        let Some(hit) = self.catalog.find(&seq.characters) else {
            return Classification::failed(Failure::new(FailureKind::Target));
        };
        let res = self.matchers[hit.target].process(seq);
        if !res.success {
            let failure = res.failure.unwrap_or_else(|| Failure::new(FailureKind::Validation));
            return Classification { target: Some(hit.target), ..Classification::failed(failure) };
        }

        let mut class = Classification { target: Some(hit.target), ..Default::default() };
        let n = self.catalog.get(hit.target).n();
        match res.segment(self.target_pos) {
            Some(sr) => {
                class = class.with_target_events(sr);
                class.site = Some(sr.segment_start);
                class.end = Some(sr.segment_end());
                class.mutations = sr.error_count();
            }
            // 靶序列段为空：RT 在 3' 端就停止了
            None => {
                class.site = Some(n);
                class.end = Some(n);
            }
        }
        class.row = self.row_for(hit.target, class.end.unwrap_or(n));
        if class.row.is_none() {
            class.failure = Some(FailureKind::MinEnd);
            class.failed_segment = Some(self.config.target_segment.clone());
            return class;
        }
        class.barcode = self.barcode_pos.and_then(|i| res.subsequence(&seq.characters, i)).map(<[u8]>::to_vec);

        let mask_text = res.subsequence(&seq.characters, self.mask_pos).unwrap_or(&[]);
        match self.masks.iter().position(|m| m.matches(mask_text)) {
            Some(m) => class.mask = Some(m),
            None => {
                class.failure = Some(FailureKind::Mask);
                class.failed_segment = Some(self.config.mask_segment.clone());
            }
        }
        class
    }

    fn classify_pair(&self, pair: &ReadPair) -> Classification {
        let frag = self.maker.make(&pair.r1, &pair.r2);
        if !frag.success {
            let kind = frag.failure.unwrap_or(FailureKind::Fragment);
            return Classification::failed(Failure::new(kind)).with_fragment(&frag);
        }
        self.classify(&frag.seq).with_fragment(&frag)
    }

    /// 处理一个读段对；返回分类结果以及是否命中缓存
    pub fn process_pair(&self, pair: &ReadPair, cache: Option<&mut FragmentCache>) -> (Classification, bool) {
        let Some(cache) = cache else {
            return (self.classify_pair(pair), false);
        };
        if self.config.cache_by_mates {
            let key = mates_key(pair);
            if let Some(hit) = cache.get(&key) {
                return (hit.clone(), true);
            }
            let class = self.classify_pair(pair);
            cache.insert(key, class.clone());
            return (class, false);
        }

        let frag = self.maker.make(&pair.r1, &pair.r2);
        if !frag.success {
            let kind = frag.failure.unwrap_or(FailureKind::Fragment);
            return (Classification::failed(Failure::new(kind)).with_fragment(&frag), false);
        }
        let (class, hit) = match cache.get(&frag.seq.characters) {
            Some(c) => (c.clone(), true),
            None => {
                let c = self.classify(&frag.seq);
                cache.insert(frag.seq.characters.clone(), c.clone());
                (c, false)
            }
        };
        // overlap 属于这一对读段，而不是缓存里那一对
        (class.with_fragment(&frag), hit)
    }
}

/// cotrans 模式下计数的最短 3' 末端
fn cotrans_first_end(config: &RunConfig, n: usize) -> usize {
    config.cotrans_minimum_length.min(n)
}

fn mates_key(pair: &ReadPair) -> Vec<u8> {
    let mut key = Vec::with_capacity(pair.r1.len() + pair.r2.len() + 1);
    key.extend_from_slice(&pair.r1.characters);
    key.push(b'|');
    key.extend_from_slice(&pair.r2.characters);
    key
}

/// 条形码去重前暂存的一条记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeEntry {
    pub barcode: Vec<u8>,
    /// 输入序号，决定代表记录
    pub index: u64,
    pub count: Option<CountKey>,
}

/// 一个工作者（或整次运行）的统计
#[derive(Debug, Clone)]
pub struct Tally {
    pub counts: Counts,
    pub pairs: u64,
    pub successes: u64,
    pub failures: BTreeMap<FailureKind, u64>,
    pub reverse_order: u64,
    pub fragments: FragmentStats,
    pub cache_hits: u64,
    pub barcodes: Vec<BarcodeEntry>,
    /// 因条形码重复而没有计数的成功片段
    pub barcode_skipped: u64,
    pub unique_barcodes: u64,
}

impl Tally {
    pub fn new(counts: Counts) -> Self {
        Self {
            counts,
            pairs: 0,
            successes: 0,
            failures: BTreeMap::new(),
            reverse_order: 0,
            fragments: FragmentStats::default(),
            cache_hits: 0,
            barcodes: Vec::new(),
            barcode_skipped: 0,
            unique_barcodes: 0,
        }
    }

    /// 记一对读段；`dedup` 时带条形码的结果先暂存，最后由 `resolve_barcodes` 计数
    pub fn record(&mut self, index: u64, class: &Classification, cache_hit: bool, dedup: bool) {
        self.pairs += 1;
        if cache_hit {
            self.cache_hits += 1;
        }
        if class.reverse_order {
            self.reverse_order += 1;
        }
        self.fragments.record(class.path);
        match class.failure {
            Some(kind) => *self.failures.entry(kind).or_default() += 1,
            None => self.successes += 1,
        }
        let key = class.count_key();
        match &class.barcode {
            Some(barcode) if dedup => self.barcodes.push(BarcodeEntry { barcode: barcode.clone(), index, count: key }),
            _ => {
                if let Some((row, m, obs)) = key {
                    self.counts.observe(row, m, &obs);
                }
            }
        }
    }

    pub fn merge(mut self, other: Tally) -> Tally {
        self.counts.absorb(&other.counts);
        self.pairs += other.pairs;
        self.successes += other.successes;
        for (kind, n) in other.failures {
            *self.failures.entry(kind).or_default() += n;
        }
        self.reverse_order += other.reverse_order;
        self.fragments.merge(&other.fragments);
        self.cache_hits += other.cache_hits;
        self.barcodes.extend(other.barcodes);
        self.barcode_skipped += other.barcode_skipped;
        self.unique_barcodes += other.unique_barcodes;
        self
    }

    /// 每个条形码只计一次：取输入中最靠前的成功记录
    pub fn resolve_barcodes(&mut self) {
        let mut entries = std::mem::take(&mut self.barcodes);
        entries.sort_by(|a, b| a.barcode.cmp(&b.barcode).then(a.index.cmp(&b.index)));
        let groups = entries.iter().chunk_by(|e| e.barcode.clone());
        for (_, group) in &groups {
            self.unique_barcodes += 1;
            let passing: Vec<&CountKey> = group.filter_map(|e| e.count.as_ref()).collect();
            if let Some((row, m, obs)) = passing.first() {
                self.counts.observe(*row, *m, obs);
            }
            self.barcode_skipped += passing.len().saturating_sub(1) as u64;
        }
    }

    pub fn failure_count(&self, kind: FailureKind) -> u64 {
        self.failures.get(&kind).copied().unwrap_or(0)
    }
}

/// 写出到 TSV 的逐对记录
#[derive(Debug, Clone)]
pub struct PairRecord {
    pub pair_id: String,
    pub class: Classification,
}

struct RecordNames {
    targets: Vec<String>,
    masks: Vec<String>,
}

fn write_record<W: Write>(out: &mut W, rec: &PairRecord, names: &RecordNames) -> std::io::Result<()> {
    let dash = || "-".to_string();
    let c = &rec.class;
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        rec.pair_id,
        c.success(),
        c.failure.map_or_else(dash, |k| k.name().to_string()),
        c.failed_segment.clone().unwrap_or_else(dash),
        c.target.map_or_else(dash, |t| names.targets[t].clone()),
        c.mask.map_or_else(dash, |m| names.masks[m].clone()),
        c.site.map_or_else(dash, |s| s.to_string()),
        c.end.map_or_else(dash, |e| e.to_string()),
        c.mutations,
        c.overlap
    )
}

struct Worker<'a> {
    engine: &'a Engine,
    cache: FragmentCache,
    tally: Tally,
    records: Option<Sender<Vec<PairRecord>>>,
}

impl<'a> Worker<'a> {
    fn new(engine: &'a Engine, records: Option<Sender<Vec<PairRecord>>>) -> Self {
        Self { engine, cache: FragmentCache::new(), tally: engine.new_tally(), records }
    }

    fn process_batch(&mut self, batch: Vec<ReadPair>) {
        let use_cache = self.engine.config.use_cache;
        let dedup = self.engine.barcode_pos.is_some();
        let mut rows = Vec::with_capacity(if self.records.is_some() { batch.len() } else { 0 });
        for pair in &batch {
            let (class, hit) = self.engine.process_pair(pair, use_cache.then_some(&mut self.cache));
            self.tally.record(pair.index, &class, hit, dedup);
            if self.records.is_some() {
                rows.push(PairRecord { pair_id: pair_base_id(&pair.r1.id).to_string(), class });
            }
        }
        if let Some(sender) = &self.records {
            if let Err(e) = sender.send(rows) {
                log::error!("Failed to send records to writer thread: {}", e);
            }
        }
    }

    fn finish(self) -> Tally {
        log::trace!("worker done: {} pairs, {} cached keys", self.tally.pairs, self.cache.len());
        self.tally
    }
}

/// 跑完整个输入；`records` 给定时同时写出逐对 TSV
pub fn run(
    engine: &Engine,
    mut input: PairedFastqReader<Box<dyn BufRead + Send>>,
    records: Option<Box<dyn Write + Send>>,
    num_threads: usize,
) -> Result<Tally> {
    let batch_size = engine.config.batch_size;
    let (sender_batch, receiver_batch) = bounded::<Vec<ReadPair>>(CHANNEL_BUFFER_SIZE);
    let reader_thread = thread::spawn(move || -> Result<u64> {
        let mut total = 0u64;
        loop {
            let batch = input.next_batch(batch_size)?;
            if batch.is_empty() {
                break;
            }
            total += batch.len() as u64;
            if sender_batch.send(batch).is_err() {
                break;
            }
        }
        Ok(total)
    });

    let (sender_records, writer_thread) = match records {
        Some(out) => {
            let names = RecordNames {
                targets: engine.catalog.targets().iter().map(|t| t.name.clone()).collect(),
                masks: engine.masks.iter().map(Mask::name).collect(),
            };
            let (sender, receiver) = bounded::<Vec<PairRecord>>(CHANNEL_BUFFER_SIZE);
            let handle = thread::spawn(move || -> Result<()> {
                let mut out = BufWriter::new(out);
                writeln!(out, "{}", RECORD_HEADER)?;
                for rows in &receiver {
                    for rec in &rows {
                        write_record(&mut out, rec, &names)?;
                    }
                }
                out.flush()?;
                Ok(())
            });
            (Some(sender), Some(handle))
        }
        None => (None, None),
    };

    log::debug!("Initializing thread pool with {} threads...", num_threads);
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("spats-{}", i))
        .build()
        .context("failed to initialize thread pool")?;
    let tally = pool.install(|| {
        receiver_batch
            .into_iter()
            .par_bridge()
            .fold(
                || Worker::new(engine, sender_records.clone()),
                |mut worker, batch| {
                    worker.process_batch(batch);
                    worker
                },
            )
            .map(Worker::finish)
            .reduce_with(Tally::merge)
    });

    // Clean-up
    drop(sender_records);
    if let Some(handle) = writer_thread {
        handle.join().map_err(|_| anyhow!("writer thread panicked"))??;
        log::trace!("Writer thread finished");
    }
    let total = reader_thread.join().map_err(|_| anyhow!("reader thread panicked"))??;

    let mut tally = tally.unwrap_or_else(|| engine.new_tally());
    tally.resolve_barcodes();
    debug_assert_eq!(tally.pairs, total);
    log::info!(
        "processed {} pairs: {} counted, {} failed, {} cache hits",
        tally.pairs,
        tally.successes,
        tally.pairs - tally.successes,
        tally.cache_hits
    );
    Ok(tally)
}
