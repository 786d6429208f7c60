use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::dna;

/// 4 字符的 IUPAC 模式（如 `RRRY`），用来把片段分到处理 / 对照通道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub chars: Vec<u8>,
    values: Vec<u8>,
}

impl Mask {
    pub fn new(chars: &str) -> Result<Self> {
        let chars = chars.as_bytes().to_ascii_uppercase();
        ensure!(!chars.is_empty(), "empty mask");
        let values: Vec<u8> = chars.iter().map(|&c| dna::iupac_mask(c)).collect();
        if let Some(pos) = values.iter().position(|&v| v == 0) {
            bail!("mask '{}' has a non-IUPAC character at {}", String::from_utf8_lossy(&chars), pos);
        }
        Ok(Self { chars, values })
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.chars).into_owned()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// `seq` 的前缀与每个位置的碱基集合都有交集；长度不足时不匹配
    pub fn matches(&self, seq: &[u8]) -> bool {
        seq.len() >= self.values.len() && self.values.iter().zip(seq).all(|(&m, &c)| dna::iupac_mask(c) & m != 0)
    }
}

/// 一个掩码通道在一个靶序列上的计数。
///
/// 所有数组长度都是 n+1，共用一套下标：下标 k 对应第 k 个碱基（1 起），
/// 下标 0 对应跑到 5' 端的全长产物。突变与 indel 数组只在对应开关打开时累加。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskCounts {
    /// 下标为 RT 终止位点
    pub stops: Vec<u64>,
    pub muts: Vec<u64>,
    pub inserts: Vec<u64>,
    pub deletes: Vec<u64>,
    /// 计入本通道的片段数
    pub kept: u64,
}

impl MaskCounts {
    fn zeroed(n: usize) -> Self {
        Self { stops: vec![0; n + 1], muts: vec![0; n + 1], inserts: vec![0; n + 1], deletes: vec![0; n + 1], kept: 0 }
    }

    /// 位点 `j` 上计入突变剖面的事件数（突变 + 插入 + 删除）
    pub fn mutation_events(&self, j: usize) -> u64 {
        self.muts[j] + self.inserts[j] + self.deletes[j]
    }
}

/// 一个片段留在计数表上的全部事件；位点下标与 `MaskCounts` 一致
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub site: usize,
    pub mutations: Vec<usize>,
    pub inserts: Vec<usize>,
    pub deletes: Vec<usize>,
}

impl Observation {
    pub fn stop(site: usize) -> Self {
        Self { site, ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCounts {
    pub name: String,
    pub characters: Vec<u8>,
    /// 与 `Counts::masks` 同序
    pub masks: Vec<MaskCounts>,
}

impl TargetCounts {
    pub fn n(&self) -> usize {
        self.characters.len()
    }
}

/// 所有计数行 x 所有掩码的计数；合并只做整数加法。
///
/// 一行通常是一个靶序列；cotrans 模式下每个 (靶序列, 3' 末端) 各占一行，
/// 行名为 `{name}_{end}`，字符为靶序列前 `end` 个碱基。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub masks: Vec<String>,
    pub targets: Vec<TargetCounts>,
    pub count_mutations: bool,
    pub count_indels: bool,
}

impl Counts {
    pub fn new(masks: &[Mask], targets: &[(String, Vec<u8>)]) -> Self {
        let targets = targets
            .iter()
            .map(|(name, chars)| TargetCounts {
                name: name.clone(),
                characters: chars.clone(),
                masks: vec![MaskCounts::zeroed(chars.len()); masks.len()],
            })
            .collect();
        Self { masks: masks.iter().map(Mask::name).collect(), targets, count_mutations: false, count_indels: false }
    }

    /// 打开突变 / indel 计数
    pub fn with_mutations(mut self, count_mutations: bool, count_indels: bool) -> Self {
        self.count_mutations = count_mutations;
        self.count_indels = count_indels;
        self
    }

    /// 是否需要计算突变剖面
    pub fn has_mutations(&self) -> bool {
        self.count_mutations || self.count_indels
    }

    /// 记一次终止；`site` 超出 `0..=n` 属于调用方的缺陷
    pub fn count(&mut self, target: usize, mask: usize, site: usize) {
        let mc = &mut self.targets[target].masks[mask];
        assert!(site < mc.stops.len(), "site {} beyond target end {}", site, mc.stops.len() - 1);
        mc.stops[site] += 1;
        mc.kept += 1;
    }

    /// 记一个片段：终止位点，以及打开时的突变 / indel。
    /// 落在 `0..=n` 之外的事件位点（例如 3' 端之后的插入）不计。
    pub fn observe(&mut self, target: usize, mask: usize, obs: &Observation) {
        self.count(target, mask, obs.site);
        let (muts, indels) = (self.count_mutations, self.count_indels);
        let mc = &mut self.targets[target].masks[mask];
        let bump = |arr: &mut Vec<u64>, sites: &[usize]| {
            for &j in sites {
                if let Some(v) = arr.get_mut(j) {
                    *v += 1;
                }
            }
        };
        if muts {
            bump(&mut mc.muts, &obs.mutations);
        }
        if indels {
            bump(&mut mc.inserts, &obs.inserts);
            bump(&mut mc.deletes, &obs.deletes);
        }
    }

    pub fn kept(&self) -> u64 {
        self.targets.iter().flat_map(|t| &t.masks).map(|m| m.kept).sum()
    }

    pub fn mask_index(&self, name: &str) -> Option<usize> {
        self.masks.iter().position(|m| m.eq_ignore_ascii_case(name))
    }

    /// 逐元素相加；两边的掩码与靶序列布局必须一致
    pub fn merge(&mut self, other: &Counts) -> Result<()> {
        ensure!(self.masks == other.masks, "cannot merge counts with masks {:?} into {:?}", other.masks, self.masks);
        ensure!(self.targets.len() == other.targets.len(), "cannot merge counts over different target sets");
        ensure!(
            self.count_mutations == other.count_mutations && self.count_indels == other.count_indels,
            "cannot merge counts with different mutation / indel settings"
        );
        for (mine, theirs) in self.targets.iter_mut().zip(&other.targets) {
            ensure!(
                mine.name == theirs.name && mine.characters == theirs.characters,
                "target '{}' does not match '{}'",
                theirs.name,
                mine.name
            );
        }
        self.absorb(other);
        Ok(())
    }

    /// 同一模板产生的计数直接相加（工作线程归并用）
    pub fn absorb(&mut self, other: &Counts) {
        assert_eq!(self.targets.len(), other.targets.len(), "count layouts differ");
        for (mine, theirs) in self.targets.iter_mut().zip(&other.targets) {
            for (a, b) in mine.masks.iter_mut().zip(&theirs.masks) {
                assert_eq!(a.stops.len(), b.stops.len(), "count layouts differ for {}", mine.name);
                for (dst, src) in [(&mut a.stops, &b.stops), (&mut a.muts, &b.muts), (&mut a.inserts, &b.inserts), (&mut a.deletes, &b.deletes)] {
                    for (x, y) in dst.iter_mut().zip(src) {
                        *x += y;
                    }
                }
                a.kept += b.kept;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// RFC3339
    pub created: String,
    pub inputs: Vec<String>,
    pub version: String,
}

/// 计数的落盘形式，可以跨运行合并
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub meta: SnapshotMeta,
    pub counts: Counts,
}

impl CountSnapshot {
    pub fn new(counts: Counts, inputs: Vec<String>) -> Self {
        let meta = SnapshotMeta {
            created: chrono::Utc::now().to_rfc3339(),
            inputs,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        Self { meta, counts }
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let f = std::fs::File::create(path).with_context(|| format!("cannot create '{}'", path))?;
        let mut w = std::io::BufWriter::new(f);
        bincode::serialize_into(&mut w, self)?;
        Ok(())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("cannot open snapshot '{}'", path))?;
        let snap: Self = bincode::deserialize_from(std::io::BufReader::new(f))
            .with_context(|| format!("'{}' is not a count snapshot", path))?;
        Ok(snap)
    }

    /// 依次读入并合并多个快照
    pub fn merge_files(paths: &[String]) -> Result<Self> {
        let Some((first, rest)) = paths.split_first() else { bail!("no snapshots given") };
        let mut merged = Self::load_from_file(first)?;
        for p in rest {
            let snap = Self::load_from_file(p)?;
            merged.counts.merge(&snap.counts).with_context(|| format!("merging '{}'", p))?;
            merged.meta.inputs.extend(snap.meta.inputs);
        }
        merged.meta.created = chrono::Utc::now().to_rfc3339();
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts() -> Counts {
        let masks = [Mask::new("RRRY").unwrap(), Mask::new("YYYR").unwrap()];
        Counts::new(&masks, &[("5S".to_string(), b"GGATG".to_vec())])
    }

    #[test]
    fn mask_matching() {
        let treated = Mask::new("rrry").unwrap();
        assert_eq!(treated.name(), "RRRY");
        assert!(treated.matches(b"AGGCTTT"));
        assert!(treated.matches(b"GAAT"));
        assert!(!treated.matches(b"CGGC"));
        assert!(!treated.matches(b"AGG"));
        // N 与任意位置相容
        assert!(treated.matches(b"NNNN"));
        assert!(Mask::new("RRXY").is_err());
    }

    #[test]
    fn count_and_merge() {
        let mut a = counts();
        a.count(0, 0, 2);
        a.count(0, 0, 2);
        a.count(0, 1, 5);
        let mut b = counts();
        b.count(0, 0, 0);
        a.merge(&b).unwrap();
        assert_eq!(a.targets[0].masks[0].stops, vec![1, 0, 2, 0, 0, 0]);
        assert_eq!(a.targets[0].masks[0].kept, 3);
        assert_eq!(a.kept(), 4);
        assert_eq!(a.mask_index("yyyr"), Some(1));

        let other = Counts::new(&[Mask::new("RRRY").unwrap()], &[("5S".to_string(), b"GGATG".to_vec())]);
        assert!(a.merge(&other).is_err());
    }

    #[test]
    fn observations_fill_enabled_arrays() {
        let obs = Observation { site: 1, mutations: vec![2, 4], inserts: vec![3, 6], deletes: vec![5] };

        let mut plain = counts();
        plain.observe(0, 0, &obs);
        assert_eq!(plain.targets[0].masks[0].stops, vec![0, 1, 0, 0, 0, 0]);
        assert!(plain.targets[0].masks[0].muts.iter().all(|&v| v == 0));

        let mut full = counts().with_mutations(true, true);
        full.observe(0, 0, &obs);
        full.observe(0, 0, &Observation::stop(2));
        let mc = &full.targets[0].masks[0];
        assert_eq!(mc.stops, vec![0, 1, 1, 0, 0, 0]);
        assert_eq!(mc.muts, vec![0, 0, 1, 0, 1, 0]);
        // 下标 6 超出 n = 5，不计
        assert_eq!(mc.inserts, vec![0, 0, 0, 1, 0, 0]);
        assert_eq!(mc.deletes, vec![0, 0, 0, 0, 0, 1]);
        assert_eq!(mc.mutation_events(4), 1);
        assert_eq!(mc.kept, 2);

        let mut merged = full.clone();
        merged.merge(&full).unwrap();
        assert_eq!(merged.targets[0].masks[0].muts[4], 2);
        assert!(merged.merge(&plain).is_err());
    }

    #[test]
    fn snapshot_files_merge() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, site) in [1usize, 3].iter().enumerate() {
            let mut c = counts();
            c.count(0, 1, *site);
            let path = dir.path().join(format!("run{}.counts", i)).to_str().unwrap().to_string();
            CountSnapshot::new(c, vec![format!("run{}", i)]).save_to_file(&path).unwrap();
            paths.push(path);
        }
        let merged = CountSnapshot::merge_files(&paths).unwrap();
        assert_eq!(merged.counts.targets[0].masks[1].stops, vec![0, 1, 0, 1, 0, 0]);
        assert_eq!(merged.meta.inputs, vec!["run0".to_string(), "run1".to_string()]);
        assert!(chrono::DateTime::parse_from_rfc3339(&merged.meta.created).is_ok());
    }
}
