use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::fragment::FragmentOptions;
use crate::profile::Mask;
use crate::segment::{SegmentSpec, SequenceDescriptor};
use crate::sequence::Sequence;
use crate::target::DEFAULT_TARGET_WORD_LENGTH;

pub const DEFAULT_BATCH_SIZE: usize = 16384;
pub const DEFAULT_COTRANS_MINIMUM_LENGTH: usize = 20;

/// 一次运行的全部参数，从 JSON 读入
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 片段从 5' 到 3' 的段声明
    pub segments: Vec<SegmentSpec>,
    /// 由 FASTA 靶序列填充字符的段
    pub target_segment: String,
    /// 用于掩码分类的段
    pub mask_segment: String,
    /// [处理, 对照]
    pub masks: Vec<String>,
    /// 设置后，每个条形码只计一次
    pub barcode_segment: Option<String>,
    pub fragment: FragmentOptions,
    pub target_word_length: usize,
    pub target_min_length: Option<usize>,
    pub batch_size: usize,
    pub allow_negative_values: bool,
    pub use_cache: bool,
    /// 以 R1|R2 而不是合并后的片段作为缓存键
    pub cache_by_mates: bool,
    /// 按位点统计靶序列段上的错配，并计算突变剖面；target 段至少允许 1 个错误
    pub count_mutations: bool,
    /// 按位点统计靶序列段上的插入 / 删除，并计入突变剖面
    pub handle_indels: bool,
    /// 共转录模式：每个 3' 末端单独计数
    pub cotrans: bool,
    pub cotrans_minimum_length: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            segments: Vec::new(),
            target_segment: "target".to_string(),
            mask_segment: "mask".to_string(),
            masks: vec!["RRRY".to_string(), "YYYR".to_string()],
            barcode_segment: None,
            fragment: FragmentOptions::default(),
            target_word_length: DEFAULT_TARGET_WORD_LENGTH,
            target_min_length: None,
            batch_size: DEFAULT_BATCH_SIZE,
            allow_negative_values: false,
            use_cache: true,
            cache_by_mates: false,
            count_mutations: false,
            handle_indels: false,
            cotrans: false,
            cotrans_minimum_length: DEFAULT_COTRANS_MINIMUM_LENGTH,
        }
    }
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text).context("invalid run configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("cannot read config '{}'", path))?;
        Self::from_json(&text).with_context(|| format!("in config '{}'", path))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.segments.is_empty(), "config declares no segments");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.masks.len() == 2, "expected exactly two masks (treated, untreated), got {}", self.masks.len());
        let has = |key: &str| self.segments.iter().any(|s| s.key == key);
        for (what, key) in [("target_segment", &self.target_segment), ("mask_segment", &self.mask_segment)] {
            if !has(key) {
                bail!("{} '{}' is not a declared segment", what, key);
            }
        }
        if let Some(b) = &self.barcode_segment {
            if !has(b) {
                bail!("barcode_segment '{}' is not a declared segment", b);
            }
        }
        if self.segments.iter().any(|s| s.key == self.target_segment && s.wildcard) {
            bail!("target segment '{}' cannot be a wildcard", self.target_segment);
        }
        if self.cotrans {
            ensure!(self.cotrans_minimum_length > 0, "cotrans_minimum_length must be positive");
        }
        self.mask_patterns()?;
        Ok(())
    }

    pub fn mask_patterns(&self) -> Result<Vec<Mask>> {
        self.masks.iter().map(|m| Mask::new(m)).collect()
    }

    /// 用某个靶序列填充 target 段后得到的描述符。
    /// target 段未声明 `min_end` 时要求一直匹配到靶序列 3' 端（cotrans 模式下是最短末端）。
    pub fn descriptor_for(&self, target: &Sequence) -> Result<SequenceDescriptor> {
        let mut segments = Vec::with_capacity(self.segments.len());
        for spec in &self.segments {
            let segd = if spec.key == self.target_segment {
                let mut spec = spec.clone();
                spec.characters = Some(target.text());
                if spec.min_end.is_none() && !spec.fixed_length {
                    let end = if self.cotrans { self.cotrans_minimum_length.min(target.len()) } else { target.len() };
                    spec.min_end = Some(end);
                }
                if self.count_mutations {
                    spec.max_allowed_errors = spec.max_allowed_errors.max(1);
                }
                spec.resolve()
            } else {
                spec.resolve()
            };
            segments.push(segd.with_context(|| format!("segment '{}'", spec.key))?);
        }
        let descriptor = SequenceDescriptor::new(segments).with_context(|| format!("descriptor for target '{}'", target.id))?;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "segments": [
            { "key": "mask", "wildcard": true, "fixed_length": true, "max_length": 4 },
            { "key": "target", "min_length": 8, "max_allowed_errors": 3 },
            { "key": "linker", "characters": "CTGACTCGGGCACCAAGGAC", "fixed_length": true, "max_allowed_errors": 1 }
        ],
        "fragment": { "r1_is_rc": false, "max_allowed_errors": 2 },
        "barcode_segment": null,
        "batch_size": 128
    }"#;

    #[test]
    fn parse_and_build_descriptor() {
        let cfg = RunConfig::from_json(CONFIG).unwrap();
        assert_eq!(cfg.batch_size, 128);
        assert_eq!(cfg.fragment.max_allowed_errors, 2);
        assert_eq!(cfg.fragment.max_resolved_errors, FragmentOptions::default().max_resolved_errors);
        assert_eq!(cfg.masks, vec!["RRRY", "YYYR"]);
        assert!(cfg.use_cache);

        let d = cfg.descriptor_for(&Sequence::new("5S", "GGATGCCTGGCGGCCGTAGCGCGGTGGTCC")).unwrap();
        assert_eq!(d.len(), 3);
        let target = d.get("target").unwrap();
        assert_eq!((target.min_length, target.max_length, target.min_end, target.max_start), (8, 30, 30, 30));
        assert_eq!(target.max_allowed_errors, 3);
        assert_eq!(d[0].max_length, 4);
        assert!(d[0].wildcard);
    }

    #[test]
    fn mutation_and_cotrans_settings_shape_the_target() {
        let target = Sequence::new("5S", "GGATGCCTGGCGGCCGTAGCGCGGTGGTCC");
        let text = CONFIG.replace("\"max_allowed_errors\": 3", "\"max_allowed_errors\": 0");
        let mut cfg = RunConfig::from_json(&text).unwrap();
        assert!(!cfg.count_mutations && !cfg.cotrans);
        assert_eq!(cfg.cotrans_minimum_length, DEFAULT_COTRANS_MINIMUM_LENGTH);
        assert_eq!(cfg.descriptor_for(&target).unwrap().get("target").unwrap().max_allowed_errors, 0);

        cfg.count_mutations = true;
        cfg.cotrans = true;
        let d = cfg.descriptor_for(&target).unwrap();
        let segd = d.get("target").unwrap();
        assert_eq!(segd.max_allowed_errors, 1);
        assert_eq!(segd.min_end, 20);

        cfg.cotrans_minimum_length = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_segment_references() {
        let mut cfg = RunConfig::from_json(CONFIG).unwrap();
        cfg.mask_segment = "umi".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::from_json(CONFIG).unwrap();
        cfg.masks = vec!["RRRY".to_string()];
        assert!(cfg.validate().is_err());

        assert!(RunConfig::from_json(r#"{ "segments": [] }"#).is_err());
        assert!(RunConfig::from_json("{ not json").is_err());
    }
}
