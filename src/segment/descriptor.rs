use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("sequence descriptor has no segments")]
    Empty,

    #[error("duplicate segment key: {0}")]
    DuplicateKey(String),

    #[error("segment with empty key")]
    MissingKey,

    #[error("invalid segment `{key}`: {reason}")]
    Invalid { key: String, reason: &'static str },
}

pub(crate) fn invalid(key: &str, reason: &'static str) -> DescriptorError {
    DescriptorError::Invalid { key: key.to_string(), reason }
}

/// 片段中预期出现的一段子序列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    pub key: String,
    /// 固定序列；通配段为 None
    pub characters: Option<Vec<u8>>,
    pub wildcard: bool,
    pub min_length: usize,
    pub max_length: usize,
    /// 左端最多可以从第几个字符开始
    pub max_start: usize,
    /// 右端至少要到达的位置
    pub min_end: usize,
    pub max_allowed_errors: usize,
    /// 是否为该段建立比对索引
    pub indexed: bool,
}

impl SegmentDescriptor {
    /// 固定序列段；`fixed_length` 为 true 时必须完整出现
    pub fn fixed(key: &str, characters: &[u8], fixed_length: bool) -> Self {
        let chars = characters.to_ascii_uppercase();
        let len = chars.len();
        Self {
            key: key.to_string(),
            characters: Some(chars),
            wildcard: false,
            min_length: if fixed_length { len } else { 0 },
            max_length: len,
            max_start: if fixed_length { 0 } else { len },
            min_end: if fixed_length { len } else { 0 },
            max_allowed_errors: 0,
            indexed: true,
        }
    }

    pub fn wildcard(key: &str, min_length: usize, max_length: usize) -> Self {
        Self {
            key: key.to_string(),
            characters: None,
            wildcard: true,
            min_length,
            max_length,
            max_start: 0,
            min_end: 0,
            max_allowed_errors: 0,
            indexed: false,
        }
    }

    pub fn with_errors(mut self, max_allowed_errors: usize) -> Self {
        self.max_allowed_errors = max_allowed_errors;
        self
    }

    pub fn chars(&self) -> &[u8] {
        self.characters.as_deref().unwrap_or(&[])
    }

    /// 由同一个碱基重复组成的固定段（如 poly-A 接头）
    pub fn is_constant(&self) -> bool {
        match self.chars().split_first() {
            Some((first, rest)) => rest.iter().all(|c| c == first),
            None => false,
        }
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        let key = self.key.as_str();
        if key.is_empty() {
            return Err(DescriptorError::MissingKey);
        }
        if self.min_length > self.max_length {
            return Err(invalid(key, "min_length exceeds max_length"));
        }
        if self.wildcard {
            if self.characters.is_some() || self.indexed {
                return Err(invalid(key, "wildcard segments have no characters and no index"));
            }
            if self.max_start != 0 || self.min_end != 0 {
                return Err(invalid(key, "wildcard segments have no start/end bounds"));
            }
            if self.max_allowed_errors != 0 {
                return Err(invalid(key, "wildcard segments cannot allow errors"));
            }
        } else {
            let len = self.chars().len();
            if len == 0 {
                return Err(invalid(key, "fixed segment without characters"));
            }
            if self.max_length > len {
                return Err(invalid(key, "max_length exceeds the segment characters"));
            }
            if self.min_end > len {
                return Err(invalid(key, "min_end exceeds the segment characters"));
            }
            if self.min_length == self.max_length && (self.max_start != 0 || self.min_end != self.min_length) {
                return Err(invalid(key, "fixed-length segment must start at 0 and reach its end"));
            }
        }
        Ok(())
    }
}

/// 有序、键唯一、非空的段列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    segments: Vec<SegmentDescriptor>,
}

impl SequenceDescriptor {
    pub fn new(segments: Vec<SegmentDescriptor>) -> Result<Self, DescriptorError> {
        if segments.is_empty() {
            return Err(DescriptorError::Empty);
        }
        for (i, s) in segments.iter().enumerate() {
            s.validate()?;
            if segments[..i].iter().any(|o| o.key == s.key) {
                return Err(DescriptorError::DuplicateKey(s.key.clone()));
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[SegmentDescriptor] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.segments.iter().position(|s| s.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&SegmentDescriptor> {
        self.segments.iter().find(|s| s.key == key)
    }
}

impl std::ops::Index<usize> for SequenceDescriptor {
    type Output = SegmentDescriptor;

    fn index(&self, idx: usize) -> &SegmentDescriptor {
        &self.segments[idx]
    }
}

/// 配置文件里的段声明，`resolve` 后得到 [`SegmentDescriptor`]。
///
/// 固定段的 `max_length` 默认为序列长度，`max_start` 默认同 `max_length`；
/// `fixed_length` 要求整段出现。通配段用 `fixed_length` 时取 `max_length` 为固定长度。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentSpec {
    pub key: String,
    pub characters: Option<String>,
    pub wildcard: bool,
    pub fixed_length: bool,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub max_start: Option<usize>,
    pub min_end: Option<usize>,
    pub max_allowed_errors: usize,
    pub indexed: Option<bool>,
}

impl SegmentSpec {
    pub fn resolve(&self) -> Result<SegmentDescriptor, DescriptorError> {
        let key = self.key.as_str();
        if self.wildcard {
            if self.characters.is_some() {
                return Err(invalid(key, "wildcard segments have no characters"));
            }
            let max = self.max_length.ok_or_else(|| invalid(key, "wildcard segment needs max_length"))?;
            let min = if self.fixed_length {
                if self.min_length.is_some() {
                    return Err(invalid(key, "fixed_length conflicts with min_length"));
                }
                max
            } else {
                self.min_length.unwrap_or(0)
            };
            let mut segd = SegmentDescriptor::wildcard(key, min, max);
            segd.indexed = self.indexed.unwrap_or(false);
            segd.max_allowed_errors = self.max_allowed_errors;
            segd.max_start = self.max_start.unwrap_or(0);
            segd.min_end = self.min_end.unwrap_or(0);
            return Ok(segd);
        }

        let chars = match self.characters.as_deref() {
            Some(c) if !c.is_empty() => c.as_bytes(),
            _ => return Err(invalid(key, "fixed segment without characters")),
        };
        let mut segd = SegmentDescriptor::fixed(key, chars, false);
        if let Some(max) = self.max_length {
            segd.max_length = max;
        }
        if self.fixed_length {
            if self.min_length.is_some() || self.min_end.is_some() {
                return Err(invalid(key, "fixed_length conflicts with min_length/min_end"));
            }
            segd.min_length = segd.chars().len();
            segd.min_end = segd.chars().len();
            segd.max_start = self.max_start.unwrap_or(0);
        } else {
            segd.min_length = self.min_length.unwrap_or(0);
            segd.min_end = self.min_end.unwrap_or(0);
            segd.max_start = self.max_start.unwrap_or(segd.max_length);
        }
        segd.max_allowed_errors = self.max_allowed_errors;
        segd.indexed = self.indexed.unwrap_or(true);
        Ok(segd)
    }
}
