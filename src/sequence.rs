use serde::{Deserialize, Serialize};

/// 一条读段或参考序列：标识、核苷酸字符、可选的 Phred+33 质量串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub characters: Vec<u8>,
    pub quality: Option<Vec<u8>>,
}

impl Sequence {
    pub fn new(id: impl Into<String>, characters: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into(), characters: characters.into(), quality: None }
    }

    pub fn with_quality(id: impl Into<String>, characters: impl Into<Vec<u8>>, quality: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into(), characters: characters.into(), quality: Some(quality.into()) }
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.characters).into_owned()
    }
}

/// 一对 mate 读段；`index` 为输入中的序号（从 0 开始）
#[derive(Debug, Clone)]
pub struct ReadPair {
    pub index: u64,
    pub r1: Sequence,
    pub r2: Sequence,
}

/// 去掉 mate 标识中常见的 `/1`、`/2` 后缀
pub fn pair_base_id(id: &str) -> &str {
    id.strip_suffix("/1")
        .or_else(|| id.strip_suffix("/2"))
        .unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mate_suffixes_are_stripped() {
        assert_eq!(pair_base_id("read7/1"), "read7");
        assert_eq!(pair_base_id("read7/2"), "read7");
        assert_eq!(pair_base_id("read7"), "read7");
        assert_eq!(pair_base_id("read7/3"), "read7/3");
    }
}
