use anyhow::{bail, ensure, Result};

use crate::index::{KmerIndex, PartialMatch};
use crate::sequence::Sequence;

/// 路由用的默认单词长度
pub const DEFAULT_TARGET_WORD_LENGTH: usize = 8;
/// 最短匹配长度的上限
pub const MAX_MINIMUM_MATCH_LENGTH: usize = 35;

#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub characters: Vec<u8>,
    index: KmerIndex,
}

impl Target {
    pub fn n(&self) -> usize {
        self.characters.len()
    }
}

/// 片段命中的靶序列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetHit {
    pub target: usize,
    pub matched: PartialMatch,
}

/// 多个靶序列的索引；按最长部分匹配把片段分派到某个靶
#[derive(Debug, Clone)]
pub struct TargetCatalog {
    targets: Vec<Target>,
    min_length: usize,
}

impl TargetCatalog {
    pub fn new(targets: &[Sequence], word_length: usize, min_length: Option<usize>) -> Result<Self> {
        ensure!(!targets.is_empty(), "no targets");
        let min_length = min_length.unwrap_or(word_length);
        if min_length < word_length {
            bail!("minimum match length too short: {} < {}", min_length, word_length);
        }
        if min_length > MAX_MINIMUM_MATCH_LENGTH {
            bail!("minimum match length {} is too long", min_length);
        }
        let targets = targets
            .iter()
            .map(|t| {
                Ok(Target {
                    name: t.id.clone(),
                    characters: t.characters.clone(),
                    index: KmerIndex::build(&t.characters, word_length)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let catalog = Self { targets, min_length };
        if catalog.targets.len() > 1 {
            let shared = catalog.longest_cross_match();
            if shared >= min_length {
                log::warn!("targets share a {} base stretch, routing may be ambiguous (minimum match {})", shared, min_length);
            }
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn get(&self, idx: usize) -> &Target {
        &self.targets[idx]
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// 最长匹配胜出，等长时取靠前的靶
    pub fn find(&self, query: &[u8]) -> Option<TargetHit> {
        let mut best: Option<TargetHit> = None;
        for (i, t) in self.targets.iter().enumerate() {
            let Some(m) = t.index.find_partial(query, self.min_length) else { continue };
            if best.map_or(true, |b| m.length > b.matched.length) {
                best = Some(TargetHit { target: i, matched: m });
            }
        }
        best
    }

    /// 不同靶序列之间最长的公共片段
    pub fn longest_cross_match(&self) -> usize {
        let mut longest = 0;
        for (i, a) in self.targets.iter().enumerate() {
            for (j, b) in self.targets.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Some(m) = b.index.find_partial_strict(&a.characters, b.index.word_length()) {
                    longest = longest.max(m.length);
                }
            }
        }
        longest
    }
}
