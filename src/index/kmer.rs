use std::collections::HashMap;

use anyhow::{ensure, Result};

use crate::util::dna;

pub const DEFAULT_WORD_LENGTH: usize = 8;

/// 一次部分匹配：query 中的起点、匹配长度、参考序列中的起点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialMatch {
    pub query_start: usize,
    pub length: usize,
    pub target_start: usize,
}

/// 定长单词（k-mer）索引：单词 -> 在参考序列中出现的位置（升序）
#[derive(Debug, Clone)]
pub struct KmerIndex {
    characters: Vec<u8>,
    word_length: usize,
    words: HashMap<Vec<u8>, Vec<usize>>,
}

impl KmerIndex {
    /// 构建索引；单词长度会被截断到序列长度
    pub fn build(characters: &[u8], word_length: usize) -> Result<Self> {
        ensure!(!characters.is_empty(), "cannot index an empty sequence");
        ensure!(word_length > 0, "index word length must be positive");
        let word_length = word_length.min(characters.len());
        let mut words: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
        for (i, w) in characters.windows(word_length).enumerate() {
            words.entry(w.to_vec()).or_default().push(i);
        }
        Ok(Self { characters: characters.to_vec(), word_length, words })
    }

    pub fn characters(&self) -> &[u8] {
        &self.characters
    }

    pub fn word_length(&self) -> usize {
        self.word_length
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// 单词在参考序列中的全部位置
    #[inline]
    pub fn hits(&self, word: &[u8]) -> &[usize] {
        self.words.get(word).map_or(&[], Vec::as_slice)
    }

    /// 精确子串查找，返回第一个出现位置
    pub fn find_exact(&self, query: &[u8]) -> Option<usize> {
        if query.is_empty() || query.len() > self.characters.len() {
            return None;
        }
        if query.len() < self.word_length {
            return self.characters.windows(query.len()).position(|w| w == query);
        }
        let n = query.len();
        self.hits(&query[..self.word_length])
            .iter()
            .copied()
            .find(|&p| p + n <= self.characters.len() && &self.characters[p..p + n] == query)
    }

    /// 最长公共片段（长度 >= min_length），延伸时允许 IUPAC 兼容字符。
    /// min_length 为 0 时先用 2 倍单词长度搜索（更快），找不到再退回单词长度。
    pub fn find_partial(&self, query: &[u8], min_length: usize) -> Option<PartialMatch> {
        if min_length > 0 {
            return self.partial_search(query, min_length, false);
        }
        self.partial_search(query, 2 * self.word_length, false)
            .or_else(|| self.partial_search(query, self.word_length, false))
    }

    /// 与 `find_partial` 相同，但只接受严格相等的字符
    pub fn find_partial_strict(&self, query: &[u8], min_length: usize) -> Option<PartialMatch> {
        let min_length = if min_length == 0 { self.word_length } else { min_length };
        self.partial_search(query, min_length, true)
    }

    fn partial_search(&self, query: &[u8], min_len: usize, strict: bool) -> Option<PartialMatch> {
        let wl = self.word_length;
        if query.len() < wl || query.len() < min_len {
            return None;
        }
        // 任何长度 >= min_len 的匹配必然完整包含至少一个采样单词
        let check_every = min_len.saturating_sub(wl).max(1);
        let last = query.len() - check_every.max(wl);

        let mut best: Option<PartialMatch> = None;
        let sites = (0..last).step_by(check_every).chain(std::iter::once(last));
        for site in sites {
            for &index in self.hits(&query[site..site + wl]) {
                let (left, right) = if strict {
                    longest_exact_match(query, (site, wl), &self.characters, (index, wl))
                } else {
                    longest_match(query, (site, wl), &self.characters, (index, wl))
                };
                let total = left + right + wl;
                if total < min_len || best.is_some_and(|b| total <= b.length) {
                    continue;
                }
                let found = PartialMatch { query_start: site - left, length: total, target_start: index - left };
                if total == query.len() {
                    return Some(found);
                }
                best = Some(found);
            }
        }
        best
    }
}

fn extend(
    s1: &[u8],
    range1: (usize, usize),
    s2: &[u8],
    range2: (usize, usize),
    same: impl Fn(u8, u8) -> bool,
) -> (usize, usize) {
    let (left1, len1) = range1;
    let (left2, len2) = range2;
    debug_assert_eq!(&s1[left1..left1 + len1], &s2[left2..left2 + len2]);
    let right1 = left1 + len1;
    let right2 = left2 + len2;
    let lmax = left1.min(left2);
    let rmax = (s1.len() - right1).min(s2.len() - right2);

    let mut left = 0;
    while left < lmax && same(s1[left1 - left - 1], s2[left2 - left - 1]) {
        left += 1;
    }
    let mut right = 0;
    while right < rmax && same(s1[right1 + right], s2[right2 + right]) {
        right += 1;
    }
    (left, right)
}

/// 从一个已知的精确匹配向两侧延伸（IUPAC 兼容），返回 (左延伸, 右延伸)
pub fn longest_match(s1: &[u8], range1: (usize, usize), s2: &[u8], range2: (usize, usize)) -> (usize, usize) {
    extend(s1, range1, s2, range2, dna::compatible)
}

/// 同 `longest_match`，但只接受完全相同的字符
pub fn longest_exact_match(s1: &[u8], range1: (usize, usize), s2: &[u8], range2: (usize, usize)) -> (usize, usize) {
    extend(s1, range1, s2, range2, |a, b| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &[u8] = b"GGATGCCTGGCGGCCGTAGCGCGGTGGTCCCACCTGACCCCATGCCGAACTCAGAAGTGAAACG";

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(KmerIndex::build(b"", 8).is_err());
    }

    #[test]
    fn word_length_clamped_to_sequence() {
        let idx = KmerIndex::build(b"ACGT", 8).unwrap();
        assert_eq!(idx.word_length(), 4);
        assert_eq!(idx.hits(b"ACGT"), &[0]);
    }

    #[test]
    fn find_exact_round_trip() {
        let idx = KmerIndex::build(REFERENCE, 8).unwrap();
        for (start, len) in [(0, 8), (5, 19), (30, 12), (REFERENCE.len() - 9, 9), (12, 3)] {
            let sub = &REFERENCE[start..start + len];
            let p = idx.find_exact(sub).expect("substring must be found");
            assert_eq!(&REFERENCE[p..p + len], sub);
        }
        assert_eq!(idx.find_exact(b"TTTTTTTTTT"), None);
        assert_eq!(idx.find_exact(b""), None);
    }

    #[test]
    fn unrelated_query_has_no_partial() {
        let idx = KmerIndex::build(REFERENCE, 8).unwrap();
        assert_eq!(idx.find_partial(b"ATCGGGGGCTCTGTTGGTT", 0), None);
    }

    #[test]
    fn prefix_query_is_full_partial() {
        let idx = KmerIndex::build(REFERENCE, 8).unwrap();
        let m = idx.find_partial(&REFERENCE[..19], 0).unwrap();
        assert_eq!(m, PartialMatch { query_start: 0, length: 19, target_start: 0 });
    }

    #[test]
    fn partial_embedded_in_noise() {
        let idx = KmerIndex::build(REFERENCE, 8).unwrap();
        let mut q = b"TTTTT".to_vec();
        q.extend_from_slice(&REFERENCE[20..40]);
        q.extend_from_slice(b"TTTTTT");
        let m = idx.find_partial(&q, 10).unwrap();
        assert_eq!(m.query_start, 5);
        assert_eq!(m.target_start, 20);
        assert!(m.length >= 20);
        assert_eq!(&q[m.query_start..m.query_start + 20], &REFERENCE[20..40]);
    }

    #[test]
    fn partial_respects_minimum_and_is_monotone() {
        let idx = KmerIndex::build(REFERENCE, 6).unwrap();
        let mut q = REFERENCE[10..24].to_vec();
        q.extend_from_slice(b"AAAAAAAA");
        let mut prev = usize::MAX;
        for min in [6, 8, 10, 14, 15, 20] {
            let len = idx.find_partial(&q, min).map_or(0, |m| m.length);
            if len > 0 {
                assert!(len >= min);
            }
            assert!(len <= prev);
            prev = len;
        }
        assert_eq!(idx.find_partial(&q, 15), None);
    }

    #[test]
    fn partial_extends_through_ambiguity() {
        let idx = KmerIndex::build(REFERENCE, 8).unwrap();
        let mut q = REFERENCE[0..24].to_vec();
        q[12] = b'N';
        let m = idx.find_partial(&q, 0).unwrap();
        assert_eq!(m.length, 24);
        let strict = idx.find_partial_strict(&q, 8).unwrap();
        assert_eq!(strict.length, 12);
    }

    #[test]
    fn extension_helpers() {
        let a = b"xxACGTAC";
        let b = b"ACGTAN";
        assert_eq!(longest_match(a, (4, 2), b, (2, 2)), (2, 2));
        assert_eq!(longest_exact_match(a, (4, 2), b, (2, 2)), (2, 1));
    }
}
