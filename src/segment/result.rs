use serde::{Deserialize, Serialize};

use super::descriptor::SegmentDescriptor;
use crate::align::{AffineAlignment, Indel};
use crate::failure::Failure;

/// 某个段上可以额外认领的一段字符 `[start, end)`；通配段的 text 全是 `?`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRange {
    pub segment: usize,
    pub start: usize,
    pub end: usize,
    pub text: Vec<u8>,
}

impl EdgeRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 单个段的匹配结果。
///
/// `errors` 与 indel 的 `target_index`/`error_index` 都相对 `segment_start`；
/// indel 的 `src_index` 是 query 上的绝对位置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentResult {
    /// 描述符中的序号
    pub segment: usize,
    pub query_start: usize,
    pub query_end: usize,
    pub segment_start: usize,
    pub errors: Vec<usize>,
    pub indels: Vec<Indel>,
    pub indels_delta: isize,
}

impl SegmentResult {
    pub fn new(segment: usize, query_start: usize, segment_start: usize) -> Self {
        Self {
            segment,
            query_start,
            query_end: query_start,
            segment_start,
            errors: Vec::new(),
            indels: Vec::new(),
            indels_delta: 0,
        }
    }

    /// 在段序列上覆盖的长度
    pub fn length(&self) -> usize {
        (self.query_end as isize - self.query_start as isize - self.indels_delta).max(0) as usize
    }

    pub fn segment_end(&self) -> usize {
        self.segment_start + self.length()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.indels.len()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn shift_right(&mut self, amount: usize) {
        self.query_start += amount;
        self.query_end += amount;
    }

    /// 右移一位后 query 上的文本是否仍等于段序列
    pub fn can_shift_right(&self, query: &[u8], segd: &SegmentDescriptor) -> bool {
        query.get(self.query_start + 1..self.query_end + 1) == Some(segd.chars())
    }

    /// 向左扩展时可以认领的范围；第一个候选是不扩展
    pub fn left_edge_ranges(&self, segd: &SegmentDescriptor) -> Vec<EdgeRange> {
        if segd.wildcard {
            return Vec::new();
        }
        let chars = segd.chars();
        let end = self.segment_start;
        let mut out = Vec::new();
        if self.segment_start <= segd.max_start {
            out.push(EdgeRange { segment: self.segment, start: end, end, text: Vec::new() });
        }
        for start in 0..end.min(segd.max_start + 1) {
            if end - start + self.length() <= segd.max_length {
                out.push(EdgeRange { segment: self.segment, start, end, text: chars[start..end].to_vec() });
            }
        }
        out
    }

    /// 向右扩展时可以认领的范围；第一个候选是不扩展
    pub fn right_edge_ranges(&self, segd: &SegmentDescriptor) -> Vec<EdgeRange> {
        if segd.wildcard {
            return Vec::new();
        }
        let chars = segd.chars();
        let start = self.segment_end();
        let mut out = Vec::new();
        if start >= segd.min_end {
            out.push(EdgeRange { segment: self.segment, start, end: start, text: Vec::new() });
        }
        for end in (start + 1).max(segd.min_end)..=chars.len() {
            if end - start + self.length() <= segd.max_length {
                out.push(EdgeRange { segment: self.segment, start, end, text: chars[start..end].to_vec() });
            }
        }
        out
    }

    /// 用对齐结果的开头部分向右扩展本段，消耗掉的部分从 `a` 中移除。
    /// `query_offset` 是 `a` 的 source 在 query 上的起点。返回新增的 indel 长度差。
    pub fn right_extend(&mut self, rng: &EdgeRange, a: &mut AffineAlignment, query_offset: usize, wildcard: bool) -> isize {
        debug_assert_eq!(rng.segment, self.segment);
        debug_assert!(rng.start >= self.segment_end());
        let amount = rng.len() as isize;
        let shift = self.length() as isize;
        let new_errors: Vec<usize> = a.mismatched.iter().filter(|&&e| e < amount).map(|&e| (e + shift) as usize).collect();
        let new_indels: Vec<Indel> = a
            .indels
            .values()
            .filter(|i| i.error_index < amount)
            .map(|i| i.shift_to(query_offset as isize, shift))
            .collect();
        let new_delta: isize = new_indels.iter().map(Indel::delta).sum();
        self.query_end = (self.query_end as isize + amount + new_delta) as usize;
        if wildcard {
            debug_assert!(new_indels.is_empty(), "indel absorbed by a wildcard segment");
        } else {
            self.errors.extend(new_errors);
            self.indels.extend(new_indels);
            self.indels_delta += new_delta;
        }
        consume(a, amount, |i| i.error_index >= amount);
        new_delta
    }

    /// 用对齐结果的开头部分向左扩展本段（本段是间隙右侧的邻居）
    pub fn left_extend(&mut self, rng: &EdgeRange, a: &mut AffineAlignment, query_offset: usize) -> isize {
        debug_assert_eq!(rng.segment, self.segment);
        debug_assert!(rng.end <= self.segment_start);
        let amount = rng.len() as isize;
        let new_errors: Vec<usize> = a.mismatched.iter().filter(|&&e| e < amount).map(|&e| e as usize).collect();
        let new_indels: Vec<Indel> = a
            .indels
            .values()
            .filter(|i| i.error_index <= amount)
            .map(|i| i.shift_to(query_offset as isize, 0))
            .collect();
        let new_delta: isize = new_indels.iter().map(Indel::delta).sum();
        self.query_start = (self.query_start as isize - amount - new_delta) as usize;
        self.segment_start -= rng.len();

        // 已有的位置整体右移
        let mut errors = new_errors;
        errors.extend(self.errors.iter().map(|e| e + rng.len()));
        self.errors = errors;
        let mut indels = new_indels;
        indels.extend(self.indels.iter().map(|i| i.shift_to(0, amount)));
        self.indels = indels;
        self.indels_delta += new_delta;

        consume(a, amount, |i| i.error_index > amount);
        new_delta
    }
}

/// 丢弃已经分配出去的前 `amount` 个目标字符
fn consume(a: &mut AffineAlignment, amount: isize, keep: impl Fn(&Indel) -> bool) {
    a.mismatched = a.mismatched.iter().filter(|&&e| e >= amount).map(|e| e - amount).collect();
    a.indels = std::mem::take(&mut a.indels)
        .into_iter()
        .filter(|(_, i)| keep(i))
        .map(|(k, i)| (k - amount, i.shift_to(0, -amount)))
        .collect();
}

/// 一条序列的解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceResult {
    /// 成功时按 query 顺序排列、首尾相接
    pub segments: Vec<SegmentResult>,
    pub success: bool,
    pub failure: Option<Failure>,
}

impl SequenceResult {
    /// 按描述符序号查找
    pub fn segment(&self, idx: usize) -> Option<&SegmentResult> {
        self.segments.iter().find(|s| s.segment == idx)
    }

    pub fn error_count(&self) -> usize {
        self.segments.iter().map(SegmentResult::error_count).sum()
    }

    pub fn has_indels(&self) -> bool {
        self.segments.iter().any(|s| !s.indels.is_empty())
    }

    pub fn subsequence<'a>(&self, query: &'a [u8], idx: usize) -> Option<&'a [u8]> {
        self.segment(idx).map(|s| &query[s.query_start..s.query_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn alignment(mismatched: Vec<isize>, indels: Vec<Indel>) -> AffineAlignment {
        AffineAlignment {
            score: 0,
            target_len: 0,
            target_start: 0,
            target_end: -1,
            source_len: 0,
            source_start: 0,
            source_end: -1,
            indels: indels.into_iter().map(|i| (i.target_index, i)).collect::<BTreeMap<_, _>>(),
            mismatched,
            max_run: 0,
        }
    }

    #[test]
    fn length_accounts_for_indels() {
        let mut sr = SegmentResult::new(0, 10, 2);
        sr.query_end = 21;
        sr.indels_delta = 1;
        assert_eq!(sr.length(), 10);
        assert_eq!(sr.segment_end(), 12);
    }

    #[test]
    fn edge_ranges_respect_bounds() {
        let segd = SegmentDescriptor::fixed("t", b"ACGTACGTAC", false);
        let mut sr = SegmentResult::new(0, 5, 3);
        sr.query_end = 10;
        let left = sr.left_edge_ranges(&segd);
        assert_eq!(left.len(), 4);
        assert!(left[0].is_empty());
        assert_eq!(left[1].text, b"ACG".to_vec());

        let right = sr.right_edge_ranges(&segd);
        assert!(right[0].is_empty());
        assert_eq!(right.last().map(|r| r.text.clone()), Some(b"AC".to_vec()));
    }

    #[test]
    fn extend_splits_alignment_between_neighbors() {
        // 左邻居认领 3 个字符，右邻居认领剩下的 2 个
        let mut a = alignment(vec![1, 4], vec![Indel::insertion(b"G", 2, 3)]);
        let mut left = SegmentResult::new(0, 0, 0);
        left.query_end = 6;
        let rng = EdgeRange { segment: 0, start: 6, end: 9, text: b"ACG".to_vec() };
        let delta = left.right_extend(&rng, &mut a, 6, false);
        assert_eq!(delta, 0);
        assert_eq!(left.query_end, 9);
        assert_eq!(left.errors, vec![7]);
        assert_eq!(a.mismatched, vec![1]);
        assert_eq!(a.indels.len(), 1);

        let mut right = SegmentResult::new(1, 12, 2);
        right.query_end = 20;
        right.errors = vec![5];
        let rng = EdgeRange { segment: 1, start: 0, end: 2, text: b"TT".to_vec() };
        let delta = right.left_extend(&rng, &mut a, 6);
        assert_eq!(delta, 1);
        assert_eq!(right.query_start, 9);
        assert_eq!(right.segment_start, 0);
        assert_eq!(right.errors, vec![1, 7]);
        assert_eq!(right.indels[0].src_index, 8);
        assert_eq!(right.indels[0].error_index, 0);
        assert!(a.indels.is_empty());
    }
}
