use std::collections::HashSet;
use std::ops::Range;

use anyhow::Result;
use itertools::Itertools;

use super::descriptor::{invalid, SegmentDescriptor, SequenceDescriptor};
use super::result::{EdgeRange, SegmentResult, SequenceResult};
use crate::align::finder::{Alignment, AlignmentFinder, DEFAULT_FINDER_WORD_SIZE};
use crate::align::{align_anchored, wildcard_similarity, AffineAlignment, AlignParams, Indel};
use crate::failure::{Failure, FailureKind};
use crate::sequence::Sequence;

/// 常量段平移后重新填补间隙的最多轮数
pub const MAX_SHIFT_ROUNDS: usize = 32;

/// 单个间隙最多尝试的候选组合数；超过时按无法对齐处理
pub const MAX_GAP_CANDIDATES: usize = 4096;

/// 单次间隙填补的结果
enum GapPass {
    Complete,
    /// 常量段已经平移，需要重新填补；携带不再重试时要报告的失败
    Retry(Failure),
}

struct SegmentMeta {
    finder: Option<AlignmentFinder>,
    /// 单一碱基重复的段：索引总是命中最左侧，必要时可以右移
    shiftable: bool,
}

/// 按描述符把一条片段序列拆成有序的段。
///
/// 阶段依次为：索引比对、常量段平移、间隙填补、边缘 indel 检查、逐段校验。
/// 任一阶段失败即停止，失败挂在返回的 [`SequenceResult`] 上。
pub struct SegmentMatcher {
    descriptor: SequenceDescriptor,
    meta: Vec<SegmentMeta>,
    params: AlignParams,
}

impl SegmentMatcher {
    pub fn new(descriptor: SequenceDescriptor) -> Result<Self> {
        let mut meta = Vec::with_capacity(descriptor.len());
        for segd in descriptor.segments() {
            let finder = if segd.indexed && !segd.wildcard {
                Some(AlignmentFinder::new(segd.chars(), DEFAULT_FINDER_WORD_SIZE, None)?)
            } else {
                None
            };
            let shiftable = finder.is_some() && segd.is_constant();
            if shiftable && segd.max_allowed_errors != 0 {
                return Err(invalid(&segd.key, "constant segments cannot allow errors").into());
            }
            meta.push(SegmentMeta { finder, shiftable });
        }
        let params = AlignParams {
            similarity: wildcard_similarity,
            gap_open: 5,
            gap_extend: 1,
            front_biased: true,
            penalize_ends: true,
            penalize_front_clip: true,
            penalize_back_clip: true,
        };
        log::debug!(
            "segment matcher: {} segments, {} indexed",
            descriptor.len(),
            meta.iter().filter(|m| m.finder.is_some()).count()
        );
        Ok(Self { descriptor, meta, params })
    }

    pub fn descriptor(&self) -> &SequenceDescriptor {
        &self.descriptor
    }

    pub fn process(&self, seq: &Sequence) -> SequenceResult {
        let query = seq.characters.as_slice();
        let mut slots: Vec<Option<SegmentResult>> = vec![None; self.descriptor.len()];
        let outcome = self
            .find_aligned_segments(query, &mut slots)
            .and_then(|()| {
                self.shift_as_necessary(query, &mut slots);
                self.fill_gaps(query, &mut slots)
            })
            .and_then(|()| self.check_edge_indels(&slots))
            .and_then(|()| self.check_requirements(&slots));

        let mut segments: Vec<SegmentResult> = slots.into_iter().flatten().filter(|s| s.length() > 0).collect();
        for sr in &mut segments {
            sr.errors.sort_unstable();
            sr.indels.sort_by_key(|i| i.error_index);
        }
        let mut result = SequenceResult { segments, success: false, failure: None };
        match outcome.and_then(|()| self.validate(query, &result.segments)) {
            Ok(()) => result.success = true,
            Err(f) => {
                log::trace!("{}: {}", seq.id, f);
                result.failure = Some(f);
            }
        }
        result
    }

    fn key(&self, idx: usize) -> &str {
        &self.descriptor[idx].key
    }

    // ── 1. 索引比对 ─────────────────────────────────────

    fn find_aligned_segments(&self, query: &[u8], slots: &mut [Option<SegmentResult>]) -> Result<(), Failure> {
        let (mut left_spot, mut right_spot) = (0, 0);
        for (idx, (segd, meta)) in self.descriptor.segments().iter().zip(&self.meta).enumerate() {
            let Some(finder) = &meta.finder else { continue };
            let Some(sr) = self.find_alignment(idx, segd, finder, query) else {
                if segd.min_length > 0 {
                    return Err(Failure::at(FailureKind::NoMatch, &segd.key));
                }
                continue;
            };
            if sr.query_start < left_spot || sr.query_end < right_spot {
                return Err(Failure::at(FailureKind::OutOfOrder, &segd.key));
            }
            // 太短的命中几乎不可能被扩展成完整的段
            if segd.min_length > 0 && sr.length() < (segd.min_length >> 3) {
                return Err(Failure::at(FailureKind::ShortMatch, &segd.key));
            }
            left_spot = sr.query_start;
            right_spot = sr.query_end;
            slots[idx] = Some(sr);
        }
        if slots.iter().all(Option::is_none) {
            return Err(Failure::new(FailureKind::NoMatch));
        }
        Ok(())
    }

    fn find_alignment(&self, idx: usize, segd: &SegmentDescriptor, finder: &AlignmentFinder, query: &[u8]) -> Option<SegmentResult> {
        let mut al = finder.align(query)?;
        if segd.max_allowed_errors == 0 && al.segments.len() > 1 {
            // 不允许错误时只保留最长的一段
            let longest = *al.segments.iter().rev().max_by_key(|s| s.length)?;
            al.segments = vec![longest];
        }
        let first = al.segments.first()?;
        let last = al.segments.last()?;
        let (qs, qe) = (first.query_index, last.query_end());
        let (ss, se) = (first.target_index, last.target_end());
        let mut sr = SegmentResult::new(idx, qs, ss);
        sr.query_end = qe;
        sr.indels_delta = (qe - qs) as isize - (se - ss) as isize;
        if al.segments.len() > 1 {
            self.align_segment_gaps(query, segd, &al, &mut sr);
        }
        Some(sr)
    }

    /// 多片段命中之间的内部间隙转换为失配 / indel
    fn align_segment_gaps(&self, query: &[u8], segd: &SegmentDescriptor, al: &Alignment, sr: &mut SegmentResult) {
        let chars = segd.chars();
        for gap in al.gaps() {
            let q = &query[gap.query_start..gap.query_end];
            let s = &chars[gap.target_start..gap.target_end];
            let rel = (gap.target_start - sr.segment_start) as isize;
            let qs = gap.query_start as isize;
            match (q.len(), s.len()) {
                (0, 0) => {}
                (_, 0) => sr.indels.push(Indel::insertion(q, qs, rel)),
                (0, n) => sr.indels.push(Indel::deletion(s, qs, rel + n as isize - 1)),
                (1, 1) => sr.errors.push(rel as usize),
                _ => {
                    let a = align_anchored(q, s, &self.params);
                    // 三个以上的事件不如一次替换可信
                    if a.indels.len() + a.mismatched.len() >= 3 || !a.covers_both() {
                        log::trace!("{}: substitution for gap {:?}, score {}", segd.key, gap, a.score);
                        sr.indels.push(Indel::substitution(q, qs, rel, s.len()));
                        continue;
                    }
                    sr.errors.extend(a.mismatched.iter().map(|&e| (e + rel) as usize));
                    sr.indels.extend(a.indels.values().map(|i| i.shift_to(qs, rel)));
                }
            }
        }
        debug_assert_eq!(sr.indels_delta, sr.indels.iter().map(Indel::delta).sum::<isize>());
    }

    // ── 2. 常量段平移 ───────────────────────────────────

    /// 常量段只会命中最左侧的位置；两侧间隙不合理时逐位右移
    fn shift_as_necessary(&self, query: &[u8], slots: &mut [Option<SegmentResult>]) -> bool {
        let mut shifted = false;
        for idx in 1..slots.len() {
            if !self.meta[idx].shiftable {
                continue;
            }
            let Some(next_segd) = self.descriptor.segments().get(idx + 1) else { continue };
            let Some(mut sr) = slots[idx].take() else { continue };
            let segd = &self.descriptor[idx];
            let prev_segd = &self.descriptor[idx - 1];
            let prev_end = slots[..idx].iter().rev().flatten().next().map_or(0, |s| s.query_end);
            let next_start = slots[idx + 1..].iter().flatten().next().map_or(query.len(), |s| s.query_start);
            loop {
                let prev_gap = sr.query_start as isize - prev_end as isize;
                let next_gap = next_start as isize - sr.query_end as isize;
                if prev_gap < prev_segd.min_length as isize
                    && next_gap > next_segd.max_length as isize
                    && sr.can_shift_right(query, segd)
                {
                    sr.shift_right(1);
                    shifted = true;
                } else {
                    break;
                }
            }
            log::trace!("{}: constant now at {}..{}", segd.key, sr.query_start, sr.query_end);
            slots[idx] = Some(sr);
        }
        shifted
    }

    // ── 3. 间隙填补 ─────────────────────────────────────

    fn fill_gaps(&self, query: &[u8], slots: &mut [Option<SegmentResult>]) -> Result<(), Failure> {
        retry_shifted(slots, |slots| self.align_gaps(query, slots))
    }

    fn align_gaps(&self, query: &[u8], slots: &mut [Option<SegmentResult>]) -> Result<GapPass, Failure> {
        let mut cur = 0;
        let mut left = None;
        for idx in 0..slots.len() {
            let Some(qs) = slots[idx].as_ref().map(|s| s.query_start) else { continue };
            if cur > qs {
                return Err(Failure::at(FailureKind::InterestingQueryOverlap, self.key(idx)));
            }
            if cur < qs {
                if let GapPass::Retry(f) = self.align_gap(query, slots, cur..qs, left, Some(idx))? {
                    return Ok(GapPass::Retry(f));
                }
            }
            cur = slots[idx].as_ref().map_or(cur, |s| s.query_end);
            left = Some(idx);
        }
        if cur < query.len() {
            if let GapPass::Retry(f) = self.align_gap(query, slots, cur..query.len(), left, None)? {
                return Ok(GapPass::Retry(f));
            }
        }
        Ok(GapPass::Complete)
    }

    /// 未匹配段的所有合法取值范围
    fn possible_ranges(&self, idx: usize) -> Vec<EdgeRange> {
        let segd = &self.descriptor[idx];
        if segd.wildcard {
            return (segd.min_length..=segd.max_length)
                .map(|len| EdgeRange { segment: idx, start: 0, end: len, text: vec![b'?'; len] })
                .collect();
        }
        let chars = segd.chars();
        let mut out = Vec::new();
        for start in 0..=segd.max_start.min(chars.len()) {
            for end in segd.min_end.max(start)..=chars.len() {
                let len = end - start;
                if len >= segd.min_length && len <= segd.max_length {
                    out.push(EdgeRange { segment: idx, start, end, text: chars[start..end].to_vec() });
                }
            }
        }
        out
    }

    //  | ..left.. | |m0| |m1| | ..right.. |
    fn align_gap(
        &self,
        query: &[u8],
        slots: &mut [Option<SegmentResult>],
        gap: Range<usize>,
        left: Option<usize>,
        right: Option<usize>,
    ) -> Result<GapPass, Failure> {
        let first_middle = left.map_or(0, |l| l + 1);
        let middle_end = right.unwrap_or(slots.len());
        let participants: Vec<usize> = left.into_iter().chain(first_middle..middle_end).chain(right).collect();
        let keys = || participants.iter().map(|&i| self.key(i)).join(":");

        let mut choices: Vec<Vec<EdgeRange>> = Vec::with_capacity(participants.len());
        for &i in &participants {
            let segd = &self.descriptor[i];
            let ranges = match slots[i].as_ref() {
                Some(sr) if Some(i) == right => sr.left_edge_ranges(segd),
                Some(sr) => sr.right_edge_ranges(segd),
                None => self.possible_ranges(i),
            };
            if !ranges.is_empty() {
                choices.push(ranges);
            }
        }

        let total = choices.iter().fold(1usize, |n, c| n.saturating_mul(c.len()));
        if total > MAX_GAP_CANDIDATES {
            log::debug!("gap {:?}: {} candidate layouts for {}, not aligning", gap, total, keys());
            return Err(Failure::at(FailureKind::GapAlignment, keys()));
        }

        let query_text = &query[gap.clone()];
        let mut best: Option<(Vec<&EdgeRange>, AffineAlignment)> = None;
        for combo in candidate_texts(&choices) {
            let text: Vec<u8> = combo.iter().flat_map(|r| r.text.iter().copied()).collect();
            let a = align_anchored(query_text, &text, &self.params);
            if best.as_ref().map_or(true, |(_, b)| a.score > b.score) {
                best = Some((combo, a));
            }
        }
        let Some((ranges, mut a)) = best else {
            return Err(Failure::at(FailureKind::GapAlignment, keys()));
        };
        if !a.covers_both() {
            log::trace!("gap {:?} not covered edge to edge", gap);
            return Err(Failure::at(FailureKind::GapAlignment, keys()));
        }
        let size_failure = if a.indels_delta() < 0 { FailureKind::GapTooSmall } else { FailureKind::GapTooBig };

        let mut cur = gap.start as isize;
        for rng in ranges {
            if rng.is_empty() {
                continue;
            }
            let i = rng.segment;
            let segd = &self.descriptor[i];
            if slots[i].is_none() && segd.wildcard && a.indels.values().any(|x| x.error_index < rng.len() as isize) {
                let failure = Failure::at(size_failure, &segd.key);
                let next_shiftable = self.meta.get(i + 1).is_some_and(|m| m.shiftable);
                if next_shiftable && self.shift_as_necessary(query, slots) {
                    log::trace!("re-aligning gaps after shifting past {}", segd.key);
                    return Ok(GapPass::Retry(failure));
                }
                return Err(failure);
            }
            let sr = slots[i].get_or_insert_with(|| SegmentResult::new(i, cur as usize, rng.start));
            let delta = if Some(i) == right {
                sr.left_extend(rng, &mut a, gap.start)
            } else {
                sr.right_extend(rng, &mut a, gap.start, segd.wildcard)
            };
            cur += rng.len() as isize + delta;
        }

        // 剩下的 indel 落在最右边缘，交给右侧邻居
        if !a.indels.is_empty() {
            let Some(r) = right else {
                let last = participants.last().copied().unwrap_or_default();
                return Err(Failure::at(size_failure, self.key(last)));
            };
            if let Some(sr) = slots[r].as_mut() {
                let edge = EdgeRange { segment: r, start: sr.segment_start, end: sr.segment_start, text: Vec::new() };
                cur += sr.left_extend(&edge, &mut a, gap.start);
            }
            if !a.indels.is_empty() {
                return Err(Failure::at(size_failure, self.key(r)));
            }
        }
        if cur != gap.end as isize {
            log::warn!("gap {:?} filled up to {}, please check descriptor {}", gap, cur, keys());
            return Err(Failure::at(FailureKind::Validation, keys()));
        }
        Ok(GapPass::Complete)
    }

    // ── 4. 边缘 indel ───────────────────────────────────

    fn check_edge_indels(&self, slots: &[Option<SegmentResult>]) -> Result<(), Failure> {
        for sr in slots.iter().flatten() {
            if sr.indels.is_empty() {
                continue;
            }
            let segd = &self.descriptor[sr.segment];
            if segd.wildcard {
                return Err(Failure::at(FailureKind::WildcardIndel, &segd.key));
            }
            let len = sr.length() as isize;
            // 落在段边界上的 indel 无法判断属于哪一段
            if sr.indels.iter().any(|i| i.error_index == 0 || i.error_index + i.extent() as isize >= len) {
                return Err(Failure::at(FailureKind::EdgeIndel, &segd.key));
            }
        }
        Ok(())
    }

    // ── 5. 逐段校验 ─────────────────────────────────────

    fn check_requirements(&self, slots: &[Option<SegmentResult>]) -> Result<(), Failure> {
        for (segd, slot) in self.descriptor.segments().iter().zip(slots) {
            let Some(sr) = slot else {
                if segd.min_length > 0 {
                    return Err(Failure::at(FailureKind::MinSegmentLength, &segd.key));
                }
                continue;
            };
            let kind = if sr.segment_start > segd.max_start {
                FailureKind::MaxStart
            } else if sr.segment_end() < segd.min_end {
                FailureKind::MinEnd
            } else if sr.error_count() > segd.max_allowed_errors {
                FailureKind::MatchErrors
            } else if sr.length() < segd.min_length {
                FailureKind::MinSegmentLength
            } else if sr.length() > segd.max_length {
                FailureKind::MaxSegmentLength
            } else {
                continue;
            };
            return Err(Failure::at(kind, &segd.key));
        }
        Ok(())
    }

    /// 成功的段必须首尾相接地覆盖整条 query；无错误的段必须与段序列一致
    fn validate(&self, query: &[u8], segments: &[SegmentResult]) -> Result<(), Failure> {
        let mut cur = 0;
        for sr in segments {
            if sr.query_start != cur || sr.query_end < sr.query_start {
                return Err(Failure::at(FailureKind::Validation, self.key(sr.segment)));
            }
            cur = sr.query_end;
            let segd = &self.descriptor[sr.segment];
            if segd.wildcard || sr.has_errors() {
                continue;
            }
            let expected = segd.chars().get(sr.segment_start..sr.segment_end()).unwrap_or(&[]);
            let found = query.get(sr.query_start..sr.query_end).unwrap_or(&[]);
            if expected != found && !expected.contains(&b'N') && !found.contains(&b'N') {
                log::warn!(
                    "segment {} matched without errors but {:?} != {:?}",
                    segd.key,
                    String::from_utf8_lossy(found),
                    String::from_utf8_lossy(expected),
                );
                return Err(Failure::new(FailureKind::Validation));
            }
        }
        if cur != query.len() {
            return Err(Failure::new(FailureKind::Validation));
        }
        Ok(())
    }
}

/// 平移后重跑 `pass`，直到完成、轮数用尽或段布局重复；放弃时报告最后一次的失败
fn retry_shifted(
    slots: &mut [Option<SegmentResult>],
    mut pass: impl FnMut(&mut [Option<SegmentResult>]) -> Result<GapPass, Failure>,
) -> Result<(), Failure> {
    let mut visited = HashSet::new();
    let mut rounds = 0;
    loop {
        match pass(slots)? {
            GapPass::Complete => return Ok(()),
            GapPass::Retry(failure) => {
                rounds += 1;
                let layout: Vec<Option<(usize, usize, usize)>> =
                    slots.iter().map(|s| s.as_ref().map(|s| (s.query_start, s.query_end, s.segment_start))).collect();
                if rounds >= MAX_SHIFT_ROUNDS || !visited.insert(layout) {
                    log::debug!("giving up on constant shifting after {} rounds", rounds);
                    return Err(failure);
                }
            }
        }
    }
}

/// 所有候选组合；第一个段的取值变化最快
fn candidate_texts(choices: &[Vec<EdgeRange>]) -> Vec<Vec<&EdgeRange>> {
    if choices.is_empty() {
        return vec![Vec::new()];
    }
    choices
        .iter()
        .rev()
        .map(|c| c.iter())
        .multi_cartesian_product()
        .map(|mut combo| {
            combo.reverse();
            combo
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &[u8] = b"GGATGCCTGGCGGCCGTAGCGCGGTGGTCC";
    const LINKER: &[u8] = b"CTGACTCGGGCACCAAGGAC";
    const HANDLE: &[u8] = b"TCGTATGCCG";

    fn pseudo_random(len: usize) -> Vec<u8> {
        let bases = [b'A', b'C', b'G', b'T'];
        let mut x: u32 = 7;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                bases[(x >> 16) as usize % 4]
            })
            .collect()
    }

    fn shape_descriptor() -> SequenceDescriptor {
        let mut target = SegmentDescriptor::fixed("target", TARGET, false).with_errors(3);
        target.min_length = 8;
        target.min_end = TARGET.len();
        SequenceDescriptor::new(vec![
            SegmentDescriptor::wildcard("mask", 4, 4),
            target,
            SegmentDescriptor::fixed("linker", LINKER, true).with_errors(1),
        ])
        .unwrap()
    }

    fn read(parts: &[&[u8]]) -> Sequence {
        Sequence::new("q", parts.concat())
    }

    fn spans(res: &SequenceResult) -> Vec<(usize, usize, usize)> {
        res.segments.iter().map(|s| (s.query_start, s.query_end, s.segment_start)).collect()
    }

    #[test]
    fn clean_parse_tiles_query() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let res = m.process(&read(&[b"AGGT", &TARGET[10..], LINKER]));
        assert!(res.success, "{:?}", res.failure);
        assert_eq!(spans(&res), vec![(0, 4, 0), (4, 24, 10), (24, 44, 0)]);
        assert_eq!(res.error_count(), 0);
        assert_eq!(res.subsequence(&read(&[b"AGGT", &TARGET[10..], LINKER]).characters, 0), Some(&b"AGGT"[..]));
    }

    #[test]
    fn mismatch_inside_target() {
        let mut t = TARGET[10..].to_vec();
        t[10] = b'A';
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let res = m.process(&read(&[b"AGGT", &t, LINKER]));
        assert!(res.success, "{:?}", res.failure);
        let target = res.segment(1).unwrap();
        assert_eq!((target.query_start, target.query_end, target.segment_start), (4, 24, 10));
        assert_eq!(target.errors, vec![10]);
        assert!(target.indels.is_empty());
    }

    #[test]
    fn insertion_inside_target() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let res = m.process(&read(&[b"AGGT", &TARGET[10..20], b"T", &TARGET[20..], LINKER]));
        assert!(res.success, "{:?}", res.failure);
        let target = res.segment(1).unwrap();
        assert_eq!((target.query_start, target.query_end), (4, 25));
        assert_eq!(target.length(), 20);
        assert_eq!(target.indels.len(), 1);
        let ins = &target.indels[0];
        assert!(ins.insert);
        assert_eq!(ins.seq, b"T".to_vec());
        assert_eq!((ins.src_index, ins.error_index), (14, 10));
        assert!(res.has_indels());
    }

    #[test]
    fn missing_required_segment() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let res = m.process(&read(&[b"AGGT", &TARGET[10..]]));
        assert!(!res.success);
        assert_eq!(res.failure, Some(Failure::at(FailureKind::NoMatch, "linker")));
    }

    #[test]
    fn wrong_mask_length_fails() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let res = m.process(&read(&[b"AG", &TARGET[10..], LINKER]));
        assert!(!res.success);
        let failure = res.failure.unwrap();
        assert_eq!(failure.segment.as_deref(), Some("mask"));
    }

    #[test]
    fn wildcard_fills_middle_gap() {
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::fixed("handle", b"TCGTATGCCG", true),
            SegmentDescriptor::wildcard("umi", 3, 6),
            SegmentDescriptor::fixed("linker", LINKER, true),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        let res = m.process(&read(&[b"TCGTATGCCG", b"ACATA", LINKER]));
        assert!(res.success, "{:?}", res.failure);
        assert_eq!(spans(&res), vec![(0, 10, 0), (10, 15, 0), (15, 35, 0)]);
        assert!(res.segment(1).unwrap().errors.is_empty());
    }

    #[test]
    fn constant_segment_shifts_right() {
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::wildcard("mask", 4, 4),
            SegmentDescriptor::fixed("polyA", b"AAAAAA", true),
            SegmentDescriptor::wildcard("umi", 2, 2),
            SegmentDescriptor::fixed("linker", LINKER, true),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        let res = m.process(&read(&[b"GTAA", b"AAAAAA", b"CG", LINKER]));
        assert!(res.success, "{:?}", res.failure);
        assert_eq!(spans(&res), vec![(0, 4, 0), (4, 10, 0), (10, 12, 0), (12, 32, 0)]);
    }

    #[test]
    fn constant_segment_must_be_exact() {
        let d = SequenceDescriptor::new(vec![SegmentDescriptor::fixed("polyA", b"AAAAAA", true).with_errors(1)]).unwrap();
        assert!(SegmentMatcher::new(d).is_err());
    }

    fn handle_umi_descriptor() -> SequenceDescriptor {
        SequenceDescriptor::new(vec![
            SegmentDescriptor::fixed("handle", HANDLE, true),
            SegmentDescriptor::wildcard("umi", 3, 3),
        ])
        .unwrap()
    }

    fn failure_of(m: &SegmentMatcher, parts: &[&[u8]]) -> Option<Failure> {
        let res = m.process(&read(parts));
        assert!(!res.success);
        res.failure
    }

    fn placed(segment: usize, query_start: usize, query_end: usize, segment_start: usize) -> SegmentResult {
        let mut sr = SegmentResult::new(segment, query_start, segment_start);
        sr.query_end = query_end;
        sr
    }

    #[test]
    fn mask_gap_needing_a_deletion_is_too_small() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        assert_eq!(failure_of(&m, &[b"CA", &TARGET[10..], LINKER]), Some(Failure::at(FailureKind::GapTooSmall, "mask")));
    }

    #[test]
    fn trailing_wildcard_size_failures() {
        let m = SegmentMatcher::new(handle_umi_descriptor()).unwrap();
        assert_eq!(failure_of(&m, &[HANDLE, b"AC"]), Some(Failure::at(FailureKind::GapTooSmall, "umi")));
        assert_eq!(failure_of(&m, &[HANDLE, b"ACATAG"]), Some(Failure::at(FailureKind::GapTooBig, "umi")));
        assert!(m.process(&read(&[HANDLE, b"ACA"])).success);
    }

    #[test]
    fn insertion_at_segment_boundary_is_edge_indel() {
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::fixed("handle", HANDLE, true),
            SegmentDescriptor::fixed("linker", LINKER, true),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[HANDLE, b"TTTT", LINKER]), Some(Failure::at(FailureKind::EdgeIndel, "linker")));
    }

    #[test]
    fn edge_and_wildcard_indels() {
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::fixed("handle", HANDLE, true),
            SegmentDescriptor::wildcard("umi", 3, 3),
            SegmentDescriptor::fixed("linker", LINKER, true).with_errors(1),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();

        let mut linker = placed(2, 13, 32, 0);
        linker.indels.push(Indel::deletion(b"G", 23, 10));
        linker.indels_delta = -1;
        let mut slots = vec![Some(placed(0, 0, 10, 0)), Some(placed(1, 10, 13, 0)), Some(linker.clone())];
        assert_eq!(m.check_edge_indels(&slots), Ok(()));

        linker.indels = vec![Indel::deletion(b"C", 32, 19)];
        slots[2] = Some(linker);
        assert_eq!(m.check_edge_indels(&slots), Err(Failure::at(FailureKind::EdgeIndel, "linker")));

        let mut umi = placed(1, 10, 14, 0);
        umi.indels.push(Indel::insertion(b"T", 11, 1));
        umi.indels_delta = 1;
        slots[1] = Some(umi);
        assert_eq!(m.check_edge_indels(&slots), Err(Failure::at(FailureKind::WildcardIndel, "umi")));
    }

    #[test]
    fn too_many_gap_layouts_fail_alignment() {
        let mut insert = SegmentDescriptor::fixed("insert", &pseudo_random(300), false);
        insert.indexed = false;
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::wildcard("mask", 4, 4),
            SegmentDescriptor::fixed("target", TARGET, true),
            insert.clone(),
            SegmentDescriptor::fixed("linker", LINKER, true),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert!(m.possible_ranges(2).len() > MAX_GAP_CANDIDATES);
        let chars = insert.chars();
        assert_eq!(
            failure_of(&m, &[b"AGGT", TARGET, &chars[10..70], LINKER]),
            Some(Failure::at(FailureKind::GapAlignment, "target:insert:linker"))
        );
    }

    #[test]
    fn segments_found_out_of_order() {
        let d = SequenceDescriptor::new(vec![
            SegmentDescriptor::fixed("handle", HANDLE, true),
            SegmentDescriptor::fixed("linker", LINKER, true),
        ])
        .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[LINKER, HANDLE]), Some(Failure::at(FailureKind::OutOfOrder, "linker")));
    }

    #[test]
    fn short_hit_on_long_segment() {
        let long = b"GGCTTTGTAGCTAACTCTCGGGTTTGTCGAACGGTTGCCAAACTTGCTGGCAATGGGTCCTTTG";
        let d = SequenceDescriptor::new(vec![SegmentDescriptor::fixed("long", long, true)]).unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[&long[20..26]]), Some(Failure::at(FailureKind::ShortMatch, "long")));
    }

    #[test]
    fn overlapping_neighbors_fail() {
        // b 的前 4 个碱基与 a 的后 4 个碱基相同
        let a = b"ACTTGCAGGTCA";
        let b = b"GTCAGTTACCGAATGC";
        let d = SequenceDescriptor::new(vec![SegmentDescriptor::fixed("a", a, true), SegmentDescriptor::fixed("b", b, true)])
            .unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[a, &b[4..]]), Some(Failure::at(FailureKind::InterestingQueryOverlap, "b")));
    }

    #[test]
    fn start_and_end_limits() {
        let mut target = SegmentDescriptor::fixed("target", TARGET, false);
        target.max_start = 5;
        let d = SequenceDescriptor::new(vec![target, SegmentDescriptor::fixed("linker", LINKER, true)]).unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[&TARGET[10..], LINKER]), Some(Failure::at(FailureKind::MaxStart, "target")));

        let mut target = SegmentDescriptor::fixed("target", TARGET, false);
        target.min_end = TARGET.len();
        let d = SequenceDescriptor::new(vec![target, SegmentDescriptor::fixed("linker", LINKER, true)]).unwrap();
        let m = SegmentMatcher::new(d).unwrap();
        assert_eq!(failure_of(&m, &[&TARGET[..20], LINKER]), Some(Failure::at(FailureKind::MinEnd, "target")));
        assert!(m.process(&read(&[TARGET, LINKER])).success);
    }

    #[test]
    fn shift_retries_stop() {
        let gave_up = Failure::at(FailureKind::GapTooSmall, "mask");

        // 每轮都换一个新布局：跑满轮数
        let mut slots = vec![Some(placed(0, 0, 4, 0))];
        let mut passes = 0;
        let res = retry_shifted(&mut slots, |slots| {
            passes += 1;
            if let Some(sr) = slots[0].as_mut() {
                sr.shift_right(1);
            }
            Ok(GapPass::Retry(gave_up.clone()))
        });
        assert_eq!(res, Err(gave_up.clone()));
        assert_eq!(passes, MAX_SHIFT_ROUNDS);

        // 布局不变：第二轮就放弃
        let mut passes = 0;
        let res = retry_shifted(&mut slots, |_| {
            passes += 1;
            Ok(GapPass::Retry(gave_up.clone()))
        });
        assert_eq!(res, Err(gave_up.clone()));
        assert_eq!(passes, 2);

        let mut passes = 0;
        let res = retry_shifted(&mut slots, |_| {
            passes += 1;
            Ok(if passes == 1 { GapPass::Retry(gave_up.clone()) } else { GapPass::Complete })
        });
        assert_eq!(res, Ok(()));
        assert_eq!(passes, 2);
    }

    #[test]
    fn error_free_segment_must_match_its_text() {
        let m = SegmentMatcher::new(shape_descriptor()).unwrap();
        let segments = vec![placed(0, 0, 4, 0), placed(1, 4, 24, 10), placed(2, 24, 44, 0)];
        let clean = read(&[b"AGGT", &TARGET[10..], LINKER]).characters;
        assert_eq!(m.validate(&clean, &segments), Ok(()));

        let mut changed = clean.clone();
        changed[24 + 5] = b'A';
        assert_eq!(m.validate(&changed, &segments), Err(Failure::new(FailureKind::Validation)));
        changed[24 + 5] = b'N';
        assert_eq!(m.validate(&changed, &segments), Ok(()));

        assert_eq!(m.validate(&clean, &segments[..2]), Err(Failure::new(FailureKind::Validation)));
    }
}
