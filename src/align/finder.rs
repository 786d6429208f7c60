use std::cmp::Reverse;

use anyhow::Result;

use crate::index::kmer::{longest_exact_match, KmerIndex};

pub const DEFAULT_FINDER_WORD_SIZE: usize = 6;

/// 单个区间内候选片段超过这个数就放弃该区间
const MAX_GAP_CANDIDATES: usize = 24;

/// 一段连续的精确匹配
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedSegment {
    pub query_index: usize,
    pub target_index: usize,
    pub length: usize,
}

impl AlignedSegment {
    #[inline]
    pub fn query_end(&self) -> usize {
        self.query_index + self.length
    }

    #[inline]
    pub fn target_end(&self) -> usize {
        self.target_index + self.length
    }
}

/// query 与参考序列上一对对应的未覆盖区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub query_start: usize,
    pub query_end: usize,
    pub target_start: usize,
    pub target_end: usize,
}

impl Gap {
    pub fn query_len(&self) -> usize {
        self.query_end - self.query_start
    }

    pub fn target_len(&self) -> usize {
        self.target_end - self.target_start
    }
}

/// 按 query 位置排序、互不重叠的片段集合；分数为 Σ length²
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alignment {
    pub segments: Vec<AlignedSegment>,
    pub score: usize,
}

impl Alignment {
    fn from_segments(mut segments: Vec<AlignedSegment>) -> Self {
        segments.sort_by_key(|s| s.query_index);
        let score = segments.iter().map(|s| s.length * s.length).sum();
        Self { segments, score }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 相邻片段之间的内部区间
    pub fn gaps(&self) -> Vec<Gap> {
        self.segments
            .windows(2)
            .map(|w| Gap {
                query_start: w[0].query_end(),
                query_end: w[1].query_index,
                target_start: w[0].target_end(),
                target_end: w[1].target_index,
            })
            .collect()
    }

    pub fn query_start(&self) -> usize {
        self.segments.first().map_or(0, |s| s.query_index)
    }

    pub fn query_end(&self) -> usize {
        self.segments.last().map_or(0, AlignedSegment::query_end)
    }

    pub fn target_start(&self) -> usize {
        self.segments.first().map_or(0, |s| s.target_index)
    }

    pub fn target_end(&self) -> usize {
        self.segments.last().map_or(0, AlignedSegment::target_end)
    }

    pub fn query_length(&self) -> usize {
        self.query_end() - self.query_start()
    }

    pub fn target_length(&self) -> usize {
        self.target_end() - self.target_start()
    }

    /// 所有片段长度之和
    pub fn match_size(&self) -> usize {
        self.segments.iter().map(|s| s.length).sum()
    }
}

/// 在固定参考序列上，把若干精确命中拼成一个打分最高的多片段比对。
/// 贪心的最优优先搜索，不保证全局最优。
#[derive(Debug, Clone)]
pub struct AlignmentFinder {
    index: KmerIndex,
    min_segment_length: usize,
}

impl AlignmentFinder {
    /// `min_segment_length` 为 None 时取单词长度
    pub fn new(reference: &[u8], word_size: usize, min_segment_length: Option<usize>) -> Result<Self> {
        let index = KmerIndex::build(reference, word_size)?;
        let min_segment_length = min_segment_length.unwrap_or(index.word_length()).max(1);
        Ok(Self { index, min_segment_length })
    }

    pub fn reference(&self) -> &[u8] {
        self.index.characters()
    }

    pub fn min_segment_length(&self) -> usize {
        self.min_segment_length
    }

    pub fn align(&self, query: &[u8]) -> Option<Alignment> {
        let mut best: Option<Alignment> = None;
        // 栈顶是下一个要展开的候选（等价于把新候选插到工作表最前面）
        let mut stack = vec![Alignment::default()];
        while let Some(candidate) = stack.pop() {
            let children = self.next_alignments(query, &candidate);
            if !candidate.is_empty() && best.as_ref().map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
            stack.extend(children.into_iter().rev());
        }
        best
    }

    fn next_alignments(&self, query: &[u8], so_far: &Alignment) -> Vec<Alignment> {
        let mut segs: Vec<AlignedSegment> = Vec::new();
        for gap in self.find_gaps(query, so_far) {
            segs.extend(self.segments_in_gap(query, &gap));
        }
        segs.sort_by_key(|s| Reverse(s.length));
        segs.into_iter()
            .map(|seg| {
                let mut all = so_far.segments.clone();
                all.push(seg);
                Alignment::from_segments(all)
            })
            .collect()
    }

    /// 包括首尾在内的所有区间，两侧都至少能放下一个最短片段
    fn find_gaps(&self, query: &[u8], a: &Alignment) -> Vec<Gap> {
        let mut gaps = Vec::with_capacity(a.segments.len() + 1);
        let mut cur_query = 0;
        let mut cur_target = 0;
        for s in &a.segments {
            gaps.push(Gap { query_start: cur_query, query_end: s.query_index, target_start: cur_target, target_end: s.target_index });
            cur_query = s.query_end();
            cur_target = s.target_end();
        }
        gaps.push(Gap {
            query_start: cur_query,
            query_end: query.len(),
            target_start: cur_target,
            target_end: self.index.len(),
        });
        let min = self.min_segment_length;
        gaps.retain(|g| g.query_len() >= min && g.target_len() >= min);
        gaps
    }

    fn segments_in_gap(&self, query: &[u8], gap: &Gap) -> Vec<AlignedSegment> {
        let ws = self.index.word_length();
        let min_len = self.min_segment_length as isize;
        let check_every = self.min_segment_length.saturating_sub(ws).max(1);
        let mut sites: Vec<usize> = (gap.query_start..gap.query_end).step_by(check_every).collect();
        if let Some(last) = gap.query_end.checked_sub(check_every) {
            if last >= gap.query_start && sites.last() != Some(&last) {
                sites.push(last);
            }
        }

        let reference = self.index.characters();
        let mut candidates: Vec<AlignedSegment> = Vec::new();
        let contained = |cands: &[AlignedSegment], q: usize, t: usize, len: usize| {
            cands.iter().any(|c| {
                q >= c.query_index && q + len <= c.query_end() && t >= c.target_index && t + len <= c.target_end()
            })
        };

        for site in sites {
            if site + ws > query.len() {
                continue;
            }
            for &seg_index in self.index.hits(&query[site..site + ws]) {
                if seg_index < gap.target_start || seg_index + ws > gap.target_end {
                    continue;
                }
                if contained(&candidates, site, seg_index, ws) {
                    continue;
                }
                let (left, right) = longest_exact_match(query, (site, ws), reference, (seg_index, ws));
                // 延伸不能越出当前区间
                let left = left.min(site - gap.query_start).min(seg_index - gap.target_start) as isize;
                let right = (right as isize)
                    .min(gap.query_end as isize - (site + ws) as isize)
                    .min((gap.target_end - (seg_index + ws)) as isize);
                let match_len = left + right + ws as isize;
                if match_len < min_len {
                    continue;
                }
                let q = (site as isize - left) as usize;
                let t = (seg_index as isize - left) as usize;
                let len = match_len as usize;
                if contained(&candidates, q, t, len) {
                    continue;
                }
                debug_assert!(q >= gap.query_start && q + len <= gap.query_end);
                debug_assert!(t >= gap.target_start && t + len <= gap.target_end);
                candidates.push(AlignedSegment { query_index: q, target_index: t, length: len });
                if candidates.len() > MAX_GAP_CANDIDATES {
                    log::trace!("gap {:?} has too many candidates, abandoning", gap);
                    return Vec::new();
                }
            }
        }
        candidates
    }
}
