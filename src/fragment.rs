use serde::{Deserialize, Serialize};

use crate::align::finder::{Alignment, AlignmentFinder, Gap, DEFAULT_FINDER_WORD_SIZE};
use crate::failure::FailureKind;
use crate::sequence::{pair_base_id, Sequence};
use crate::util::dna;

/// 找到的重叠比对分数超过该值时，不再把失败解释为"两端不重叠"
const OVERLAP_FAILURE_SCORE_THRESHOLD: usize = 64;
/// score / overlap² 超过该值时认为是真实 indel
const REAL_INDEL_SCORE_RATIO: f64 = 0.08;

const FAST_MIN_SEGMENT: usize = 10;
const SLOW_WORD_SIZE: usize = 5;
const SLOW_MIN_SEGMENT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentOptions {
    /// true 时 R1 是反向互补链（否则反向互补 R2）
    pub r1_is_rc: bool,
    pub max_allowed_errors: usize,
    pub max_resolved_errors: usize,
    /// 质量差不小于该值才算"由质量解决"
    pub quality_delta: u8,
    pub allow_indeterminate: bool,
    pub allow_contained: bool,
    pub allow_non_overlapping: bool,
    pub allow_reverse_order: bool,
}

impl Default for FragmentOptions {
    fn default() -> Self {
        Self {
            r1_is_rc: false,
            max_allowed_errors: 3,
            max_resolved_errors: 10,
            quality_delta: 10,
            allow_indeterminate: false,
            allow_contained: false,
            allow_non_overlapping: true,
            allow_reverse_order: true,
        }
    }
}

/// 找重叠时命中的路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPath {
    Fast,
    Slow,
    #[default]
    None,
}

/// 各条重叠路径的命中次数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentStats {
    pub fast: u64,
    pub slow: u64,
    pub none: u64,
}

impl FragmentStats {
    pub fn record(&mut self, path: OverlapPath) {
        match path {
            OverlapPath::Fast => self.fast += 1,
            OverlapPath::Slow => self.slow += 1,
            OverlapPath::None => self.none += 1,
        }
    }

    pub fn merge(&mut self, other: &FragmentStats) {
        self.fast += other.fast;
        self.slow += other.slow;
        self.none += other.none;
    }
}

/// 两个 mate 合并后的片段
#[derive(Debug, Clone)]
pub struct Fragment {
    pub seq: Sequence,
    pub r1: Sequence,
    pub r2: Sequence,
    pub overlap: usize,
    pub reverse_order: bool,
    pub contained: bool,
    /// 未能由质量解决的差异位置（重叠区内坐标）
    pub errors: Vec<usize>,
    /// 由质量解决的差异位置
    pub quality_resolved: Vec<usize>,
    pub alignment_score: Option<usize>,
    pub path: OverlapPath,
    pub success: bool,
    pub failure: Option<FailureKind>,
}

impl Fragment {
    fn fail(&mut self, kind: FailureKind) {
        self.success = false;
        self.failure = Some(kind);
    }
}

/// 定向后的一对读段（left 在 5' 端）
struct Oriented {
    left: Vec<u8>,
    right: Vec<u8>,
    left_q: Option<Vec<u8>>,
    right_q: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct FragmentMaker {
    pub opts: FragmentOptions,
}

impl FragmentMaker {
    pub fn new(opts: FragmentOptions) -> Self {
        Self { opts }
    }

    pub fn make(&self, r1: &Sequence, r2: &Sequence) -> Fragment {
        let o = self.orient(r1, r2);
        let mut seq_chars = o.left.clone();
        seq_chars.extend_from_slice(&o.right);
        let mut frag = Fragment {
            seq: Sequence::new(format!("{}/F", pair_base_id(&r1.id)), seq_chars),
            r1: r1.clone(),
            r2: r2.clone(),
            overlap: 0,
            reverse_order: false,
            contained: false,
            errors: Vec::new(),
            quality_resolved: Vec::new(),
            alignment_score: None,
            path: OverlapPath::None,
            success: false,
            failure: None,
        };

        let alignment = self.make_overlapped(&mut frag, &o);

        if !frag.success {
            if !self.opts.allow_non_overlapping {
                return frag;
            }
            if let Some(al) = &alignment {
                if al.score > OVERLAP_FAILURE_SCORE_THRESHOLD && frag.failure != Some(FailureKind::IndelsInFragment) {
                    log::trace!("{}: overlap score {} is a true failure", frag.seq.id, al.score);
                    return frag;
                }
            }
            // 视为两端不重叠，除非看起来是真实 indel
            frag.errors.clear();
            frag.quality_resolved.clear();
            let real_indel = match &alignment {
                Some(al) if frag.failure == Some(FailureKind::IndelsInFragment) && frag.overlap > 0 => {
                    let ratio = al.score as f64 / (frag.overlap * frag.overlap) as f64;
                    log::trace!("{}: indel check ratio {:.4}", frag.seq.id, ratio);
                    ratio > REAL_INDEL_SCORE_RATIO
                }
                _ => false,
            };
            if real_indel {
                frag.success = false;
                frag.overlap = frag.overlap.min(o.left.len()).min(o.right.len());
            } else {
                frag.overlap = 0;
                frag.success = true;
                frag.failure = None;
            }
            frag.seq.characters = if frag.reverse_order {
                splice(&o.right, &o.left, frag.overlap)
            } else {
                splice(&o.left, &o.right, frag.overlap)
            };
        }

        if !self.opts.allow_indeterminate && frag.seq.characters.contains(&b'N') {
            frag.fail(FailureKind::Indeterminate);
        }

        if frag.success {
            assert_eq!(
                frag.seq.len(),
                r1.len() + r2.len() - frag.overlap,
                "fragment length invariant broken for {}",
                frag.seq.id
            );
        }
        frag
    }

    fn orient(&self, r1: &Sequence, r2: &Sequence) -> Oriented {
        let rev_q = |q: &Option<Vec<u8>>| q.as_ref().map(|v| v.iter().rev().copied().collect::<Vec<u8>>());
        if self.opts.r1_is_rc {
            Oriented {
                left: dna::revcomp(&r1.characters),
                right: r2.characters.clone(),
                left_q: rev_q(&r1.quality),
                right_q: r2.quality.clone(),
            }
        } else {
            Oriented {
                left: r1.characters.clone(),
                right: dna::revcomp(&r2.characters),
                left_q: r1.quality.clone(),
                right_q: rev_q(&r2.quality),
            }
        }
    }

    fn find_overlap(&self, frag: &mut Fragment, left: &[u8], right: &[u8]) -> Option<Alignment> {
        let fast = AlignmentFinder::new(left, DEFAULT_FINDER_WORD_SIZE, Some(FAST_MIN_SEGMENT)).ok()?;
        if let Some(al) = fast.align(right) {
            frag.path = OverlapPath::Fast;
            return Some(al);
        }
        let slow = AlignmentFinder::new(left, SLOW_WORD_SIZE, Some(SLOW_MIN_SEGMENT)).ok()?;
        let al = slow.align(right)?;
        frag.path = OverlapPath::Slow;
        Some(al)
    }

    //  |       left            |
    //                | overlap |
    //                |            right      |
    //  |              fragment               |
    fn make_overlapped(&self, frag: &mut Fragment, o: &Oriented) -> Option<Alignment> {
        let (left, right) = (o.left.as_slice(), o.right.as_slice());
        let Some(al) = self.find_overlap(frag, left, right) else {
            log::trace!("{}: no overlap", frag.seq.id);
            frag.fail(FailureKind::NoOverlap);
            return None;
        };
        frag.alignment_score = Some(al.score);

        let overlap = al.target_length();
        let left_start = al.target_start();
        let right_start = al.query_start();
        frag.overlap = overlap;

        if overlap != al.query_length() {
            frag.fail(FailureKind::IndelsInFragment);
            frag.overlap = 0;
            if left_start > right_start {
                let od = right_start + (left.len() - left_start - overlap) + al.query_length().saturating_sub(overlap);
                if overlap + od <= left.len() {
                    frag.overlap = overlap + od;
                }
            }
            return Some(al);
        }

        if left_start > right_start {
            frag.overlap = right_start + left.len() - left_start;
            frag.seq.characters = splice(left, right, frag.overlap);
        } else if self.opts.allow_reverse_order && overlap > left_start + (right.len() - right_start - overlap) {
            log::trace!("{}: R1/R2 overlap in reverse order", frag.seq.id);
            frag.reverse_order = true;
            frag.overlap = left_start + right.len() - right_start;
            frag.seq.characters = splice(right, left, frag.overlap);
        } else {
            frag.fail(FailureKind::NoOverlap);
            return Some(al);
        }

        if frag.overlap >= left.len() || frag.overlap >= right.len() {
            frag.contained = true;
            if !self.opts.allow_contained {
                frag.fail(FailureKind::Contained);
                return Some(al);
            }
            if frag.overlap >= left.len() {
                frag.overlap = left.len();
                frag.seq.characters = right.to_vec();
            } else {
                frag.overlap = right.len();
                frag.seq.characters = left.to_vec();
            }
        }

        // 比对之外、但落在重叠区内的部分也要逐位比较
        let mut gaps = al.gaps();
        let tail;
        if left_start > right_start {
            if right_start > 0 {
                gaps.insert(
                    0,
                    Gap {
                        query_start: al.query_start() - right_start,
                        query_end: al.query_start(),
                        target_start: al.target_start() - right_start,
                        target_end: al.target_start(),
                    },
                );
            }
            tail = left.len() - left_start - overlap;
            if gaps.is_empty() && tail == 0 && left[left.len() - overlap..] != right[..overlap] {
                frag.fail(FailureKind::Indeterminate);
                return Some(al);
            }
        } else {
            if left_start > 0 {
                gaps.insert(
                    0,
                    Gap {
                        query_start: al.query_start() - left_start,
                        query_end: al.query_start(),
                        target_start: al.target_start() - left_start,
                        target_end: al.target_start(),
                    },
                );
            }
            tail = right.len() - right_start - overlap;
            if gaps.is_empty() && tail == 0 && right[right.len() - overlap..] != left[..overlap] {
                frag.fail(FailureKind::Indeterminate);
                return Some(al);
            }
        }
        if tail > 0 {
            gaps.push(Gap {
                query_start: al.query_end(),
                query_end: al.query_end() + tail,
                target_start: al.target_end(),
                target_end: al.target_end() + tail,
            });
        }

        if gaps.is_empty() {
            frag.success = true;
            frag.failure = None;
            return Some(al);
        }

        let overlap = frag.overlap;
        let (left_start, right_start) = if frag.reverse_order {
            (0, right.len() - overlap)
        } else {
            (left.len() - overlap, 0)
        };

        let mut errors = Vec::new();
        let error_ceiling = self.opts.max_allowed_errors + self.opts.max_resolved_errors;
        for gap in &gaps {
            if gap.query_len() != gap.target_len() {
                frag.fail(FailureKind::IndelsInFragment);
                return Some(al);
            }
            for i in 0..gap.query_len() {
                let (qi, si) = (gap.query_start + i, gap.target_start + i);
                if qi >= right.len() || si >= left.len() {
                    debug_assert!(frag.contained);
                    break;
                }
                if right[qi] != left[si] {
                    errors.push(gap.query_start.min(gap.target_start) + i);
                    if errors.len() > error_ceiling {
                        frag.errors = errors;
                        frag.fail(FailureKind::OverlapErrors);
                        return Some(al);
                    }
                }
            }
        }

        // 取质量更高的碱基
        let quality_at = |q: &Option<Vec<u8>>, idx: usize| -> u8 {
            q.as_ref().and_then(|v| v.get(idx)).map_or(0, |&c| dna::phred_to_quality(c))
        };
        let mut unresolved = Vec::new();
        let mut resolved = Vec::new();
        for e in errors {
            let (li, ri) = (left_start + e, right_start + e);
            let residx = if frag.reverse_order { ri } else { li };
            if li >= left.len() || ri >= right.len() || residx >= frag.seq.characters.len() {
                unresolved.push(e);
                continue;
            }
            let lq = quality_at(&o.left_q, li);
            let rq = quality_at(&o.right_q, ri);
            let (base, delta) = if lq > rq { (left[li], lq - rq) } else { (right[ri], rq - lq) };
            frag.seq.characters[residx] = base;
            if delta >= self.opts.quality_delta {
                resolved.push(e);
            } else {
                unresolved.push(e);
            }
        }
        log::trace!("{}: quality resolved {}/{} errors", frag.seq.id, resolved.len(), resolved.len() + unresolved.len());

        let failed = unresolved.len() > self.opts.max_allowed_errors || resolved.len() > self.opts.max_resolved_errors;
        frag.errors = unresolved;
        frag.quality_resolved = resolved;
        if failed {
            frag.fail(FailureKind::MatchErrors);
            return Some(al);
        }

        frag.success = true;
        frag.failure = None;
        Some(al)
    }
}

/// `first + second[overlap..]`
fn splice(first: &[u8], second: &[u8], overlap: usize) -> Vec<u8> {
    let mut out = first.to_vec();
    out.extend_from_slice(second.get(overlap..).unwrap_or(&[]));
    out
}
