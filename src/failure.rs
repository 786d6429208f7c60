use serde::{Deserialize, Serialize};

/// 单个读段对处理失败的原因（封闭集合）。
///
/// 这些都是预期内的业务结果，挂在 `Fragment` / `SequenceResult` 上返回；
/// 内部不变量被破坏属于程序缺陷，直接 panic，不会出现在这里。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, thiserror::Error)]
pub enum FailureKind {
    // fragment
    #[error("failed to create fragment")]
    Fragment,
    #[error("fragment overlap has indels")]
    IndelsInFragment,
    #[error("no overlap")]
    NoOverlap,
    #[error("one of R1/R2 is contained in the other")]
    Contained,
    #[error("overlap alignment failed")]
    OverlapErrors,
    #[error("indeterminate sequence")]
    Indeterminate,

    // segment
    #[error("no match")]
    NoMatch,
    #[error("match errors failure")]
    MatchErrors,
    #[error("segment below minimum length")]
    MinSegmentLength,
    #[error("segment above maximum length")]
    MaxSegmentLength,
    #[error("gap too big to fill")]
    GapTooBig,
    #[error("gap too small to fill")]
    GapTooSmall,
    #[error("validation failure")]
    Validation,
    #[error("segments found out-of-order")]
    OutOfOrder,
    #[error("could not align a gap between two segments")]
    GapAlignment,
    #[error("match was too short to extend")]
    ShortMatch,
    #[error("segment could not be aligned to right edge")]
    MinEnd,
    #[error("segment could not be aligned to left edge")]
    MaxStart,
    #[error("ambiguous indel on the edge of a segment")]
    EdgeIndel,
    #[error("invalid indel on a wildcard segment")]
    WildcardIndel,
    #[error("aligned segments overlap")]
    InterestingQueryOverlap,

    // classification
    #[error("no target matched")]
    Target,
    #[error("no mask matched")]
    Mask,
}

impl FailureKind {
    /// 稳定的短名称，用于输出表格与计数器
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::IndelsInFragment => "indelsInFragment",
            Self::NoOverlap => "noOverlap",
            Self::Contained => "contained",
            Self::OverlapErrors => "overlapErrors",
            Self::Indeterminate => "indeterminate",
            Self::NoMatch => "nomatch",
            Self::MatchErrors => "matchErrors",
            Self::MinSegmentLength => "minSegmentLength",
            Self::MaxSegmentLength => "maxSegmentLength",
            Self::GapTooBig => "gapTooBig",
            Self::GapTooSmall => "gapTooSmall",
            Self::Validation => "validation",
            Self::OutOfOrder => "outOfOrder",
            Self::GapAlignment => "gapAlignment",
            Self::ShortMatch => "shortMatch",
            Self::MinEnd => "minEnd",
            Self::MaxStart => "maxStart",
            Self::EdgeIndel => "edgeIndel",
            Self::WildcardIndel => "wildcardIndel",
            Self::InterestingQueryOverlap => "interestingQueryOverlap",
            Self::Target => "target",
            Self::Mask => "mask",
        }
    }

    /// 读段对层面（片段组装阶段）的失败
    pub fn is_fragment_level(&self) -> bool {
        matches!(
            self,
            Self::Fragment
                | Self::IndelsInFragment
                | Self::NoOverlap
                | Self::Contained
                | Self::OverlapErrors
                | Self::Indeterminate
        )
    }
}

/// 带出错片段键的失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({})", .segment.as_deref().unwrap_or("-"))]
pub struct Failure {
    pub kind: FailureKind,
    pub segment: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Self { kind, segment: None }
    }

    pub fn at(kind: FailureKind, segment: impl Into<String>) -> Self {
        Self { kind, segment: Some(segment.into()) }
    }
}
