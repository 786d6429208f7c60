//! 按描述符把片段拆分成有序的段（句柄、靶序列、接头、UMI 等）。

pub mod descriptor;
pub mod matcher;
pub mod result;

pub use descriptor::{DescriptorError, SegmentDescriptor, SegmentSpec, SequenceDescriptor};
pub use matcher::SegmentMatcher;
pub use result::{EdgeRange, SegmentResult, SequenceResult};
