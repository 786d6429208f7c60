pub mod affine;
pub mod finder;
pub mod indel;

pub use affine::{align, align_anchored, char_similarity, wildcard_similarity, AffineAlignment, AlignParams};
pub use finder::{AlignedSegment, Alignment, AlignmentFinder, Gap};
pub use indel::Indel;
