//! 掩码分类计数与反应性（beta / theta / rho，以及可选的 mu / r_mut）计算。

pub mod mask;
pub mod reactivity;

pub use mask::{CountSnapshot, Counts, Mask, MaskCounts, Observation, SnapshotMeta, TargetCounts};
pub use reactivity::{write_profiles, MutationProfile, Profile, MUTATION_COLUMNS, PROFILE_HEADER};
