//! Feature-Based Auto-Registration
//!
//! Pure-Rust ORB features, Hamming matching and seeded RANSAC, chained into
//! per-image transforms when no landmarks are given.

pub mod auto;
pub mod matching;
pub mod orb;
pub mod ransac;

pub use auto::{AutoRegistrar, AutoRegistration, PairRegistration};
pub use matching::{hamming_distance, match_features, FeatureMatch};
pub use orb::{Feature, Keypoint, OrbExtractor};
pub use ransac::RansacFit;
