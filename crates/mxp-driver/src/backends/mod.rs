//! Vector backend implementations
//!
//! - **Software**: lane-by-lane CPU simulation of the vector unit

pub mod software;

pub use software::SoftwareBackend;
