//! # Shardline Testkit
//!
//! Testing utilities for Shardline.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Storage doubles**: [`FlakyStorage`], [`DelayedStorage`] and
//!   [`CorruptingStorage`] wrap any `StorageClient` and misbehave on demand
//! - **Generators**: Proptest strategies for property-based testing
//! - **Scenario vectors**: Source sizes paired with their expected layout
//!
//! ## Fault Injection
//!
//! ```rust
//! use shardline_testkit::{fingerprint_of, FlakyStorage};
//!
//! let storage = FlakyStorage::new();
//! // The first two uploads of these bytes fail with a network error.
//! storage.fail_uploads(fingerprint_of(b"fragment"), 2);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use shardline_testkit::SplitParams;
//!
//! proptest! {
//!     #[test]
//!     fn split_never_truncates_silently(params: SplitParams) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    fingerprint_of, fragments_of, pattern_bytes, CorruptingStorage, DelayedStorage, FlakyStorage,
    UploadAttempt,
};
pub use generators::{fingerprint, fragment_size, seeded_bytes, SplitParams};
pub use vectors::{all_scenarios, scenario, ScenarioVector};
