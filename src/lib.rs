//! extension-sync
//!
//! Keeps a secondary extension registry in sync with a primary marketplace:
//! resolves which upstream artifact represents the current version of every
//! tracked extension and publishes it in an isolated, time-bounded worker.

pub mod core;
pub mod marketplace;
pub mod orchestration;
pub mod resolution;
pub mod security;
pub mod sources;
pub mod store;

pub use crate::core::*;
pub use orchestration::{BatchDriver, BatchOptions, BatchResult, StatLedger, UpgradeWorkflow};
pub use resolution::{ResolutionPolicy, ResolvedSource, SourceKind};
pub use store::{PackageStore, TrackedPackage};
