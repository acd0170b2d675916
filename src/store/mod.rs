//! Tracked-package store

pub mod package_store;
pub mod tracked_package;

pub use package_store::{PackageStore, STORE_FILENAME, StoreRewrite};
pub use tracked_package::{DEFAULT_TIMEOUT_MINUTES, TrackedPackage};
