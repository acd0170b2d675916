//! Orchestration layer for extension synchronization
//!
//! This module provides the high-level components that drive a sync run:
//! the stats ledger, the publish supervisor and its worker job, the batch
//! driver and the store upgrade workflow.

pub mod batch_driver;
pub mod ledger;
pub mod publish_job;
pub mod supervisor;
pub mod upgrade;

// Re-export main types for convenience
pub use batch_driver::{BatchDriver, BatchOptions, BatchResult, PackageReport, SyncStatus};
pub use ledger::{FreshnessBucket, LedgerPolicy, StatLedger};
pub use publish_job::{JobOutcome, PublishContext, PublishJob};
pub use supervisor::{PUBLISH_JOB_COMMAND, PublishSupervisor, WorkerCommand};
pub use upgrade::{
    ReleaseAdvisor, UpgradeAdvisor, UpgradeOptions, UpgradeReport, UpgradeWorkflow,
};
