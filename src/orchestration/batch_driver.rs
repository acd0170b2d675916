//! Batch Driver - Synchronizes every tracked package in one run
//!
//! Features:
//! - Sequential or bounded-parallel processing
//! - Re-verification filter restricting the run to a set of ids
//! - Dry run (resolve, never publish)
//! - Per-package state tracking with the failing phase reported
//! - Shared ledger guarded by a mutex

use crate::core::error::SyncError;
use crate::core::state_machine::{SyncState, SyncStateMachine};
use crate::core::traits::{PublishAttempt, PublishOutcome, VersionOracle, VersionRecord};
use crate::orchestration::ledger::{FreshnessBucket, LedgerPolicy, StatLedger};
use crate::resolution::ResolutionPolicy;
use crate::store::{DEFAULT_TIMEOUT_MINUTES, TrackedPackage};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

/// Batch run options
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Resolve sources but never publish
    pub dry_run: bool,

    /// Restrict the run to these ids
    pub only: Option<HashSet<String>>,

    /// Maximum packages processed at once (1 = sequential)
    pub max_concurrency: usize,

    /// Timeout for packages that do not set their own
    pub default_timeout_minutes: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            only: None,
            max_concurrency: 1,
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

/// How a package left the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Up to date or unstable, nothing to do
    Fresh,
    DryRun,
    Published,
    AlreadyPublished,
    Skipped(String),
    Failed { phase: SyncState, message: String },
}

impl SyncStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncStatus::Failed { .. })
    }
}

/// Result for one package
#[derive(Debug, Clone)]
pub struct PackageReport {
    pub id: String,
    pub status: SyncStatus,
    pub elapsed_ms: i64,
}

/// Batch run result
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub ledger: StatLedger,
    pub reports: Vec<PackageReport>,
}

impl BatchResult {
    pub fn success(&self) -> bool {
        !self.ledger.has_failures()
    }

    /// Process exit status for the run
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    fn with_status(&self, predicate: impl Fn(&SyncStatus) -> bool) -> Vec<&PackageReport> {
        self.reports.iter().filter(|r| predicate(&r.status)).collect()
    }
}

/// Drives the per-package sync flow over a list of tracked packages
#[derive(Clone)]
pub struct BatchDriver {
    primary: Arc<dyn VersionOracle>,
    secondary: Arc<dyn VersionOracle>,
    policy: Arc<ResolutionPolicy>,
    supervisor: Arc<dyn PublishAttempt>,
    ledger_policy: LedgerPolicy,
}

impl BatchDriver {
    pub fn new(
        primary: Arc<dyn VersionOracle>,
        secondary: Arc<dyn VersionOracle>,
        policy: ResolutionPolicy,
        supervisor: Arc<dyn PublishAttempt>,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy: Arc::new(policy),
            supervisor,
            ledger_policy: LedgerPolicy::default(),
        }
    }

    pub fn with_ledger_policy(mut self, ledger_policy: LedgerPolicy) -> Self {
        self.ledger_policy = ledger_policy;
        self
    }

    /// Run the sync flow for `packages`
    pub async fn run(&self, packages: Vec<TrackedPackage>, options: &BatchOptions) -> BatchResult {
        let selected: Vec<TrackedPackage> = packages
            .into_iter()
            .filter(|p| options.only.as_ref().is_none_or(|only| only.contains(&p.id)))
            .collect();

        println!("\n📦 Synchronizing {} extensions", selected.len());
        println!(
            "Mode: {}",
            if options.max_concurrency <= 1 {
                "Sequential".to_string()
            } else {
                format!("Parallel (max {} concurrent)", options.max_concurrency)
            }
        );
        if options.dry_run {
            println!("Dry run: sources are resolved, nothing is published");
        }
        println!();

        let ledger = Arc::new(Mutex::new(StatLedger::new()));

        let reports = if options.max_concurrency <= 1 {
            self.run_sequentially(selected, options, &ledger).await
        } else {
            self.run_in_parallel(selected, options, &ledger).await
        };

        let result = BatchResult {
            ledger: ledger.lock().await.clone(),
            reports,
        };

        Self::print_summary(&result);

        result
    }

    async fn run_sequentially(
        &self,
        packages: Vec<TrackedPackage>,
        options: &BatchOptions,
        ledger: &Arc<Mutex<StatLedger>>,
    ) -> Vec<PackageReport> {
        let mut reports = Vec::with_capacity(packages.len());
        for package in packages {
            reports.push(self.sync_package(package, options, ledger).await);
        }
        reports
    }

    async fn run_in_parallel(
        &self,
        packages: Vec<TrackedPackage>,
        options: &BatchOptions,
        ledger: &Arc<Mutex<StatLedger>>,
    ) -> Vec<PackageReport> {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrency));
        let options = Arc::new(options.clone());
        let mut tasks = Vec::new();

        for package in packages {
            let semaphore = Arc::clone(&semaphore);
            let ledger = Arc::clone(ledger);
            let driver = self.clone();
            let options = Arc::clone(&options);
            let id = package.id.clone();

            let task = tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire().await.ok();
                driver.sync_package(package, &options, &ledger).await
            });

            tasks.push((id, task));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (id, task) in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("{}: task failed: {}", id, e);
                    ledger.lock().await.record_failure(&id);
                    reports.push(PackageReport {
                        id,
                        status: SyncStatus::Failed {
                            phase: SyncState::Pending,
                            message: format!("task failed: {}", e),
                        },
                        elapsed_ms: 0,
                    });
                }
            }
        }
        reports
    }

    /// Read versions, classify, resolve, publish, re-read and reclassify one package
    async fn sync_package(
        &self,
        package: TrackedPackage,
        options: &BatchOptions,
        ledger: &Mutex<StatLedger>,
    ) -> PackageReport {
        let mut machine = SyncStateMachine::new(&package.id);
        let status = self
            .drive(&package, options, ledger, &mut machine)
            .await
            .unwrap_or_else(|message| {
                let phase = machine.fail(message.clone());
                SyncStatus::Failed { phase, message }
            });

        if let SyncStatus::Failed { phase, message } = &status {
            ledger.lock().await.record_failure(&package.id);
            let json = serde_json::to_string(&package).unwrap_or_else(|_| package.id.clone());
            error!(
                "[FAIL] Could not process extension in phase {:?}: {}\n{}",
                phase, message, json
            );
        }
        debug!(id = %package.id, "history:\n{}", machine.get_history());

        PackageReport {
            id: package.id,
            status,
            elapsed_ms: machine.get_elapsed_time(),
        }
    }

    async fn drive(
        &self,
        package: &TrackedPackage,
        options: &BatchOptions,
        ledger: &Mutex<StatLedger>,
        machine: &mut SyncStateMachine,
    ) -> Result<SyncStatus, String> {
        let id = package.id.as_str();

        machine.transition(SyncState::ReadingVersions);
        let primary = Self::read(self.primary.as_ref(), id).await;
        let secondary = Self::read(self.secondary.as_ref(), id).await;

        machine.transition(SyncState::Classifying);
        let bucket = self
            .classify(ledger, id, primary.as_ref(), secondary.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        if bucket.is_fresh() {
            debug!("{}: {}", id, bucket.label());
            machine.transition_with_note(SyncState::Skipped, Some(bucket.label().to_string()));
            return Ok(SyncStatus::Fresh);
        }

        machine.transition(SyncState::Resolving);
        let source = self
            .policy
            .resolve(package, primary.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        info!("{}: {}", id, source.describe(primary.is_some()));

        if options.dry_run {
            machine.transition_with_note(SyncState::Skipped, Some("dry run".to_string()));
            return Ok(SyncStatus::DryRun);
        }

        machine.transition(SyncState::Publishing);
        let minutes = package.timeout_minutes_or(options.default_timeout_minutes);
        let outcome = self
            .supervisor
            .attempt(
                package,
                &source,
                secondary.as_ref().map(|s| s.version.as_str()),
                package.timeout(options.default_timeout_minutes),
            )
            .await;
        let status = match outcome {
            PublishOutcome::Succeeded => SyncStatus::Published,
            PublishOutcome::AlreadyPublished => SyncStatus::AlreadyPublished,
            PublishOutcome::Skipped(reason) => SyncStatus::Skipped(reason),
            PublishOutcome::Failed(e) => return Err(e.to_string()),
            PublishOutcome::TimedOut => {
                return Err(SyncError::Timeout {
                    id: id.to_string(),
                    minutes,
                }
                .to_string());
            }
        };

        machine.transition(SyncState::RereadingSecondary);
        let secondary = Self::read(self.secondary.as_ref(), id).await;

        machine.transition(SyncState::Reclassifying);
        self.classify(ledger, id, primary.as_ref(), secondary.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        machine.transition(SyncState::Done);
        Ok(status)
    }

    async fn classify(
        &self,
        ledger: &Mutex<StatLedger>,
        id: &str,
        primary: Option<&VersionRecord>,
        secondary: Option<&VersionRecord>,
    ) -> Result<FreshnessBucket, SyncError> {
        ledger
            .lock()
            .await
            .classify(id, primary, secondary, &self.ledger_policy, Utc::now())
    }

    /// A lookup that keeps failing counts as absent
    async fn read(oracle: &dyn VersionOracle, id: &str) -> Option<VersionRecord> {
        match oracle.fetch(id).await {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: {} lookup failed, treating as absent: {}", id, oracle.name(), e);
                None
            }
        }
    }

    /// Print batch summary
    fn print_summary(result: &BatchResult) {
        println!("\n{}", "=".repeat(60));
        println!("📊 Sync Summary");
        println!("{}", "=".repeat(60));

        let published = result.with_status(|s| *s == SyncStatus::Published);
        println!("\n✅ Published: {}", published.len());
        for report in published {
            println!("   - {} ({}ms)", report.id, report.elapsed_ms);
        }

        let already = result.with_status(|s| *s == SyncStatus::AlreadyPublished);
        if !already.is_empty() {
            println!("\n☑️  Already published: {}", already.len());
            for report in already {
                println!("   - {}", report.id);
            }
        }

        let fresh = result.with_status(|s| *s == SyncStatus::Fresh);
        println!("\n🟢 Fresh: {}", fresh.len());

        let skipped = result.with_status(|s| matches!(s, SyncStatus::Skipped(_) | SyncStatus::DryRun));
        if !skipped.is_empty() {
            println!("\n⏭️  Skipped: {}", skipped.len());
            for report in skipped {
                match &report.status {
                    SyncStatus::Skipped(reason) => println!("   - {}: {}", report.id, reason),
                    _ => println!("   - {}: dry run", report.id),
                }
            }
        }

        let failed = result.with_status(SyncStatus::is_failure);
        println!("\n❌ Failed: {}", failed.len());
        for report in failed {
            if let SyncStatus::Failed { phase, message } = &report.status {
                println!("   - {} [{:?}]: {}", report.id, phase, message);
            }
        }

        println!("\n{}", "=".repeat(60));
        println!(
            "Overall Status: {}",
            if result.success() { "✅ SUCCESS" } else { "❌ FAILED" }
        );
        println!("{}\n", "=".repeat(60));
    }
}
