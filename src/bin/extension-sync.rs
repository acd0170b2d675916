//! extension-sync CLI
//!
//! Keeps a secondary extension registry in sync with the primary marketplace

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extension_sync::core::config::{PublishConfig, ReportConfig, StoreConfig};
use extension_sync::marketplace::{GalleryOracle, OvsxCli};
use extension_sync::orchestration::publish_job::exit_code;
use extension_sync::orchestration::{
    BatchDriver, PublishJob, PublishSupervisor, ReleaseAdvisor, UpgradeWorkflow, WorkerCommand,
};
use extension_sync::resolution::ResolutionPolicy;
use extension_sync::sources::{RepositoryEnumerator, ShellToolchain};
use extension_sync::store::PackageStore;
use extension_sync::{ConfigLoadOptions, ConfigLoader, SyncConfig, SyncError};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keeps a secondary extension registry in sync with the primary marketplace
#[derive(Parser)]
#[command(name = "extension-sync")]
#[command(version)]
#[command(about = "Keeps a secondary extension registry in sync with the primary marketplace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish every tracked extension that is behind the primary marketplace
    Publish {
        /// Tracked-package store (defaults to ./extensions.json)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Resolve sources without publishing
        #[arg(long)]
        dry_run: bool,

        /// Comma-separated ids to re-verify
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Maximum extensions processed at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Where to write the JSON run report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Move pinned extensions to their newest upstream release
    Upgrade {
        /// Tracked-package store (defaults to ./extensions.json)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Only upgrade ids containing this text
        #[arg(long)]
        extension: Option<String>,
    },

    /// Validate the configuration
    Check {
        /// Project path (defaults to current directory)
        #[arg(value_name = "PROJECT_PATH")]
        project_path: Option<PathBuf>,
    },

    /// Run one publish attempt (started by `publish`)
    #[command(name = "publish-job", hide = true)]
    PublishJob {
        /// Serialized job
        job: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            if let Some(sync_error) = e.downcast_ref::<SyncError>() {
                let actions = sync_error.suggested_actions();
                if !actions.is_empty() {
                    eprintln!("\n💡 Suggested actions:");
                    for action in actions {
                        eprintln!("   - {}", action);
                    }
                }
            }
            process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Publish {
            store,
            dry_run,
            only,
            concurrency,
            report,
        } => {
            let overrides = SyncConfig {
                store: store_override(store),
                publish: Some(PublishConfig {
                    dry_run: dry_run.then_some(true),
                    concurrency,
                    only: (!only.is_empty()).then_some(only),
                    ..Default::default()
                }),
                report: report.map(|path| ReportConfig {
                    path: Some(path.display().to_string()),
                }),
                ..Default::default()
            };
            let config = load_config(PathBuf::from("."), Some(overrides)).await?;
            publish_command(config).await
        }
        Commands::Upgrade { store, extension } => {
            let overrides = SyncConfig {
                store: store_override(store),
                ..Default::default()
            };
            let config = load_config(PathBuf::from("."), Some(overrides)).await?;
            upgrade_command(config, extension).await
        }
        Commands::Check { project_path } => {
            let path = project_path.unwrap_or_else(|| PathBuf::from("."));
            check_command(path).await
        }
        Commands::PublishJob { job } => {
            let config = load_config(PathBuf::from("."), None).await?;
            publish_job_command(config, &job).await
        }
    }
}

fn store_override(store: Option<PathBuf>) -> Option<StoreConfig> {
    store.map(|path| StoreConfig {
        path: Some(path.display().to_string()),
    })
}

async fn load_config(project_path: PathBuf, cli_args: Option<SyncConfig>) -> Result<SyncConfig> {
    let mut options = ConfigLoadOptions::new(project_path);
    options.cli_args = cli_args;
    let config = ConfigLoader::load(options).await?;

    let validation = ConfigLoader::validate(&config);
    if !validation.valid {
        anyhow::bail!("{}", ConfigLoader::format_validation_result(&validation));
    }
    Ok(config)
}

async fn publish_command(config: SyncConfig) -> Result<i32> {
    println!("\n📦 extension-sync\n");

    let retry = config.retry_options();
    let primary = GalleryOracle::new("primary marketplace", config.primary_url())?
        .with_retry(retry.clone());
    let secondary =
        GalleryOracle::new("secondary registry", config.secondary_url())?.with_retry(retry.clone());

    let scratch_root = config.scratch_root();
    let enumerator =
        RepositoryEnumerator::new(scratch_root.join("mirrors"))?.with_retry(retry);
    let policy = ResolutionPolicy::new(Arc::new(enumerator)).with_staleness(config.staleness());
    let supervisor = PublishSupervisor::new(WorkerCommand::current_exe()?, &scratch_root);

    let store = PackageStore::new(config.store_path());
    let packages = store.load().await?;
    info!("Loaded {} extensions from {}", packages.len(), store.path().display());

    let driver = BatchDriver::new(
        Arc::new(primary),
        Arc::new(secondary),
        policy,
        Arc::new(supervisor),
    )
    .with_ledger_policy(config.ledger_policy());
    let result = driver.run(packages, &config.batch_options()).await;

    let report_path = config.report_path();
    result
        .ledger
        .write_report(&report_path)
        .await
        .with_context(|| format!("failed to write report to {}", report_path.display()))?;
    println!("{}", result.ledger.to_markdown());
    println!("📄 Report written to {}", report_path.display());

    Ok(result.exit_code())
}

async fn upgrade_command(config: SyncConfig, extension: Option<String>) -> Result<i32> {
    println!("\n⬆️  Upgrading {}\n", config.store_path().display());

    let enumerator = RepositoryEnumerator::new(config.scratch_root().join("mirrors"))?
        .with_retry(config.retry_options());
    let workflow = UpgradeWorkflow::new(Arc::new(ReleaseAdvisor::new(Arc::new(enumerator))));
    let options = config.upgrade_options(extension);

    let report = workflow
        .run(&PackageStore::new(config.store_path()), &options)
        .await?;

    println!("✅ Upgraded: {}", report.upgraded.len());
    for id in &report.upgraded {
        println!("   - {}", id);
    }
    println!("❌ Failed: {}", report.failed.len());
    for id in &report.failed {
        println!("   - {}", id);
    }
    if report.rolled_back {
        println!("\n⚠️  Store restored from backup");
    }
    println!("📄 Failed ids written to {}", options.failed_log.display());

    Ok(report.exit_code())
}

async fn check_command(project_path: PathBuf) -> Result<i32> {
    let config = ConfigLoader::load(ConfigLoadOptions::new(project_path)).await?;
    let validation = ConfigLoader::validate(&config);

    println!("{}", ConfigLoader::format_validation_result(&validation));

    Ok(if validation.valid { 0 } else { 1 })
}

async fn publish_job_command(config: SyncConfig, job: &str) -> Result<i32> {
    let job: PublishJob = serde_json::from_str(job).context("invalid publish job")?;

    let mut registry = OvsxCli::new(&job.work_dir);
    if let Some(url) = config.registry_url() {
        registry = registry.with_registry_url(url);
    }
    let toolchain = ShellToolchain::new()?.with_retry(config.retry_options());

    let result = job.run(&registry, &toolchain).await;
    if let Err(e) = &result {
        error!("{}: {}", job.extension.id, e);
    }

    Ok(exit_code(&result))
}
