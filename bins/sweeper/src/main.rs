//! Postvault attachment sweeper
//!
//! Runs quota enforcement and the expiration sweep once, for cron-style
//! scheduling.
//!
//! Usage:
//!   sweeper [all]   - Enforce the quota, then expire old attachments
//!   sweeper quota   - Enforce the quota only
//!   sweeper expire  - Expire old attachments only

use std::sync::Arc;

use anyhow::bail;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postvault_core::attachment::AttachmentService;
use postvault_core::storage::StorageService;
use postvault_db::{AttachmentRepository, connect_with};
use postvault_shared::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    All,
    Quota,
    Expire,
}

impl Task {
    fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg {
            None | Some("all") => Ok(Self::All),
            Some("quota") => Ok(Self::Quota),
            Some("expire") => Ok(Self::Expire),
            Some(other) => bail!("unknown task `{other}`, expected all, quota or expire"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postvault=debug,sweeper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let task = Task::parse(std::env::args().nth(1).as_deref())?;
    let config = AppConfig::load()?;

    let db = connect_with(&config.database).await?;
    info!("Connected to database");

    let store = match &config.storage {
        Some(provider) => {
            let store = StorageService::from_provider(provider)?;
            info!(provider = store.provider_name(), "Object store configured");
            store
        }
        None => {
            warn!("No object store configured, deletions will be skipped");
            StorageService::unconfigured()
        }
    };

    let service = AttachmentService::new(
        Arc::new(AttachmentRepository::new(db)),
        Arc::new(store),
        Arc::new(config.attachments),
    );

    if matches!(task, Task::All | Task::Quota) {
        let report = service.enforce_quota(0).await?;
        info!(
            current = report.current,
            ceiling = report.ceiling,
            freed = report.freed,
            evicted = report.evicted,
            "Quota pass complete"
        );
    }

    if matches!(task, Task::All | Task::Expire) {
        let report = service.clean_expired().await?;
        info!(
            examined = report.examined,
            deleted = report.deleted,
            retained = report.retained,
            "Expiration pass complete"
        );
    }

    Ok(())
}
