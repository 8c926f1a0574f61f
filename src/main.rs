//! Ledger node
//!
//! One instance of the ledger cluster. Architecture:
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │  Config  │──▶│ TransactionPipeline│──▶│  AccountStore    │
//! │  (YAML)  │   │  (lock + saga)     │   │ (SQLite / PG)    │
//! └──────────┘   └─────────┬──────────┘   └──────────────────┘
//!                          │
//!                          ▼
//!                ┌────────────────────┐   ┌──────────────────┐
//!                │ CoordinationStore  │◀──│ InterestAccrual  │
//!                │ (locks + pub/sub)  │   │     Engine       │
//!                └────────────────────┘   └──────────────────┘
//! ```
//!
//! Usage: `ledger-node --env dev` loads `config/dev.yaml`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use ledger_cluster::account::{
    AccountStore, CachedAccountStore, Database, PgAccountStore, SqliteAccountStore,
};
use ledger_cluster::config::{AppConfig, CoordinationBackend, StoreBackend};
use ledger_cluster::coordination::{
    CoordinationStore, DistributedLockCoordinator, InMemoryCoordination, PgCoordination,
};
use ledger_cluster::events::EventBus;
use ledger_cluster::external::{
    DetachedWallet, LogNotificationSink, NoSecondaryCurrency, NoSessions, StaticHolderContext,
};
use ledger_cluster::interest::InterestAccrualEngine;
use ledger_cluster::notifier::CrossInstanceNotifier;
use ledger_cluster::pipeline::{PipelineDeps, TransactionPipeline};
use ledger_cluster::tier::TierTable;

const LOCK_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = ledger_cluster::logging::init_logging(&app_config);

    info!(
        env = %env,
        version = env!("GIT_HASH"),
        cluster = %app_config.cluster_id,
        "Starting ledger node"
    );

    let rt = tokio::runtime::Runtime::new().context("Failed to build tokio runtime")?;
    rt.block_on(run(app_config))
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AccountStore>> {
    let db = &config.database;
    let inner: Arc<dyn AccountStore> = match db.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteAccountStore::connect(&db.url)
                .await
                .context("Failed to open SQLite account store")?,
        ),
        StoreBackend::Postgres => {
            let database =
                Database::connect(&db.url, db.max_connections, db.operation_timeout())
                    .await
                    .context("Failed to connect account database")?;
            Arc::new(PgAccountStore::new(database.into_pool()))
        }
    };
    inner
        .initialize()
        .await
        .context("Failed to initialize account schema")?;
    Ok(Arc::new(CachedAccountStore::new(inner)))
}

async fn open_coordination(config: &AppConfig) -> anyhow::Result<Arc<dyn CoordinationStore>> {
    let coordination = &config.coordination;
    match coordination.backend {
        CoordinationBackend::Memory => {
            warn!("In-memory coordination: locks are not shared with other instances");
            Ok(Arc::new(InMemoryCoordination::new()))
        }
        CoordinationBackend::Postgres => {
            let url = coordination
                .url
                .as_deref()
                .context("coordination.url is required for the postgres backend")?;
            let database = Database::connect(url, 5, coordination.lock_timeout())
                .await
                .context("Failed to connect coordination database")?;
            let store = Arc::new(PgCoordination::new(database.into_pool()));
            store.initialize().await?;

            let purger = store.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(LOCK_PURGE_INTERVAL);
                loop {
                    ticker.tick().await;
                    match purger.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => info!(purged = n, "Expired lock rows removed"),
                        Err(e) => warn!(error = %e, "Lock purge failed"),
                    }
                }
            });
            Ok(store as Arc<dyn CoordinationStore>)
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let instance = config.instance_id();
    let store = open_store(&config).await?;
    let coordination = open_coordination(&config).await?;
    info!(
        instance = %instance,
        store = ?config.database.backend,
        coordination = coordination.backend(),
        "Backends ready"
    );

    let sessions = Arc::new(NoSessions);
    let locks = Arc::new(DistributedLockCoordinator::new(
        coordination.clone(),
        config.cluster_id.clone(),
        &config.coordination,
    ));
    let notifier = Arc::new(CrossInstanceNotifier::new(
        coordination,
        store.clone(),
        sessions.clone(),
        instance,
        &config.cluster_id,
    ));
    tokio::spawn(notifier.clone().run());

    let deps = PipelineDeps {
        store: store.clone(),
        locks,
        notifier,
        wallet: Arc::new(DetachedWallet),
        secondary: Arc::new(NoSecondaryCurrency),
        holder: Arc::new(StaticHolderContext),
        sessions,
        sink: Arc::new(LogNotificationSink),
        events: EventBus::new(),
    };
    let pipeline = Arc::new(TransactionPipeline::new(
        deps,
        config.ledger.clone(),
        TierTable::new(config.tiers.clone()),
        config.database.operation_timeout(),
    )?);

    if config.interest.enabled {
        let engine = Arc::new(InterestAccrualEngine::new(
            pipeline.clone(),
            &config.interest,
        )?);
        tokio::spawn(engine.run());
    } else {
        info!("Interest accrual disabled");
    }

    info!("Ledger node ready; press Ctrl+C to shut down");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    store.shutdown().await;
    Ok(())
}
