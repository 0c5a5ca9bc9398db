//! Composition root: wire the stores, pipeline, arbitrator and session
//! registry together and run until interrupted.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    pesan_identity::IdentityResolver,
    pesan_pipeline::{EventSink, GatewayEvent, MessageIngestionPipeline, dedup::run_sweep_loop},
    pesan_reply::{OpenAiCompatGenerator, ReplyArbitrator, ReplyGenerator},
    pesan_session::SessionRegistry,
    pesan_stats::{StatsAggregator, flush},
    pesan_store::{SqliteCredentialStore, SqliteStore},
    pesan_transport::SidecarTransport,
};

use crate::config::{self, PesanConfig};

const STATS_CACHE_FILE: &str = "stats.json";
const DATABASE_FILE: &str = "pesan.db";

pub struct ServeOpts {
    pub config_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Sink that surfaces gateway events in the logs. Installs without an
/// attached consumer run with this one.
struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn emit(&self, event: GatewayEvent) {
        match &event {
            GatewayEvent::ConnectionStatus { tenant_id, status } => {
                info!(tenant_id, status, "connection status");
            },
            GatewayEvent::Qr { tenant_id, .. } => {
                info!(tenant_id, "pairing code issued");
            },
            GatewayEvent::Message { .. } | GatewayEvent::StatsUpdate { .. } => {
                debug!(?event, "gateway event");
            },
        }
    }
}

fn load_config(opts: &ServeOpts) -> Result<PesanConfig> {
    match &opts.config_path {
        Some(path) => config::load_config(path),
        None => Ok(config::discover_and_load()),
    }
}

fn resolve_data_dir(opts: &ServeOpts, cfg: &PesanConfig) -> PathBuf {
    opts.data_dir
        .clone()
        .or_else(|| cfg.data.dir.clone())
        .unwrap_or_else(config::default_data_dir)
}

async fn open_pool(data_dir: &std::path::Path) -> Result<sqlx::SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join(DATABASE_FILE);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    pesan_store::run_migrations(&pool).await?;
    Ok(pool)
}

/// Apply pending migrations and exit.
pub async fn migrate(opts: ServeOpts) -> Result<()> {
    let cfg = load_config(&opts)?;
    let data_dir = resolve_data_dir(&opts, &cfg);
    open_pool(&data_dir).await?;
    info!(data_dir = %data_dir.display(), "migrations applied");
    Ok(())
}

pub async fn run(opts: ServeOpts) -> Result<()> {
    let cfg = load_config(&opts)?;
    let data_dir = resolve_data_dir(&opts, &cfg);
    let pool = open_pool(&data_dir).await?;

    let store = SqliteStore::new(pool.clone());
    let credentials = Arc::new(SqliteCredentialStore::new(pool));

    let stats = StatsAggregator::new();
    let stats_path = data_dir.join(STATS_CACHE_FILE);
    if let Err(e) = flush::load_from(&stats, &stats_path) {
        warn!(error = %e, "stats cache not loaded, starting cold");
    }

    let generator = cfg.ai.api_key.clone().map(|key| {
        Arc::new(OpenAiCompatGenerator::new(
            cfg.ai.base_url.clone(),
            key,
            cfg.ai.model.clone(),
        )) as Arc<dyn ReplyGenerator>
    });
    if generator.is_none() {
        info!("no AI key configured, generation disabled");
    }

    let arbitrator = Arc::new(ReplyArbitrator::new(
        Arc::new(store.clone()),
        generator,
        stats.clone(),
    ));
    for (tenant_id, tenant) in &cfg.tenants {
        arbitrator.set_tenant_config(tenant_id, tenant.reply_config());
    }

    let pipeline = Arc::new(MessageIngestionPipeline::new(
        IdentityResolver::new(),
        stats.clone(),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store),
        arbitrator,
        Arc::new(LogSink),
    )?);
    for (tenant_id, tenant) in &cfg.tenants {
        if let Some(url) = &tenant.webhook_url {
            pipeline.set_webhook(tenant_id, url);
        }
    }

    let transport = Arc::new(SidecarTransport::new(cfg.transport.sidecar_url.clone()));
    let registry = SessionRegistry::new(
        transport,
        credentials,
        Arc::clone(&pipeline),
        Arc::new(LogSink),
    );

    let shutdown = CancellationToken::new();
    let flusher = tokio::spawn(flush::run_flush_loop(
        stats,
        stats_path,
        Duration::from_secs(cfg.stats.flush_interval_secs),
        shutdown.clone(),
    ));
    tokio::spawn(run_sweep_loop(
        pipeline.dedup().clone(),
        Duration::from_secs(cfg.dedup.sweep_interval_secs),
        shutdown.clone(),
    ));

    let recovered = registry.recover_all().await;
    info!(recovered, sidecar = cfg.transport.sidecar_url, "gateway running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    shutdown.cancel();
    // The flush loop writes one final snapshot on its way out.
    let _ = flusher.await;
    Ok(())
}
