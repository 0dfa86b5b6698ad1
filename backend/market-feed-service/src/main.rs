use actix_web::{web, App, HttpServer};
use anyhow::Context;
use rankset_cache::RedisSortedSetStore;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_feed_service::config::{Config, SettingsHandle};
use market_feed_service::db::PgItemStore;
use market_feed_service::handlers::{self, AppState};
use market_feed_service::jobs::{self, RebuildSchedulerConfig};
use market_feed_service::services::{FeedReader, RankedSets, RebuildCoordinator, TierStats};

const INGESTION_CHANNEL_CAPACITY: usize = 64;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "Starting market-feed-service v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Environment: {}", config.app.env);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to Postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database ready");

    let store = RedisSortedSetStore::connect(
        &config.redis.url,
        Some(Duration::from_millis(config.redis.command_timeout_ms)),
    )
    .await
    .context("Failed to connect to Redis")?;
    store.ping().await.context("Redis ping failed")?;
    info!("Redis ready");

    let items = Arc::new(PgItemStore::new(pool));
    let sets = RankedSets::new(Arc::new(store));
    let settings = Arc::new(SettingsHandle::new(config.ranking.clone())?);
    let tier_stats = Arc::new(TierStats::default());

    let coordinator = RebuildCoordinator::new(
        items.clone(),
        sets.clone(),
        settings.clone(),
        config.rebuild.clone(),
        tier_stats.clone(),
    );
    let reader = FeedReader::new(items, sets, tier_stats, &config.feed);
    let served = config.feed.parsed_segments();

    let scheduler_config = RebuildSchedulerConfig {
        interval: config.rebuild.interval(),
        segments: served.clone(),
    };
    tokio::spawn(jobs::start_rebuild_scheduler(
        coordinator.clone(),
        scheduler_config,
    ));
    info!("✅ Rebuild scheduler started");

    let (ingestion, ingestion_rx) = jobs::ingestion_channel(INGESTION_CHANNEL_CAPACITY);
    tokio::spawn(jobs::run_channel_listener(
        coordinator.clone(),
        served,
        ingestion_rx,
    ));
    tokio::spawn(jobs::run_pubsub_listener(
        config.redis.url.clone(),
        config.ingestion.channel.clone(),
        ingestion,
    ));
    info!(channel = %config.ingestion.channel, "✅ Ingestion listener started");

    let state = web::Data::new(AppState {
        reader,
        coordinator,
        settings,
    });

    let bind = (config.app.host.clone(), config.app.port);
    info!("HTTP server listening on {}:{}", bind.0, bind.1);

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
