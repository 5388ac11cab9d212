use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use predlogi::{
    config::Config,
    db::{self, PgRecommendationStore},
    messaging::{create_redis_client, RedisPublisher},
    routes::{create_router, AppState},
    services::{
        providers::{AuthClient, CatalogClient, ReservationClient},
        start_scheduler, BatchWorker, Collaborators, GeneratorSettings, ModelSettings,
        OpenRouterRecommender, RecommendationGenerator,
    },
};

/// How long a running batch may take to wind down on shutdown
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("predlogi=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    if config.run_migrations {
        db::run_migrations(&pool).await?;
    }
    let store = Arc::new(PgRecommendationStore::new(pool));

    let redis_client = create_redis_client(&config.redis_url)?;
    let publisher = RedisPublisher::connect(redis_client, config.notification_queue.clone()).await?;

    let timeout = config.upstream_timeout();
    let generator = RecommendationGenerator::new(
        Collaborators {
            identity: Arc::new(AuthClient::new(&config.auth_host, timeout)?),
            reservations: Arc::new(ReservationClient::new(&config.nakup_host, timeout)?),
            catalog: Arc::new(CatalogClient::new(&config.spored_host, timeout)?),
            model: Arc::new(OpenRouterRecommender::new(ModelSettings::from(&config))?),
            store: store.clone(),
            publisher: Arc::new(publisher),
        },
        GeneratorSettings::from(&config),
    );

    let (worker, worker_shutdown) = BatchWorker::spawn(Arc::new(generator), config.job_timeout());

    let mut scheduler = start_scheduler(
        &config.recommendation_schedule,
        config.recommendation_run_on_startup,
        worker.clone(),
    )
    .await?;

    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set, admin endpoints are unauthenticated");
    }

    let state = Arc::new(AppState {
        store,
        worker,
        admin_token: config.admin_token.clone(),
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!(error = %e, "Failed to stop scheduler");
    }
    worker_shutdown.shutdown(WORKER_SHUTDOWN_GRACE).await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
