mod auth;
mod config;
mod error;
mod handlers;
mod protocol;
mod rooms;
mod router;
mod state;

use std::sync::Arc;
use std::time::Duration;

use bidding::{AdmissionService, AuctionSource, ExtensionPolicy, FinalizationHook, RateGate};
use chrono::Duration as ChronoDuration;
use config::Config;
use coordinator::{FinalizationScheduler, Finalizer, WriteDownHandler};
use fanout::FanoutBus;
use hot_state::{sweeper, HotStore, HotStoreConfig};
use jobs::{JobRunner, RunnerConfig};
use rooms::RoomRegistry;
use router::create_router;
use state::AppState;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Logging first; everything after this is observable
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting auction gateway");
    if config.hot_tls {
        tracing::warn!("HOT_TLS is set but the in-process hot store has no transport to secure");
    }

    // Cold store pool is the first process-wide singleton
    let cold = cold_store::ColdStore::connect(&config.database_url, 10).await?;
    cold.apply_schema().await?;

    // Hot store plus its expiry sweep
    let (hot, expiry_rx) = HotStore::new(HotStoreConfig {
        retention: ChronoDuration::seconds(config.retention_secs),
    });
    let hot = Arc::new(hot);
    sweeper::spawn(Arc::clone(&hot), Duration::from_secs(1));

    // Bus, then the job runner and its write-down handler
    let bus = FanoutBus::with_defaults();
    let runner = Arc::new(JobRunner::new(RunnerConfig {
        finalize_attempts: config.finalization_max_attempts,
        ..RunnerConfig::default()
    }));
    let finalizer = Arc::new(Finalizer::new(
        Arc::clone(&hot),
        Arc::new(cold.clone()),
        bus.clone(),
    ));
    runner.start(Arc::new(WriteDownHandler::new(cold.clone(), finalizer)));

    // Finalization triggers: timer jobs + hot-store expiry events
    let scheduler = Arc::new(FinalizationScheduler::new(Arc::clone(&runner)));
    coordinator::scheduler::spawn_expiry_listener(Arc::clone(&scheduler), expiry_rx);

    // Scheduled auctions go live on their start time
    coordinator::spawn_activation_loop(
        cold.clone(),
        Arc::clone(&hot),
        Arc::clone(&scheduler),
        Duration::from_secs(1),
    );

    // Crash recovery before any traffic: re-hydrate active auctions and
    // re-arm their timers
    let report = coordinator::recover(&hot, &cold, scheduler.as_ref()).await?;
    tracing::info!(
        hydrated = report.hydrated,
        scheduled = report.scheduled,
        finalized_immediately = report.finalized_immediately,
        "startup recovery"
    );

    let admission = Arc::new(AdmissionService::new(
        Arc::clone(&hot),
        Arc::new(cold.clone()) as Arc<dyn AuctionSource>,
        bus.clone(),
        Arc::clone(&runner),
        RateGate::new(config.bid_rate_limit_per_sec),
        ExtensionPolicy::new(
            config.extension_threshold_secs,
            config.extension_duration_secs,
        ),
        Arc::clone(&scheduler) as Arc<dyn FinalizationHook>,
    ));

    // Room fan-out for this instance
    let rooms = Arc::new(RoomRegistry::new());
    rooms::spawn_bus_forwarder(bus.subscribe(), Arc::clone(&rooms));

    let app_state = AppState {
        hot,
        cold,
        admission,
        rooms,
        scheduler,
        jobs: runner,
        jwt_secret: config.jwt_secret.clone(),
    };
    let app = create_router(app_state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down: refusing new connections, draining in-flight work");
        })
        .await?;

    Ok(())
}
