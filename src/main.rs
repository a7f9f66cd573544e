// Seaway bridge server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use seaway_bridges::bus::Bus;
use seaway_bridges::clock::Clock;
use seaway_bridges::config::Config;
use seaway_bridges::model::AvailableBridge;
use seaway_bridges::net::aishub::{AisHubPoller, REQUEST_TIMEOUT_SECS};
use seaway_bridges::net::http::build_router;
use seaway_bridges::net::rate_limit::RateLimiter;
use seaway_bridges::net::udp::AisUdpServer;
use seaway_bridges::persist::{HistoryStore, SnapshotStore};
use seaway_bridges::regions::{bridge_id, region_roster, REGIONS};
use seaway_bridges::registry::VesselRegistry;
use seaway_bridges::scheduler;
use seaway_bridges::scraper::Scraper;
use seaway_bridges::state::AppState;

/// Timeout for upstream bridge feed requests.
const UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// How long in-flight work gets to finish after shutdown is signaled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_logging(config.verbose);

    info!("Starting seaway bridge server");

    // Config errors fail fast with an explicit message
    let clock = Clock::new(&config.timezone)?;
    let listen_addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| format!("invalid listen address '{}': {e}", config.listen))?;

    let bus = Bus::new();
    let registry = Arc::new(VesselRegistry::new(clock.clone()));
    let snapshot = Arc::new(SnapshotStore::load(
        &config.snapshot_path,
        available_bridges(),
    ));
    let history = Arc::new(HistoryStore::new(&config.history_dir));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()?;
    let insecure_client = match &config.insecure_host {
        Some(host) => {
            warn!("TLS verification disabled for {host}");
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
                    .danger_accept_invalid_certs(true)
                    .build()?,
            )
        }
        None => None,
    };

    let scraper = Arc::new(Scraper::new(
        clock.clone(),
        bus.clone(),
        registry.clone(),
        snapshot.clone(),
        history.clone(),
        client,
        insecure_client,
        config.insecure_host.clone(),
        config.old_endpoint.clone(),
        config.new_endpoint.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::new(
        clock.clone(),
        bus.clone(),
        registry.clone(),
        snapshot.clone(),
        scraper.clone(),
        shutdown_rx.clone(),
        Arc::new(RateLimiter::new(config.rate_limit_data)),
        Arc::new(RateLimiter::new(config.rate_limit_static)),
        config.cache_max_age,
    );

    // AIS ingest
    let udp_server = if config.ais_udp_enabled {
        match AisUdpServer::start(
            SocketAddr::from(([0, 0, 0, 0], config.ais_udp_port)),
            registry.clone(),
            config.station_map(),
        )
        .await
        {
            Ok(server) => Some(server),
            Err(e) => {
                error!("Failed to start AIS UDP listener: {e}");
                None
            }
        }
    } else {
        info!("AIS UDP listener disabled");
        None
    };

    match &config.aishub_api_key {
        Some(api_key) => {
            let poll_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?;
            let poller = AisHubPoller::new(
                registry.clone(),
                poll_client,
                config.aishub_url.clone(),
                api_key.clone(),
                clock.clone(),
            );
            tokio::spawn(scheduler::run_aishub_loop(poller, shutdown_rx.clone()));
        }
        None => info!("AISHub poller disabled (no API key)"),
    }

    // Background jobs
    tokio::spawn(scheduler::run_scrape_loop(
        scraper.clone(),
        clock.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(scheduler::run_statistics_loop(
        scraper.clone(),
        clock.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(scheduler::run_cleanup_loop(
        registry.clone(),
        shutdown_rx.clone(),
    ));
    tokio::spawn(scheduler::run_boats_probe(
        registry.clone(),
        bus.clone(),
        shutdown_rx.clone(),
    ));

    // HTTP + WebSocket gateway
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("Listening on {listen_addr}");

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await;
        if let Err(e) = result {
            error!("HTTP server error: {e}");
        }
    });

    info!("Server ready");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!("Unable to listen for shutdown signal: {e}");
            return Err(e.into());
        }
    }

    // Graceful shutdown: stop the schedulers, close sockets, give in-flight
    // work a bounded window to finish
    info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    if let Some(udp) = &udp_server {
        udp.shutdown().await;
    }
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, server).await;

    info!("Shutdown complete");
    Ok(())
}

/// The fixed roster, denormalized for the snapshot index.
fn available_bridges() -> Vec<AvailableBridge> {
    let mut bridges = Vec::new();
    for region in &REGIONS {
        for site in region_roster(region.short) {
            bridges.push(AvailableBridge {
                id: bridge_id(region.short, site.name),
                name: site.name.to_string(),
                region_short: region.short.to_string(),
                region: region.name.to_string(),
            });
        }
    }
    bridges
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
