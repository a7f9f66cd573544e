// Shared application context.
//
// Built once in main and handed to every component; there are no globals.
// Cloning is cheap: everything inside is an Arc or a handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::bus::Bus;
use crate::clock::Clock;
use crate::net::rate_limit::RateLimiter;
use crate::persist::SnapshotStore;
use crate::registry::VesselRegistry;
use crate::scraper::Scraper;

#[derive(Clone)]
pub struct AppState {
    pub clock: Clock,
    pub bus: Bus,
    pub registry: Arc<VesselRegistry>,
    pub snapshot: Arc<SnapshotStore>,
    pub scraper: Arc<Scraper>,
    /// Flips to true exactly once, at shutdown.
    pub shutdown: watch::Receiver<bool>,
    pub data_limiter: Arc<RateLimiter>,
    pub static_limiter: Arc<RateLimiter>,
    pub cache_max_age: u32,
    ws_clients: Arc<AtomicUsize>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Clock,
        bus: Bus,
        registry: Arc<VesselRegistry>,
        snapshot: Arc<SnapshotStore>,
        scraper: Arc<Scraper>,
        shutdown: watch::Receiver<bool>,
        data_limiter: Arc<RateLimiter>,
        static_limiter: Arc<RateLimiter>,
        cache_max_age: u32,
    ) -> Self {
        AppState {
            clock,
            bus,
            registry,
            snapshot,
            scraper,
            shutdown,
            data_limiter,
            static_limiter,
            cache_max_age,
            ws_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client_connected(&self) {
        self.ws_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.ws_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn ws_client_count(&self) -> usize {
        self.ws_clients.load(Ordering::Relaxed)
    }
}
