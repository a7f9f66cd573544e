// Bridge scraper: per-region fetch, normalize, diff, commit, broadcast.
//
// Each tick processes all regions through a small worker pool. A region owns
// a backoff record and a cached endpoint shape; failures are local to the
// region and never give up. Observable changes rewrite the snapshot
// atomically and publish a bridges event after the rename completes.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::attribution::find_responsible_vessel;
use crate::bus::{Bus, Event};
use crate::clock::Clock;
use crate::model::{
    BridgeLive, BridgeRecord, BridgeStatic, BridgeStatus, Coordinates, Statistics, TrackedStatus,
};
use crate::persist::{HistoryStore, SnapshotStore};
use crate::predictions::calculate_prediction;
use crate::regions::{bridge_id, region_roster, BridgeRegion, REGIONS};
use crate::registry::VesselRegistry;
use crate::stats::calculate_bridge_statistics;
use crate::upstream::{parse_feed, EndpointShape, RawBridge, UpstreamFeed};

/// Worker pool width for one tick.
const SCRAPE_CONCURRENCY: usize = 4;

/// In-tick fetch attempts and the pause between them.
const FETCH_ATTEMPTS: u32 = 3;
const FETCH_RETRY_DELAY_MS: u64 = 500;

const BACKOFF_CAP_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no data from either endpoint shape")]
    NoData,
}

/// Per-region failure record.
#[derive(Debug, Clone, Copy)]
pub struct RegionBackoff {
    pub failure_count: u32,
    pub next_retry: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegionOutcome {
    Skipped,
    Failed,
    Updated { changed: bool },
}

pub struct Scraper {
    clock: Clock,
    bus: Bus,
    registry: Arc<VesselRegistry>,
    snapshot: Arc<SnapshotStore>,
    history: Arc<HistoryStore>,
    client: reqwest::Client,
    /// Client with TLS verification disabled, built only when a host is
    /// explicitly configured for the broken-certificate workaround.
    insecure_client: Option<reqwest::Client>,
    insecure_host: Option<String>,
    old_endpoint: String,
    new_endpoint: String,
    backoff: Mutex<HashMap<&'static str, RegionBackoff>>,
    endpoint_cache: Mutex<HashMap<&'static str, EndpointShape>>,
    last_scrape: RwLock<Option<DateTime<FixedOffset>>>,
    last_scrape_had_changes: AtomicBool,
    last_observable_change: RwLock<Option<DateTime<FixedOffset>>>,
    statistics_last_updated: RwLock<Option<DateTime<FixedOffset>>>,
}

impl Scraper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Clock,
        bus: Bus,
        registry: Arc<VesselRegistry>,
        snapshot: Arc<SnapshotStore>,
        history: Arc<HistoryStore>,
        client: reqwest::Client,
        insecure_client: Option<reqwest::Client>,
        insecure_host: Option<String>,
        old_endpoint: String,
        new_endpoint: String,
    ) -> Self {
        Scraper {
            clock,
            bus,
            registry,
            snapshot,
            history,
            client,
            insecure_client,
            insecure_host,
            old_endpoint,
            new_endpoint,
            backoff: Mutex::new(HashMap::new()),
            endpoint_cache: Mutex::new(HashMap::new()),
            last_scrape: RwLock::new(None),
            last_scrape_had_changes: AtomicBool::new(false),
            last_observable_change: RwLock::new(None),
            statistics_last_updated: RwLock::new(None),
        }
    }

    /// One scrape tick over all regions, bounded by the worker pool.
    pub async fn tick(self: Arc<Self>) {
        let started = self.clock.now().fixed_offset();
        let semaphore = Arc::new(Semaphore::new(SCRAPE_CONCURRENCY));
        let mut join_set = JoinSet::new();

        for region in &REGIONS {
            let scraper = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return RegionOutcome::Skipped,
                };
                scraper.process_region(region).await
            });
        }

        let mut success = 0u32;
        let mut failed = 0u32;
        let mut changed = false;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(RegionOutcome::Updated { changed: c }) => {
                    success += 1;
                    changed |= c;
                }
                Ok(RegionOutcome::Failed) => failed += 1,
                Ok(RegionOutcome::Skipped) => {}
                Err(e) => {
                    error!("Region task panicked: {e}");
                    failed += 1;
                }
            }
        }

        *self.last_scrape.write().await = Some(started);
        self.last_scrape_had_changes.store(changed, Ordering::Relaxed);
        debug!("Scrape done: {success} ok, {failed} failed, changed={changed}");
    }

    async fn process_region(&self, region: &'static BridgeRegion) -> RegionOutcome {
        let now = self.clock.now().fixed_offset();
        {
            let backoff = self.backoff.lock().await;
            if let Some(entry) = backoff.get(region.key) {
                if now < entry.next_retry {
                    let wait = (entry.next_retry - now).num_seconds();
                    debug!(
                        "{}: waiting {wait}s before retry (attempt #{})",
                        region.name, entry.failure_count
                    );
                    return RegionOutcome::Skipped;
                }
            }
        }

        match self.fetch_region(region).await {
            Ok(bridges) if !bridges.is_empty() => {
                let changed = match self.apply_region(region, bridges).await {
                    Ok(changed) => changed,
                    Err(e) => {
                        // Persistence failures are logged, never retried; the
                        // next successful change overwrites
                        error!("{}: snapshot write failed: {e}", region.name);
                        false
                    }
                };
                let mut backoff = self.backoff.lock().await;
                if let Some(entry) = backoff.remove(region.key) {
                    info!(
                        "{}: recovered after {} failures",
                        region.name, entry.failure_count
                    );
                }
                RegionOutcome::Updated { changed }
            }
            Ok(_) => {
                self.record_failure(region, "empty feed").await;
                RegionOutcome::Failed
            }
            Err(e) => {
                self.record_failure(region, &e.to_string()).await;
                RegionOutcome::Failed
            }
        }
    }

    /// Fetch a region's feed, discovering which endpoint shape it speaks.
    /// The working shape is cached; on failure the other shape is tried.
    async fn fetch_region(
        &self,
        region: &'static BridgeRegion,
    ) -> Result<Vec<RawBridge>, ScrapeError> {
        let cached = {
            let cache = self.endpoint_cache.lock().await;
            cache.get(region.key).copied().unwrap_or(EndpointShape::Old)
        };

        let mut last_error = ScrapeError::NoData;
        for shape in [cached, cached.other()] {
            let base = match shape {
                EndpointShape::Old => &self.old_endpoint,
                EndpointShape::New => &self.new_endpoint,
            };
            let url = format!("{base}{}", region.key);
            let feed = match self.fetch_feed(&url).await {
                Ok(feed) => feed,
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };

            let has_expected_shape = match shape {
                EndpointShape::Old => feed.has_old_data(),
                EndpointShape::New => feed.has_new_data(),
            };
            let effective = if has_expected_shape {
                shape
            } else if shape == EndpointShape::Old && feed.has_new_data() {
                // The old endpoint answered with the new shape
                EndpointShape::New
            } else {
                continue;
            };

            let mut cache = self.endpoint_cache.lock().await;
            if cache.get(region.key) != Some(&effective) {
                info!("{}: {:?} endpoint shape works, caching", region.key, effective);
                cache.insert(region.key, effective);
            }
            return Ok(parse_feed(&feed, effective, &self.clock));
        }

        Err(last_error)
    }

    async fn fetch_feed(&self, url: &str) -> Result<UpstreamFeed, ScrapeError> {
        let client = self.client_for(url);
        let mut last_error: Option<reqwest::Error> = None;
        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(FETCH_RETRY_DELAY_MS)).await;
            }
            match client.get(url).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => match response.json::<UpstreamFeed>().await {
                        Ok(feed) => return Ok(feed),
                        Err(e) => last_error = Some(e),
                    },
                    Err(e) => last_error = Some(e),
                },
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.map(ScrapeError::Http).unwrap_or(ScrapeError::NoData))
    }

    fn client_for(&self, url: &str) -> &reqwest::Client {
        if let (Some(host), Some(insecure)) = (&self.insecure_host, &self.insecure_client) {
            if reqwest::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
                .unwrap_or(false)
            {
                return insecure;
            }
        }
        &self.client
    }

    /// Merge a region's parsed bridges against the stored snapshot; commit
    /// and broadcast when anything changed observably.
    pub async fn apply_region(
        &self,
        region: &'static BridgeRegion,
        raw_bridges: Vec<RawBridge>,
    ) -> io::Result<bool> {
        let now = self.clock.now().fixed_offset();
        let current = self.snapshot.current().await;
        let vessels = self.registry.snapshot().await;
        let regional_vessels: Vec<_> = vessels
            .into_iter()
            .filter(|v| v.region == region.boat_region)
            .collect();

        let mut updated: Vec<(String, BridgeRecord)> = Vec::new();

        for raw in raw_bridges {
            let id = bridge_id(region.short, &raw.name);
            let status = BridgeStatus::from_raw(&raw.raw_status);
            let existing = current.bridges.get(&id);

            let candidate = BridgeLive {
                status,
                last_updated: now,
                predicted: None,
                upcoming_closures: raw.upcoming_closures,
                responsible_vessel_mmsi: None,
            };

            if let Some(old) = existing {
                if old.live.observable_eq(&candidate) {
                    continue;
                }
            }

            // Status transitions feed the history file; closure-only changes
            // map to the same tracked status and no-op there
            self.history
                .record_transition(&id, TrackedStatus::from(status), now)
                .await?;

            let statistics = existing
                .map(|record| record.static_info.statistics.clone())
                .unwrap_or_default();
            let last_updated = match existing {
                Some(old) if old.live.status == status => old.live.last_updated,
                _ => now,
            };

            let coordinates = region_roster(region.short)
                .iter()
                .find(|site| site.name == raw.name)
                .map(|site| Coordinates { lat: site.lat, lng: site.lng })
                .unwrap_or(Coordinates { lat: 0.0, lng: 0.0 });

            let predicted = calculate_prediction(
                status,
                last_updated,
                &statistics,
                &candidate.upcoming_closures,
                now,
            );
            let responsible_vessel_mmsi = find_responsible_vessel(
                coordinates.lat,
                coordinates.lng,
                status,
                &regional_vessels,
            );

            updated.push((
                id,
                BridgeRecord {
                    static_info: BridgeStatic {
                        name: raw.name,
                        region: region.name.to_string(),
                        region_short: region.short.to_string(),
                        coordinates,
                        statistics,
                    },
                    live: BridgeLive {
                        status,
                        last_updated,
                        predicted,
                        upcoming_closures: candidate.upcoming_closures,
                        responsible_vessel_mmsi,
                    },
                },
            ));
        }

        if updated.is_empty() {
            return Ok(false);
        }

        let next = self
            .snapshot
            .commit(|snapshot| {
                for (id, record) in updated {
                    snapshot.bridges.insert(id, record);
                }
                snapshot.last_updated = Some(now);
            })
            .await?;

        *self.last_observable_change.write().await = Some(now);
        self.bus.publish(Event::BridgeSnapshotChanged(next));
        Ok(true)
    }

    async fn record_failure(&self, region: &'static BridgeRegion, message: &str) {
        let now = self.clock.now().fixed_offset();
        let mut backoff = self.backoff.lock().await;
        let failure_count = backoff
            .get(region.key)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
            + 1;
        let wait = backoff_seconds(failure_count);
        backoff.insert(region.key, RegionBackoff {
            failure_count,
            next_retry: now + Duration::seconds(wait),
        });
        if failure_count == 1 {
            error!("{}: {message}", region.name);
        } else {
            error!(
                "{}: {message} (attempt #{failure_count}, retry in {wait}s)",
                region.name
            );
        }
    }

    /// Recompute statistics for every bridge from its history file, trim the
    /// files, and persist the blocks into the snapshot. Idempotent.
    pub async fn daily_statistics_update(&self) -> io::Result<()> {
        let now = self.clock.now().fixed_offset();
        let current = self.snapshot.current().await;
        let mut computed: HashMap<String, Statistics> = HashMap::new();

        for id in current.bridges.keys() {
            let history = self.history.read(id);
            if history.is_empty() {
                continue;
            }
            let outcome = calculate_bridge_statistics(&history);
            if !outcome.entries_to_delete.is_empty() {
                let trimmed: Vec<_> = history
                    .into_iter()
                    .filter(|entry| !outcome.entries_to_delete.contains(&entry.id))
                    .collect();
                self.history.rewrite(id, trimmed).await?;
            }
            computed.insert(id.clone(), outcome.statistics);
        }

        let count = computed.len();
        if count > 0 {
            self.snapshot
                .commit(|snapshot| {
                    for (id, statistics) in computed {
                        if let Some(record) = snapshot.bridges.get_mut(&id) {
                            record.static_info.statistics = statistics;
                        }
                    }
                    snapshot.last_updated = Some(now);
                })
                .await?;
        }
        *self.statistics_last_updated.write().await = Some(now);
        info!("Statistics update complete: {count} bridges");
        Ok(())
    }

    // Health accessors

    pub async fn last_scrape(&self) -> Option<DateTime<FixedOffset>> {
        *self.last_scrape.read().await
    }

    pub fn last_scrape_had_changes(&self) -> bool {
        self.last_scrape_had_changes.load(Ordering::Relaxed)
    }

    pub async fn last_observable_change(&self) -> Option<DateTime<FixedOffset>> {
        *self.last_observable_change.read().await
    }

    pub async fn statistics_last_updated(&self) -> Option<DateTime<FixedOffset>> {
        *self.statistics_last_updated.read().await
    }

    /// Worst failure streak across regions, for the health indicator.
    pub async fn max_region_failures(&self) -> u32 {
        self.backoff
            .lock()
            .await
            .values()
            .map(|entry| entry.failure_count)
            .max()
            .unwrap_or(0)
    }

    #[cfg(test)]
    async fn backoff_for(&self, key: &str) -> Option<RegionBackoff> {
        self.backoff.lock().await.get(key).copied()
    }
}

/// Exponential region backoff: min(2^k, 300) seconds for k failures.
pub fn backoff_seconds(failure_count: u32) -> i64 {
    2i64.saturating_pow(failure_count.min(16)).min(BACKOFF_CAP_SECS)
}
