// Recurring jobs.
//
// Each job is a sequential loop on its own task: a tick runs to completion
// before the next wait begins, so overlong ticks never stack and missed
// ticks coalesce. All cadence decisions are made in the configured regional
// zone. Shutdown is a watch channel; every loop exits on its next suspension
// point after the flag flips.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::bus::{Bus, Event};
use crate::clock::Clock;
use crate::net::aishub::AisHubPoller;
use crate::registry::VesselRegistry;
use crate::scraper::Scraper;

/// Daytime scrape cadence (06:00–21:59 local).
const SCRAPE_PERIOD_DAY: Duration = Duration::from_secs(20);
/// Nighttime scrape cadence (22:00–05:59 local).
const SCRAPE_PERIOD_NIGHT: Duration = Duration::from_secs(30);

/// Daily statistics recompute hour, local.
const STATISTICS_HOUR: u32 = 3;

const CLEANUP_PERIOD: Duration = Duration::from_secs(300);
const AISHUB_POLL_PERIOD: Duration = Duration::from_secs(61);
const BOATS_PROBE_PERIOD: Duration = Duration::from_secs(5);

/// Scrape period for the given local time.
pub fn scrape_period(now: &DateTime<Tz>) -> Duration {
    if (6..22).contains(&now.hour()) {
        SCRAPE_PERIOD_DAY
    } else {
        SCRAPE_PERIOD_NIGHT
    }
}

/// Instant of the next daily statistics run, strictly after `now`.
/// The 03:00 wall time always exists in zones that shift at 02:00; if a
/// zone ever skips it, the next representable hour is used.
pub fn next_statistics_run(clock: &Clock, now: DateTime<Tz>) -> DateTime<Tz> {
    let mut date = now.date_naive();
    loop {
        for hour in STATISTICS_HOUR..24 {
            let naive = date.and_hms_opt(hour, 0, 0);
            if let Some(candidate) = naive.and_then(|n| clock.localize(n)) {
                if candidate > now {
                    return candidate;
                }
                break; // today's slot already passed, try tomorrow
            }
        }
        date = next_day(date);
    }
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// Bridge scrape loop: fast by day, slower by night, one tick in flight.
pub async fn run_scrape_loop(
    scraper: Arc<Scraper>,
    clock: Clock,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Scrape loop started");
    loop {
        scraper.clone().tick().await;
        let period = scrape_period(&clock.now());
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Scrape loop stopped");
}

/// Daily statistics recompute at 03:00 local.
pub async fn run_statistics_loop(
    scraper: Arc<Scraper>,
    clock: Clock,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = clock.now();
        let next = next_statistics_run(&clock, now);
        let wait = (next - now).to_std().unwrap_or(Duration::from_secs(60));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = scraper.daily_statistics_update().await {
                    error!("Daily statistics failed: {e}");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Vessel cleanup every five minutes.
pub async fn run_cleanup_loop(registry: Arc<VesselRegistry>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(CLEANUP_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // immediate first tick is a no-op
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = registry.cleanup().await;
                if removed > 0 {
                    info!("Cleaned up {removed} stale vessels");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Aggregator polling at the upstream rate limit. The poller applies its own
/// failure backoff on top of this cadence.
pub async fn run_aishub_loop(mut poller: AisHubPoller, mut shutdown: watch::Receiver<bool>) {
    // Short grace so UDP data lands first
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        _ = shutdown.changed() => return,
    }
    info!("AISHub poller started");
    loop {
        poller.poll().await;
        tokio::select! {
            _ = tokio::time::sleep(AISHUB_POLL_PERIOD) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Boat-change probe: every five seconds build the boats payload, compare
/// its canonical bytes against the last broadcast, publish only on change.
/// The probe cadence doubles as the minimum gap between boat broadcasts.
pub async fn run_boats_probe(
    registry: Arc<VesselRegistry>,
    bus: Bus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(BOATS_PROBE_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_broadcast: Option<String> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let payload = registry.boats_payload().await;
                let canonical = payload.canonical_content();
                if last_broadcast.as_deref() != Some(canonical.as_str()) {
                    last_broadcast = Some(canonical);
                    bus.publish(Event::VesselRegistryChanged(Arc::new(payload)));
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn clock_at(utc_hour: u32, utc_minute: u32) -> (Clock, DateTime<Tz>) {
        // June: Toronto is UTC-4
        let instant = Utc
            .with_ymd_and_hms(2025, 6, 1, utc_hour, utc_minute, 0)
            .unwrap();
        let clock = Clock::fixed("America/Toronto", instant).unwrap();
        let now = clock.now();
        (clock, now)
    }

    #[test]
    fn test_scrape_period_day_vs_night() {
        // 12:00 local
        let (_, noon) = clock_at(16, 0);
        assert_eq!(scrape_period(&noon), SCRAPE_PERIOD_DAY);

        // 06:00 local is day
        let (_, morning) = clock_at(10, 0);
        assert_eq!(scrape_period(&morning), SCRAPE_PERIOD_DAY);

        // 21:59 local is still day
        let (_, evening) = clock_at(1, 59);
        assert_eq!(scrape_period(&evening), SCRAPE_PERIOD_DAY);

        // 22:00 local is night
        let (_, night) = clock_at(2, 0);
        assert_eq!(scrape_period(&night), SCRAPE_PERIOD_NIGHT);

        // 05:30 local is night
        let (_, late) = clock_at(9, 30);
        assert_eq!(scrape_period(&late), SCRAPE_PERIOD_NIGHT);
    }

    #[test]
    fn test_next_statistics_run_today() {
        // 01:00 local: today's 03:00 is ahead
        let (clock, now) = clock_at(5, 0);
        let next = next_statistics_run(&clock, now);
        assert_eq!(next.hour(), 3);
        assert_eq!(next.date_naive(), now.date_naive());
    }

    #[test]
    fn test_next_statistics_run_tomorrow() {
        // 12:00 local: today's 03:00 has passed
        let (clock, now) = clock_at(16, 0);
        let next = next_statistics_run(&clock, now);
        assert_eq!(next.hour(), 3);
        assert_eq!(next.date_naive(), now.date_naive().succ_opt().unwrap());
    }

    #[test]
    fn test_next_statistics_run_across_dst() {
        // 23:00 local on the night before spring-forward (2025-03-09 in
        // Toronto); 03:00 exists on both sides of the transition
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 4, 0, 0).unwrap();
        let clock = Clock::fixed("America/Toronto", instant).unwrap();
        let now = clock.now();
        let next = next_statistics_run(&clock, now);
        assert!(next > now);
        assert_eq!(next.hour(), 3);
        // 23:00 on March 8 local rolls over to 03:00 EDT on March 9
        assert_eq!(next.date_naive(), now.date_naive().succ_opt().unwrap());
    }
}
