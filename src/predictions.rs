// Prediction windows for the next status transition.
//
// Meaning depends on status: for Closed/Construction the window bounds when
// the bridge will open again; for Closing soon it bounds when the bridge
// will close. Open/Opening/Closing/Unknown carry no prediction.
//
// Pure function of (status, last_updated, statistics, closures, now) so the
// scraper and the tests share one code path.

use chrono::{DateTime, Duration, FixedOffset};

use crate::model::{BridgeStatus, Ci, Closure, ClosureKind, Prediction, Statistics};

/// Fallback closure interval when a bridge has no usable statistics yet.
const DEFAULT_CLOSURE_CI: Ci = Ci { lower: 15, upper: 20 };

/// Fallback lead-time interval between "raising soon" and the actual lift.
const DEFAULT_RAISING_SOON_CI: Ci = Ci { lower: 3, upper: 8 };

pub fn calculate_prediction(
    status: BridgeStatus,
    last_updated: DateTime<FixedOffset>,
    statistics: &Statistics,
    upcoming_closures: &[Closure],
    now: DateTime<FixedOffset>,
) -> Option<Prediction> {
    match status {
        BridgeStatus::Closed | BridgeStatus::Construction => {
            predict_reopening(status, last_updated, statistics, upcoming_closures, now)
        }
        BridgeStatus::ClosingSoon => {
            predict_closing(last_updated, statistics, upcoming_closures, now)
        }
        _ => None,
    }
}

fn predict_reopening(
    status: BridgeStatus,
    last_updated: DateTime<FixedOffset>,
    statistics: &Statistics,
    upcoming_closures: &[Closure],
    now: DateTime<FixedOffset>,
) -> Option<Prediction> {
    let elapsed_minutes = minutes_between(last_updated, now);
    let closure_ci = statistics.closure_ci.unwrap_or(DEFAULT_CLOSURE_CI);

    // A construction window with a known end is authoritative
    for closure in upcoming_closures {
        if closure.kind == ClosureKind::Construction {
            if let Some(end_time) = closure.end_time {
                if end_time > now && closure.time <= now {
                    return Some(Prediction { lower: end_time, upper: end_time });
                }
            }
        }
    }

    // Construction with no known end: unknown
    if status == BridgeStatus::Construction {
        return None;
    }

    // An active boat closure blends its expected duration with history
    if let Some(first) = upcoming_closures.first() {
        if first.kind.is_boat() && first.time <= now {
            if let Some(expected) = first
                .expected_duration_minutes
                .or_else(|| first.kind.expected_duration_minutes(first.longer))
            {
                let expected = expected as f64;
                let lower = (expected + closure_ci.lower as f64) / 2.0 - elapsed_minutes;
                let upper = (expected + closure_ci.upper as f64) / 2.0 - elapsed_minutes;
                return window(lower, upper, now);
            }
        }
    }

    // Pure statistics
    let lower = closure_ci.lower as f64 - elapsed_minutes;
    let upper = closure_ci.upper as f64 - elapsed_minutes;
    window(lower, upper, now)
}

fn predict_closing(
    last_updated: DateTime<FixedOffset>,
    statistics: &Statistics,
    upcoming_closures: &[Closure],
    now: DateTime<FixedOffset>,
) -> Option<Prediction> {
    if let Some(first) = upcoming_closures.first() {
        // Already due: clients surface "was expected at"
        if first.time <= now {
            return None;
        }
        // Within the hour: clients surface the literal closure time
        if first.time - now < Duration::hours(1) {
            return None;
        }
    }

    let elapsed_minutes = minutes_between(last_updated, now);
    let ci = statistics.raising_soon_ci.unwrap_or(DEFAULT_RAISING_SOON_CI);
    window(
        ci.lower as f64 - elapsed_minutes,
        ci.upper as f64 - elapsed_minutes,
        now,
    )
}

fn minutes_between(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

/// Build the window, clamping at "now". Both bounds in the past means the
/// closure is running longer than usual and no prediction is made.
fn window(lower: f64, upper: f64, now: DateTime<FixedOffset>) -> Option<Prediction> {
    if lower <= 0.0 && upper <= 0.0 {
        return None;
    }
    let offset = |minutes: f64| now + Duration::seconds((minutes.max(0.0) * 60.0).round() as i64);
    Some(Prediction {
        lower: offset(lower),
        upper: offset(upper),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(4 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .unwrap()
    }

    fn stats_with_closure_ci(lower: i64, upper: i64) -> Statistics {
        Statistics {
            closure_ci: Some(Ci { lower, upper }),
            ..Statistics::default()
        }
    }

    #[test]
    fn test_blended_prediction_with_active_commercial_closure() {
        // Closed 5 minutes, CI {8,16}, active commercial lift (E=15):
        // lower = (15+8)/2 - 5 = 6.5 min, upper = (15+16)/2 - 5 = 10.5 min
        let now = t0();
        let last_updated = now - Duration::minutes(5);
        let closure = Closure::new(
            ClosureKind::CommercialVessel,
            now - Duration::minutes(5),
            false,
        );

        let prediction = calculate_prediction(
            BridgeStatus::Closed,
            last_updated,
            &stats_with_closure_ci(8, 16),
            &[closure],
            now,
        )
        .unwrap();

        assert_eq!(prediction.lower, now + Duration::seconds(390));
        assert_eq!(prediction.upper, now + Duration::seconds(630));
    }

    #[test]
    fn test_prediction_exhausts_when_closure_runs_long() {
        // Closed 30 minutes with CI {8,16} and no boat closure: both bounds
        // are in the past, so no prediction
        let now = t0();
        let prediction = calculate_prediction(
            BridgeStatus::Closed,
            now - Duration::minutes(30),
            &stats_with_closure_ci(8, 16),
            &[],
            now,
        );
        assert!(prediction.is_none());
    }

    #[test]
    fn test_pure_statistics_prediction() {
        let now = t0();
        let prediction = calculate_prediction(
            BridgeStatus::Closed,
            now - Duration::minutes(5),
            &stats_with_closure_ci(8, 16),
            &[],
            now,
        )
        .unwrap();
        assert_eq!(prediction.lower, now + Duration::minutes(3));
        assert_eq!(prediction.upper, now + Duration::minutes(11));
    }

    #[test]
    fn test_default_ci_applies_without_statistics() {
        let now = t0();
        let prediction = calculate_prediction(
            BridgeStatus::Closed,
            now,
            &Statistics::default(),
            &[],
            now,
        )
        .unwrap();
        assert_eq!(prediction.lower, now + Duration::minutes(15));
        assert_eq!(prediction.upper, now + Duration::minutes(20));
    }

    #[test]
    fn test_lower_clamped_to_now() {
        // Elapsed past the lower bound but not the upper: lower clamps to now
        let now = t0();
        let prediction = calculate_prediction(
            BridgeStatus::Closed,
            now - Duration::minutes(18),
            &stats_with_closure_ci(15, 20),
            &[],
            now,
        )
        .unwrap();
        assert_eq!(prediction.lower, now);
        assert_eq!(prediction.upper, now + Duration::minutes(2));
    }

    #[test]
    fn test_construction_with_known_end() {
        let now = t0();
        let closure = Closure {
            kind: ClosureKind::Construction,
            time: now - Duration::hours(2),
            longer: false,
            end_time: Some(now + Duration::hours(3)),
            expected_duration_minutes: None,
        };
        let prediction = calculate_prediction(
            BridgeStatus::Construction,
            now - Duration::hours(2),
            &Statistics::default(),
            &[closure],
            now,
        )
        .unwrap();
        assert_eq!(prediction.lower, now + Duration::hours(3));
        assert_eq!(prediction.upper, now + Duration::hours(3));
    }

    #[test]
    fn test_construction_without_end_is_unknown() {
        let now = t0();
        let prediction = calculate_prediction(
            BridgeStatus::Construction,
            now - Duration::hours(2),
            &Statistics::default(),
            &[],
            now,
        );
        assert!(prediction.is_none());
    }

    #[test]
    fn test_closing_soon_with_imminent_closure_time() {
        // Closure 30 minutes out: clients show the literal time, no window
        let now = t0();
        let closure = Closure::new(ClosureKind::NextArrival, now + Duration::minutes(30), false);
        let prediction = calculate_prediction(
            BridgeStatus::ClosingSoon,
            now - Duration::minutes(1),
            &Statistics::default(),
            &[closure],
            now,
        );
        assert!(prediction.is_none());
    }

    #[test]
    fn test_closing_soon_with_overdue_closure_time() {
        let now = t0();
        let closure = Closure::new(ClosureKind::NextArrival, now - Duration::minutes(5), false);
        let prediction = calculate_prediction(
            BridgeStatus::ClosingSoon,
            now - Duration::minutes(1),
            &Statistics::default(),
            &[closure],
            now,
        );
        assert!(prediction.is_none());
    }

    #[test]
    fn test_closing_soon_with_distant_closure_uses_statistics() {
        let now = t0();
        let closure = Closure::new(ClosureKind::NextArrival, now + Duration::hours(2), false);
        let prediction = calculate_prediction(
            BridgeStatus::ClosingSoon,
            now - Duration::minutes(1),
            &Statistics::default(),
            &[closure],
            now,
        )
        .unwrap();
        // Default raising-soon CI {3,8} minus one elapsed minute
        assert_eq!(prediction.lower, now + Duration::minutes(2));
        assert_eq!(prediction.upper, now + Duration::minutes(7));
    }

    #[test]
    fn test_no_prediction_for_other_statuses() {
        let now = t0();
        for status in [
            BridgeStatus::Open,
            BridgeStatus::Opening,
            BridgeStatus::Closing,
            BridgeStatus::Unknown,
        ] {
            assert!(
                calculate_prediction(status, now, &Statistics::default(), &[], now).is_none(),
                "{status:?}"
            );
        }
    }
}
