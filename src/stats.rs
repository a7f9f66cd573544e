// Statistics over a bridge's closure history.
//
// Consumes the newest-first history list and produces the block persisted
// under the bridge's static record: average closure duration, average
// raising-soon lead time, 95% confidence intervals, and the duration
// histogram. Also reports which completed entries contribute to neither
// series so the daily job can trim them from the history file.

use crate::model::{Ci, DurationBuckets, HistoryEntry, Statistics, TrackedStatus, MAX_HISTORY_ENTRIES};

/// Result of a statistics pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsOutcome {
    pub statistics: Statistics,
    /// Entry ids that carry no statistical weight and can be deleted.
    pub entries_to_delete: Vec<String>,
}

/// Compute statistics from a bridge's history (newest first).
///
/// Entries still open (no duration) are kept but contribute nothing.
/// Completed entries that are neither closures nor raising-soon leads are
/// marked for deletion. Running this twice over the same history yields the
/// same output.
pub fn calculate_bridge_statistics(history: &[HistoryEntry]) -> StatsOutcome {
    let mut entries_to_delete = Vec::new();
    let mut kept: Vec<&HistoryEntry> = Vec::new();

    let mut sorted: Vec<&HistoryEntry> = history.iter().collect();
    sorted.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    for entry in sorted {
        if entry.duration.is_none() {
            continue; // still open
        }
        match entry.status {
            TrackedStatus::Closed | TrackedStatus::RaisingSoon => kept.push(entry),
            _ => entries_to_delete.push(entry.id.clone()),
        }
    }

    if kept.len() > MAX_HISTORY_ENTRIES {
        for entry in &kept[MAX_HISTORY_ENTRIES..] {
            entries_to_delete.push(entry.id.clone());
        }
        kept.truncate(MAX_HISTORY_ENTRIES);
    }

    let mut closure_minutes: Vec<i64> = Vec::new();
    let mut raising_soon_minutes: Vec<i64> = Vec::new();
    let mut buckets = DurationBuckets::default();

    for entry in &kept {
        let seconds = entry.duration.unwrap_or(0);
        let minutes = round_to_minutes(seconds);
        match entry.status {
            TrackedStatus::Closed => {
                closure_minutes.push(minutes);
                bucket(&mut buckets, minutes);
            }
            TrackedStatus::RaisingSoon => raising_soon_minutes.push(minutes),
            _ => {}
        }
    }

    let statistics = Statistics {
        average_closure_duration: average(&closure_minutes),
        closure_ci: confidence_interval(&closure_minutes),
        average_raising_soon: average(&raising_soon_minutes),
        raising_soon_ci: confidence_interval(&raising_soon_minutes),
        closure_durations: buckets,
        total_entries: kept.len() as u32,
    };

    StatsOutcome {
        statistics,
        entries_to_delete,
    }
}

fn round_to_minutes(seconds: i64) -> i64 {
    (seconds as f64 / 60.0).round() as i64
}

fn bucket(buckets: &mut DurationBuckets, minutes: i64) {
    if minutes < 9 {
        buckets.under_9m += 1;
    } else if minutes <= 15 {
        buckets.from_10_to_15m += 1;
    } else if minutes <= 30 {
        buckets.from_16_to_30m += 1;
    } else if minutes <= 60 {
        buckets.from_31_to_60m += 1;
    } else {
        buckets.over_60m += 1;
    }
}

fn average(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.iter().sum();
    Some((sum as f64 / values.len() as f64).round() as i64)
}

/// 95% CI using the normal approximation with the sample standard deviation.
/// Needs at least two values.
fn confidence_interval(values: &[i64]) -> Option<Ci> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<i64>() as f64 / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let margin = 1.96 * (variance.sqrt() / n.sqrt());
    Some(Ci {
        lower: (mean - margin).max(0.0).floor() as i64,
        upper: (mean + margin).ceil() as i64,
    })
}
