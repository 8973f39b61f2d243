//! Stair event aggregation
//!
//! Floor deltas are summed into fixed-size buckets aligned to wall-clock
//! boundaries (integer division of Unix time by the bucket size), so the same
//! window always lands in the same bucket no matter which query range
//! delivered it. Each window counts toward the bucket holding its end time.

use crate::config::StairsConfig;
use crate::types::{PlaceType, StairEvent, StairsWindow};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Default)]
struct BucketTotals {
    floors_up: u32,
    floors_down: u32,
}

/// Bucket index for a window ending at `end`.
///
/// An end exactly on a boundary closes the earlier bucket, so a window
/// `[10:00, 10:02]` with 2-minute buckets lands in `[10:00, 10:02]`.
pub fn bucket_index(end: DateTime<Utc>, bucket_ms: i64) -> i64 {
    (end.timestamp_millis() - 1).div_euclid(bucket_ms)
}

fn bucket_end(index: i64, bucket_ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((index + 1).checked_mul(bucket_ms)?)
        .single()
}

/// Emit one stair event per bucket whose climb or descent reaches
/// `min_delta_floors`. Buckets with no floors at all are never emitted.
pub fn detect_events(
    windows: &[StairsWindow],
    window_minutes: u32,
    min_delta_floors: u32,
    context: PlaceType,
) -> Vec<StairEvent> {
    let bucket_ms = i64::from(window_minutes.max(1)) * 60_000;

    let mut buckets: BTreeMap<i64, BucketTotals> = BTreeMap::new();
    for window in windows {
        let totals = buckets.entry(bucket_index(window.end, bucket_ms)).or_default();
        totals.floors_up = totals.floors_up.saturating_add(window.floors_up);
        totals.floors_down = totals.floors_down.saturating_add(window.floors_down);
    }

    buckets
        .into_iter()
        .filter(|(_, t)| t.floors_up > 0 || t.floors_down > 0)
        .filter(|(_, t)| t.floors_up >= min_delta_floors || t.floors_down >= min_delta_floors)
        .filter_map(|(index, totals)| {
            let timestamp = bucket_end(index, bucket_ms)?;
            Some(StairEvent {
                id: Uuid::new_v4(),
                timestamp,
                flights_up: totals.floors_up,
                flights_down: totals.floors_down,
                context,
            })
        })
        .collect()
}

/// Stair aggregator bound to a configuration
pub struct StairEventAggregator {
    window_minutes: u32,
    min_delta_floors: u32,
}

impl StairEventAggregator {
    pub fn new(config: &StairsConfig) -> Self {
        Self {
            window_minutes: config.window_minutes,
            min_delta_floors: config.min_delta_floors,
        }
    }

    pub fn detect(&self, windows: &[StairsWindow], context: PlaceType) -> Vec<StairEvent> {
        detect_events(windows, self.window_minutes, self.min_delta_floors, context)
    }
}
