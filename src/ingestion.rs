//! Checkpointed backfill over the host's sensor queries
//!
//! Each feed keeps a persisted checkpoint: the `until` bound of the last range
//! that was queried and fully processed. The next backfill starts there, or 24
//! hours back when no checkpoint exists. Querying never moves the checkpoint;
//! the caller commits it once the results are persisted. A failed query or a
//! failed write leaves it where it was so the same range is retried on the
//! next wake.

use crate::error::CoreError;
use crate::storage::Storage;
use crate::types::{LocationSample, MotionWindow, StairsWindow};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lookback used when a feed has never been processed
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Result of one source query
#[derive(Debug, Clone, PartialEq)]
pub struct Backfill<T> {
    pub items: Vec<T>,
    pub success: bool,
}

impl<T> Backfill<T> {
    pub fn ok(items: Vec<T>) -> Self {
        Self {
            items,
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            items: Vec::new(),
            success: false,
        }
    }
}

/// Step and activity windows from the motion coprocessor
pub trait MotionSource: Send + Sync {
    fn query_motion(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Backfill<MotionWindow>;
}

/// Floor counts from the pedometer
pub trait StairsSource: Send + Sync {
    fn query_stairs(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Backfill<StairsWindow>;
}

/// Location fixes delivered since the last wake
pub trait LocationSource: Send + Sync {
    fn query_locations(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Backfill<LocationSample>;
}

/// What woke the app for a processing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    Scheduled,
    SignificantLocationChange,
    Visit,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::Scheduled => "scheduled",
            WakeReason::SignificantLocationChange => "significant_location_change",
            WakeReason::Visit => "visit",
        }
    }
}

/// Independently checkpointed input feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Motion,
    Stairs,
    Location,
}

impl Feed {
    pub fn checkpoint_key(&self) -> &'static str {
        match self {
            Feed::Motion => "motion.last_activity_processed_at",
            Feed::Stairs => "motion.last_pedometer_processed_at",
            Feed::Location => "location.last_processed_at",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Motion => "motion",
            Feed::Stairs => "stairs",
            Feed::Location => "location",
        }
    }
}

/// Runs source queries between the stored checkpoint and `until`
#[derive(Clone)]
pub struct Ingestor {
    storage: Storage,
}

impl Ingestor {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn checkpoint(&self, feed: Feed) -> Option<DateTime<Utc>> {
        self.storage.timestamp(feed.checkpoint_key())
    }

    /// Start of the next query range for `feed`
    pub fn since(&self, feed: Feed, until: DateTime<Utc>) -> DateTime<Utc> {
        self.checkpoint(feed)
            .unwrap_or_else(|| until - Duration::hours(DEFAULT_LOOKBACK_HOURS))
    }

    /// Query `feed` from its checkpoint to `until`. The checkpoint is left in
    /// place; call [`Ingestor::commit`] once the results are processed.
    pub fn backfill_since_last<T, F>(&self, feed: Feed, until: DateTime<Utc>, query: F) -> Backfill<T>
    where
        F: FnOnce(DateTime<Utc>, DateTime<Utc>) -> Backfill<T>,
    {
        let since = self.since(feed, until);
        let result = query(since, until);

        if result.success {
            log::debug!(
                "{} backfill returned {} items up to {}",
                feed.as_str(),
                result.items.len(),
                until.to_rfc3339()
            );
        } else {
            log::warn!(
                "{} backfill {} .. {} failed; checkpoint kept",
                feed.as_str(),
                since.to_rfc3339(),
                until.to_rfc3339()
            );
        }
        result
    }

    /// Advance the checkpoint of `feed` to `until` after a successful query
    /// (empty results included) has been processed
    pub fn commit(&self, feed: Feed, until: DateTime<Utc>) -> Result<(), CoreError> {
        self.storage.set_timestamp(feed.checkpoint_key(), Some(until))
    }

    pub fn backfill_motion(&self, source: &dyn MotionSource, until: DateTime<Utc>) -> Backfill<MotionWindow> {
        self.backfill_since_last(Feed::Motion, until, |since, until| {
            source.query_motion(since, until)
        })
    }

    pub fn backfill_stairs(&self, source: &dyn StairsSource, until: DateTime<Utc>) -> Backfill<StairsWindow> {
        self.backfill_since_last(Feed::Stairs, until, |since, until| {
            source.query_stairs(since, until)
        })
    }

    pub fn backfill_locations(
        &self,
        source: &dyn LocationSource,
        until: DateTime<Utc>,
    ) -> Backfill<LocationSample> {
        self.backfill_since_last(Feed::Location, until, |since, until| {
            source.query_locations(since, until)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 20, h, 0, 0).unwrap()
    }

    struct ScriptedMotion {
        success: bool,
        ranges: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl ScriptedMotion {
        fn new(success: bool) -> Self {
            Self {
                success,
                ranges: Mutex::new(Vec::new()),
            }
        }
    }

    impl MotionSource for ScriptedMotion {
        fn query_motion(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Backfill<MotionWindow> {
            self.ranges.lock().unwrap().push((since, until));
            if self.success {
                Backfill::ok(Vec::new())
            } else {
                Backfill::failed()
            }
        }
    }

    #[test]
    fn test_first_backfill_looks_back_a_day() {
        let ingestor = Ingestor::new(Storage::in_memory());
        let source = ScriptedMotion::new(true);

        ingestor.backfill_motion(&source, at(12));

        let ranges = source.ranges.lock().unwrap();
        assert_eq!(ranges[0], (at(12) - Duration::hours(24), at(12)));
    }

    #[test]
    fn test_query_alone_keeps_checkpoint() {
        let ingestor = Ingestor::new(Storage::in_memory());
        let source = ScriptedMotion::new(true);

        assert!(ingestor.backfill_motion(&source, at(12)).success);
        assert_eq!(ingestor.checkpoint(Feed::Motion), None);

        ingestor.backfill_motion(&source, at(13));
        let ranges = source.ranges.lock().unwrap();
        assert_eq!(ranges[1], (at(13) - Duration::hours(24), at(13)));
    }

    #[test]
    fn test_empty_success_advances_checkpoint() {
        let ingestor = Ingestor::new(Storage::in_memory());
        let source = ScriptedMotion::new(true);

        let result = ingestor.backfill_motion(&source, at(12));
        assert!(result.success);
        assert!(result.items.is_empty());
        ingestor.commit(Feed::Motion, at(12)).unwrap();
        assert_eq!(ingestor.checkpoint(Feed::Motion), Some(at(12)));

        ingestor.backfill_motion(&source, at(15));
        assert_eq!(source.ranges.lock().unwrap()[1], (at(12), at(15)));
    }

    #[test]
    fn test_failure_keeps_checkpoint() {
        let storage = Storage::in_memory();
        storage
            .set_timestamp(Feed::Motion.checkpoint_key(), Some(at(6)))
            .unwrap();
        let ingestor = Ingestor::new(storage);
        let failing = ScriptedMotion::new(false);

        let result = ingestor.backfill_motion(&failing, at(12));

        assert!(!result.success);
        assert_eq!(ingestor.checkpoint(Feed::Motion), Some(at(6)));

        // The retry covers the same range again
        let retry = ScriptedMotion::new(true);
        ingestor.backfill_motion(&retry, at(13));
        assert_eq!(retry.ranges.lock().unwrap()[0], (at(6), at(13)));
    }

    #[test]
    fn test_feeds_checkpoint_independently() {
        let ingestor = Ingestor::new(Storage::in_memory());
        ingestor.commit(Feed::Stairs, at(9)).unwrap();

        assert_eq!(ingestor.checkpoint(Feed::Stairs), Some(at(9)));
        assert_eq!(ingestor.checkpoint(Feed::Motion), None);
        assert_eq!(ingestor.checkpoint(Feed::Location), None);
    }

    #[test]
    fn test_wake_reason_serializes_snake_case() {
        let json = serde_json::to_string(&WakeReason::SignificantLocationChange).unwrap();
        assert_eq!(json, "\"significant_location_change\"");
    }
}
