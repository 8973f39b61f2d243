//! Processing cycle orchestration
//!
//! A cycle runs on every wake: backfill each feed from its checkpoint, run the
//! detectors over what came back, persist the derived events, then let the
//! nudge policy look at the most recent sedentary streak. A feed's checkpoint
//! is committed only after everything derived from it has been written.
//!
//! The sedentary run still open at the end of a cycle is persisted and fed
//! into the next one, so sitting through several wakes builds up a single
//! streak that is extended in place as it grows.

use crate::aggregate::{DailyAggregator, DayEvents};
use crate::config::AppConfig;
use crate::detectors::{
    CommuteSessionizer, OpenSegment, SedentaryStreakTracker, StairEventAggregator, WalkBoutSegmenter,
};
use crate::error::CoreError;
use crate::ingestion::{Feed, Ingestor, LocationSource, MotionSource, StairsSource, WakeReason};
use crate::policy::{NotificationDispatcher, NudgeDecision, NudgePolicyEngine, SuppressReason};
use crate::storage::{Storage, StoredEvent};
use crate::types::{
    CommuteSession, DailyAggregate, MotionWindow, PlaceType, SedentaryStreak, StairEvent, WalkBout,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Most recent streaks considered when resolving and nudging
const RECENT_STREAK_LIMIT: usize = 64;

/// Sedentary run left open by the last processed motion batch
const OPEN_SEGMENT_KEY: &str = "sedentary.open_segment";

/// Bouts and streaks derived from one batch of motion windows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionEvents {
    pub bouts: Vec<WalkBout>,
    pub streaks: Vec<SedentaryStreak>,
    /// Sedentary run still open at the end of the batch
    pub open: Option<OpenSegment>,
}

/// Run both motion detectors over `windows`.
///
/// Invalid windows are dropped. Streaks are resolved against the bouts found
/// in the same batch.
pub fn segment_motion(
    windows: &[MotionWindow],
    config: &AppConfig,
    created_at: DateTime<Utc>,
) -> MotionEvents {
    segment_motion_continuing(None, windows, config, created_at)
}

/// [`segment_motion`] picking up the sedentary run left open by the
/// previous batch
pub fn segment_motion_continuing(
    carried: Option<OpenSegment>,
    windows: &[MotionWindow],
    config: &AppConfig,
    created_at: DateTime<Utc>,
) -> MotionEvents {
    let valid: Vec<MotionWindow> = windows
        .iter()
        .filter(|w| match w.validate() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("skipping motion window: {}", e);
                false
            }
        })
        .cloned()
        .collect();

    let bouts = WalkBoutSegmenter::new(&config.walk_bout).detect(&valid, created_at);
    let tracker = SedentaryStreakTracker::new(&config.sedentary);
    let (mut streaks, mut open) = tracker.detect_continuing(carried, &valid);
    tracker.resolve(&mut streaks, &bouts);

    // A bout can end the open run even when the walking windows alone did not
    let closed = open
        .as_ref()
        .is_some_and(|o| streaks.iter().any(|s| s.id == o.id && s.resolved_by_walk));
    if closed {
        open = None;
    }

    MotionEvents {
        bouts,
        streaks,
        open,
    }
}

/// Outcome of one feed within a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// A source was registered and queried
    pub queried: bool,
    pub success: bool,
    pub items: usize,
}

/// Summary of one processing cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub wake: WakeReason,
    pub at: DateTime<Utc>,
    pub motion: FeedStatus,
    pub stairs: FeedStatus,
    pub location: FeedStatus,
    pub bouts: usize,
    pub stair_events: usize,
    pub streaks: usize,
    pub commutes: usize,
    pub streaks_resolved: usize,
    pub nudge_fired: bool,
    pub nudge_suppressed: Option<SuppressReason>,
}

impl CycleReport {
    fn new(wake: WakeReason, at: DateTime<Utc>) -> Self {
        Self {
            wake,
            at,
            motion: FeedStatus::default(),
            stairs: FeedStatus::default(),
            location: FeedStatus::default(),
            bouts: 0,
            stair_events: 0,
            streaks: 0,
            commutes: 0,
            streaks_resolved: 0,
            nudge_fired: false,
            nudge_suppressed: None,
        }
    }
}

/// Stateful processor wiring sources, detectors, storage and the nudge policy
pub struct MovementProcessor {
    config: AppConfig,
    storage: Storage,
    ingestor: Ingestor,
    engine: NudgePolicyEngine,
    place: PlaceType,
    motion_source: Option<Arc<dyn MotionSource>>,
    stairs_source: Option<Arc<dyn StairsSource>>,
    location_source: Option<Arc<dyn LocationSource>>,
}

impl MovementProcessor {
    pub fn new(
        config: AppConfig,
        storage: Storage,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let engine = NudgePolicyEngine::new(&config, storage.clone(), dispatcher);
        Self {
            ingestor: Ingestor::new(storage.clone()),
            config,
            storage,
            engine,
            place: PlaceType::Other,
            motion_source: None,
            stairs_source: None,
            location_source: None,
        }
    }

    pub fn with_motion_source(mut self, source: Arc<dyn MotionSource>) -> Self {
        self.motion_source = Some(source);
        self
    }

    pub fn with_stairs_source(mut self, source: Arc<dyn StairsSource>) -> Self {
        self.stairs_source = Some(source);
        self
    }

    pub fn with_location_source(mut self, source: Arc<dyn LocationSource>) -> Self {
        self.location_source = Some(source);
        self
    }

    /// Place attached to stair events from subsequent cycles
    pub fn set_place(&mut self, place: PlaceType) {
        self.place = place;
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &NudgePolicyEngine {
        &self.engine
    }

    fn persist<E: StoredEvent>(&self, events: &[E]) -> Result<(), CoreError> {
        self.storage.append_events(events).map_err(|e| {
            log::warn!("cannot persist {} {} events: {}", events.len(), E::KIND, e);
            e
        })
    }

    fn commit(&self, feed: Feed, now: DateTime<Utc>, processed: Result<(), CoreError>) {
        let committed = processed.and_then(|()| self.ingestor.commit(feed, now));
        if let Err(e) = committed {
            log::warn!("{} checkpoint kept: {}", feed.as_str(), e);
        }
    }

    /// Run one cycle. Feed failures are reported, never escalated.
    pub fn run_cycle(&self, now: DateTime<Utc>, wake: WakeReason) -> CycleReport {
        log::info!("cycle started ({})", wake.as_str());
        let mut report = CycleReport::new(wake, now);

        // Feeds run strictly one after another
        if let Some(source) = &self.motion_source {
            let backfill = self.ingestor.backfill_motion(source.as_ref(), now);
            report.motion = FeedStatus {
                queried: true,
                success: backfill.success,
                items: backfill.items.len(),
            };
            if backfill.success {
                let processed = self.process_motion(&backfill.items, now, &mut report);
                self.commit(Feed::Motion, now, processed);
            }
        }

        if let Some(source) = &self.stairs_source {
            let backfill = self.ingestor.backfill_stairs(source.as_ref(), now);
            report.stairs = FeedStatus {
                queried: true,
                success: backfill.success,
                items: backfill.items.len(),
            };
            if backfill.success {
                let events = StairEventAggregator::new(&self.config.stairs)
                    .detect(&backfill.items, self.place);
                report.stair_events = events.len();
                self.commit(Feed::Stairs, now, self.persist(&events));
            }
        }

        if let Some(source) = &self.location_source {
            let backfill = self.ingestor.backfill_locations(source.as_ref(), now);
            report.location = FeedStatus {
                queried: true,
                success: backfill.success,
                items: backfill.items.len(),
            };
            if backfill.success {
                let sessions = CommuteSessionizer::new(&self.config.commute).detect(&backfill.items);
                report.commutes = sessions.len();
                self.commit(Feed::Location, now, self.persist(&sessions));
            }
        }

        self.evaluate_latest_streak(now, &mut report);

        log::info!(
            "cycle finished: {} bouts, {} stair events, {} streaks, {} commutes, nudge fired: {}",
            report.bouts,
            report.stair_events,
            report.streaks,
            report.commutes,
            report.nudge_fired
        );
        report
    }

    fn open_segment(&self) -> Option<OpenSegment> {
        let raw = self.storage.text(OPEN_SEGMENT_KEY)?;
        serde_json::from_str(&raw)
            .map_err(|e| log::warn!("ignoring malformed open sedentary segment: {}", e))
            .ok()
    }

    fn process_motion(
        &self,
        windows: &[MotionWindow],
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), CoreError> {
        let events = segment_motion_continuing(self.open_segment(), windows, &self.config, now);
        report.bouts = events.bouts.len();
        report.streaks = events.streaks.len();

        self.persist(&events.bouts)?;

        if !events.bouts.is_empty() || !events.streaks.is_empty() {
            let tracker = SedentaryStreakTracker::new(&self.config.sedentary);
            let mut resolved = 0;
            self.storage.update_events::<SedentaryStreak, _>(|stored| {
                for streak in &events.streaks {
                    match stored.iter_mut().find(|s| s.id == streak.id) {
                        // The same sitting period seen again, now longer
                        Some(existing) => {
                            if streak.resolved_by_walk && !existing.resolved_by_walk {
                                existing.resolved_by_walk = true;
                                resolved += 1;
                            }
                            existing.end = streak.end;
                            existing.duration_minutes = streak.duration_minutes;
                        }
                        None => stored.push(streak.clone()),
                    }
                }
                resolved += tracker.resolve(stored, &events.bouts);
            })?;
            report.streaks_resolved = resolved;
        }

        let open = events.open.as_ref().map(serde_json::to_string).transpose()?;
        self.storage.set_text(OPEN_SEGMENT_KEY, open)
    }

    fn evaluate_latest_streak(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let streaks: Vec<SedentaryStreak> = self.storage.recent_events(RECENT_STREAK_LIMIT);
        let Some(mut candidate) = streaks.into_iter().max_by_key(|s| s.end) else {
            return;
        };

        match self.engine.evaluate(&mut candidate, now) {
            NudgeDecision::Fire { .. } => {
                report.nudge_fired = true;
                let id = candidate.id;
                let update = self.storage.update_events::<SedentaryStreak, _>(|stored| {
                    for streak in stored.iter_mut().filter(|s| s.id == id) {
                        streak.nudged = true;
                    }
                });
                if let Err(e) = update {
                    log::warn!("cannot mark streak {} nudged: {}", id, e);
                }
            }
            NudgeDecision::Suppress(reason) => report.nudge_suppressed = Some(reason),
        }
    }

    /// Aggregate persisted events for a local calendar day
    pub fn daily_summary(&self, date: NaiveDate) -> DailyAggregate {
        let bouts: Vec<WalkBout> = self.storage.recent_events(usize::MAX);
        let stairs: Vec<StairEvent> = self.storage.recent_events(usize::MAX);
        let commutes: Vec<CommuteSession> = self.storage.recent_events(usize::MAX);
        let streaks: Vec<SedentaryStreak> = self.storage.recent_events(usize::MAX);

        DailyAggregator::new(
            self.config.local_offset_or_utc(),
            self.config.sedentary.streak_min_minutes,
        )
        .aggregate(
            date,
            DayEvents {
                bouts: &bouts,
                stairs: &stairs,
                commutes: &commutes,
                streaks: &streaks,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::Backfill;
    use crate::storage::{InMemoryStore, KeyValueStore};
    use crate::types::{DispatchRequest, LocationSample, NudgeType, StairsWindow};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 12, h, m, 0).unwrap()
    }

    fn window(from: DateTime<Utc>, minutes: i64, steps: u32, walking: bool) -> MotionWindow {
        MotionWindow::new(from, from + Duration::minutes(minutes), steps, 0.0, 0.0, walking)
    }

    /// Returns the windows that fall inside the queried range
    struct RecordedMotion(Vec<MotionWindow>);

    impl MotionSource for RecordedMotion {
        fn query_motion(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Backfill<MotionWindow> {
            Backfill::ok(
                self.0
                    .iter()
                    .filter(|w| w.start >= since && w.end <= until)
                    .cloned()
                    .collect(),
            )
        }
    }

    struct UnavailableStairs;

    impl StairsSource for UnavailableStairs {
        fn query_stairs(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Backfill<StairsWindow> {
            Backfill::failed()
        }
    }

    struct RecordedStairs(Vec<StairsWindow>);

    impl StairsSource for RecordedStairs {
        fn query_stairs(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Backfill<StairsWindow> {
            Backfill::ok(self.0.clone())
        }
    }

    struct RecordedLocations(Vec<LocationSample>);

    impl LocationSource for RecordedLocations {
        fn query_locations(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> Backfill<LocationSample> {
            Backfill::ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<DispatchRequest>>,
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn send(&self, title: &str, body: &str, category: NudgeType) {
            self.sent.lock().unwrap().push(DispatchRequest {
                title: title.to_string(),
                body: body.to_string(),
                category,
            });
        }
    }

    fn desk_morning() -> Vec<MotionWindow> {
        let mut windows: Vec<MotionWindow> = (0..6)
            .map(|i| window(at(11, 0) + Duration::minutes(i * 10), 10, 0, false))
            .collect();
        windows.push(window(at(12, 1), 3, 300, true));
        windows
    }

    #[test]
    fn test_segment_motion_resolves_within_batch() {
        let events = segment_motion(&desk_morning(), &AppConfig::default(), at(12, 10));

        assert_eq!(events.bouts.len(), 1);
        assert_eq!(events.bouts[0].steps, 300);
        assert_eq!(events.streaks.len(), 1);
        assert!(events.streaks[0].resolved_by_walk);
    }

    #[test]
    fn test_segment_motion_drops_invalid_windows() {
        let mut windows = desk_morning();
        windows.push(MotionWindow::new(at(13, 0), at(12, 0), 10, 0.0, 0.0, true));
        let events = segment_motion(&windows, &AppConfig::default(), at(13, 0));
        assert_eq!(events.bouts.len(), 1);
    }

    #[test]
    fn test_cycle_nudges_then_walk_resolves() {
        let storage = Storage::in_memory();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let processor = MovementProcessor::new(AppConfig::default(), storage.clone(), dispatcher.clone())
            .with_motion_source(Arc::new(RecordedMotion(desk_morning())));

        let first = processor.run_cycle(at(12, 0), WakeReason::Scheduled);
        assert_eq!(first.streaks, 1);
        assert_eq!(first.bouts, 0);
        assert!(first.nudge_fired);
        assert_eq!(dispatcher.sent.lock().unwrap()[0].title, "Been still ~45 min.");

        let second = processor.run_cycle(at(12, 10), WakeReason::SignificantLocationChange);
        assert_eq!(second.bouts, 1);
        assert_eq!(second.streaks_resolved, 1);
        assert!(!second.nudge_fired);
        assert_eq!(second.nudge_suppressed, Some(SuppressReason::AlreadyHandled));

        let stored: Vec<SedentaryStreak> = storage.recent_events(10);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].nudged);
        assert!(stored[0].resolved_by_walk);
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sitting_through_periodic_wakes_builds_one_streak() {
        let storage = Storage::in_memory();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let windows: Vec<MotionWindow> = (0..12)
            .map(|i| window(at(11, 0) + Duration::minutes(i * 5), 5, 0, false))
            .collect();
        let processor = MovementProcessor::new(AppConfig::default(), storage.clone(), dispatcher.clone())
            .with_motion_source(Arc::new(RecordedMotion(windows)));

        let early = processor.run_cycle(at(11, 15), WakeReason::Scheduled);
        assert_eq!(early.streaks, 0);
        let early = processor.run_cycle(at(11, 30), WakeReason::Scheduled);
        assert_eq!(early.nudge_suppressed, None);
        assert!(storage.recent_events::<SedentaryStreak>(10).is_empty());

        let due = processor.run_cycle(at(11, 45), WakeReason::Scheduled);
        assert_eq!(due.streaks, 1);
        assert!(due.nudge_fired);

        let later = processor.run_cycle(at(12, 0), WakeReason::Scheduled);
        assert!(!later.nudge_fired);
        assert_eq!(later.nudge_suppressed, Some(SuppressReason::AlreadyHandled));

        let stored: Vec<SedentaryStreak> = storage.recent_events(10);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].start, at(11, 0));
        assert_eq!(stored[0].end, at(12, 0));
        assert_eq!(stored[0].duration_minutes, 60);
        assert!(stored[0].nudged);
        assert_eq!(dispatcher.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_walk_after_carried_run_resolves_stored_streak() {
        let storage = Storage::in_memory();
        let mut windows: Vec<MotionWindow> = (0..10)
            .map(|i| window(at(11, 0) + Duration::minutes(i * 5), 5, 0, false))
            .collect();
        windows.push(window(at(11, 50), 3, 300, true));
        let processor = MovementProcessor::new(
            AppConfig::default(),
            storage.clone(),
            Arc::new(RecordingDispatcher::default()),
        )
        .with_motion_source(Arc::new(RecordedMotion(windows)));

        processor.run_cycle(at(11, 30), WakeReason::Scheduled);
        let report = processor.run_cycle(at(12, 0), WakeReason::Scheduled);

        assert_eq!(report.bouts, 1);
        assert_eq!(report.streaks_resolved, 0);
        let stored: Vec<SedentaryStreak> = storage.recent_events(10);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].duration_minutes, 50);
        assert!(stored[0].resolved_by_walk);
        assert_eq!(storage.text(OPEN_SEGMENT_KEY), None);
    }

    /// In-memory store whose event-list writes fail
    #[derive(Default)]
    struct EventListsUnwritable(InMemoryStore);

    impl KeyValueStore for EventListsUnwritable {
        fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: Option<String>) -> Result<(), CoreError> {
            if key.starts_with("storage.") {
                return Err(CoreError::StorageError(format!("disk full: {}", key)));
            }
            self.0.set(key, value)
        }
    }

    #[test]
    fn test_failed_persist_keeps_checkpoint() {
        let storage = Storage::new(Arc::new(EventListsUnwritable::default()));
        let stairs = vec![StairsWindow {
            start: at(9, 0),
            end: at(9, 1),
            floors_up: 3,
            floors_down: 0,
        }];
        let processor = MovementProcessor::new(
            AppConfig::default(),
            storage.clone(),
            Arc::new(RecordingDispatcher::default()),
        )
        .with_motion_source(Arc::new(RecordedMotion(desk_morning())))
        .with_stairs_source(Arc::new(RecordedStairs(stairs)));

        let report = processor.run_cycle(at(12, 0), WakeReason::Scheduled);

        assert!(report.motion.success);
        assert_eq!(report.streaks, 1);
        assert_eq!(report.stair_events, 1);
        assert!(!report.nudge_fired);

        let ingestor = Ingestor::new(storage);
        assert_eq!(ingestor.checkpoint(Feed::Motion), None);
        assert_eq!(ingestor.checkpoint(Feed::Stairs), None);
    }

    #[test]
    fn test_failed_feed_keeps_checkpoint_and_others_run() {
        let storage = Storage::in_memory();
        let processor = MovementProcessor::new(
            AppConfig::default(),
            storage.clone(),
            Arc::new(RecordingDispatcher::default()),
        )
        .with_motion_source(Arc::new(RecordedMotion(desk_morning())))
        .with_stairs_source(Arc::new(UnavailableStairs));

        let report = processor.run_cycle(at(12, 30), WakeReason::Scheduled);

        assert_eq!(
            report.stairs,
            FeedStatus {
                queried: true,
                success: false,
                items: 0
            }
        );
        assert!(report.motion.success);
        assert!(!report.location.queried);

        let ingestor = Ingestor::new(storage);
        assert_eq!(ingestor.checkpoint(Feed::Stairs), None);
        assert_eq!(ingestor.checkpoint(Feed::Motion), Some(at(12, 30)));
    }

    #[test]
    fn test_stairs_and_commutes_persisted_and_summarized() {
        let storage = Storage::in_memory();
        let stairs = vec![StairsWindow {
            start: at(9, 0),
            end: at(9, 1),
            floors_up: 3,
            floors_down: 0,
        }];
        // 15 minutes heading north at 5 m/s
        let deg_per_m = 1.0 / 111_194.9;
        let track: Vec<LocationSample> = (0..16)
            .map(|i| LocationSample {
                timestamp: at(8, 0) + Duration::minutes(i),
                latitude: 52.5 + (i * 60) as f64 * 5.0 * deg_per_m,
                longitude: 13.4,
                speed_mps: None,
            })
            .collect();

        let mut processor = MovementProcessor::new(
            AppConfig::default(),
            storage.clone(),
            Arc::new(RecordingDispatcher::default()),
        )
        .with_stairs_source(Arc::new(RecordedStairs(stairs)))
        .with_location_source(Arc::new(RecordedLocations(track)));
        processor.set_place(PlaceType::Work);

        let report = processor.run_cycle(at(10, 0), WakeReason::Visit);
        assert_eq!(report.stair_events, 1);
        assert_eq!(report.commutes, 1);
        assert_eq!(report.nudge_suppressed, None);

        let events: Vec<StairEvent> = storage.recent_events(10);
        assert_eq!(events[0].context, PlaceType::Work);

        let summary = processor.daily_summary(NaiveDate::from_ymd_opt(2024, 9, 12).unwrap());
        assert_eq!(summary.flights_up, 3);
        assert_eq!(summary.commute_cycle_min, 15);
    }
}
