//! Nudge policy engine
//!
//! Decides whether a sedentary streak earns a move nudge. Checks run in a fixed
//! order and stop at the first failure without touching state:
//!
//! 1. streak not already nudged or resolved
//! 2. streak long enough
//! 3. outside quiet hours
//! 4. not snoozed
//! 5. cooldown since the last fire has elapsed
//! 6. daily quota for the local calendar date not used up
//!
//! The checks and the writes that record a fire run under one lock, so two
//! evaluations racing for the same nudge type cannot both pass the quota.

use crate::config::{AppConfig, NudgesConfig, QuietHours, MAX_NUDGE_MINUTES};
use crate::error::CoreError;
use crate::storage::Storage;
use crate::types::{DispatchRequest, NudgeRecord, NudgeType, SedentaryStreak};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Notification delivery supplied by the host. Fire-and-forget.
pub trait NotificationDispatcher: Send + Sync {
    fn send(&self, title: &str, body: &str, category: NudgeType);
}

/// Why a candidate did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    AlreadyHandled,
    BelowThreshold,
    QuietHours,
    Snoozed,
    Cooldown,
    QuotaExhausted,
    /// Policy state could not be written; nothing was dispatched
    StorageFailure,
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NudgeDecision {
    Fire {
        request: DispatchRequest,
        record: NudgeRecord,
    },
    Suppress(SuppressReason),
}

impl NudgeDecision {
    pub fn fire(&self) -> bool {
        matches!(self, NudgeDecision::Fire { .. })
    }

    pub fn request(&self) -> Option<&DispatchRequest> {
        match self {
            NudgeDecision::Fire { request, .. } => Some(request),
            NudgeDecision::Suppress(_) => None,
        }
    }

    pub fn suppress_reason(&self) -> Option<SuppressReason> {
        match self {
            NudgeDecision::Fire { .. } => None,
            NudgeDecision::Suppress(reason) => Some(*reason),
        }
    }
}

fn last_fired_key(nudge_type: NudgeType) -> String {
    format!("nudge.{}.last_at", nudge_type.as_str())
}

fn snoozed_until_key(nudge_type: NudgeType) -> String {
    format!("nudge.{}.snoozed_until", nudge_type.as_str())
}

fn last_streak_key(nudge_type: NudgeType) -> String {
    format!("nudge.{}.last_streak", nudge_type.as_str())
}

/// Nudge policy engine with persisted rate-limit state
pub struct NudgePolicyEngine {
    nudges: NudgesConfig,
    streak_min_minutes: u32,
    offset: FixedOffset,
    quiet_hours: Option<QuietHours>,
    storage: Storage,
    dispatcher: Arc<dyn NotificationDispatcher>,
    decision_lock: Mutex<()>,
}

impl NudgePolicyEngine {
    pub fn new(
        config: &AppConfig,
        storage: Storage,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            nudges: config.nudges.clone(),
            streak_min_minutes: config.sedentary.streak_min_minutes,
            offset: config.local_offset_or_utc(),
            quiet_hours: config.nudges.quiet_hours(),
            storage,
            dispatcher,
            decision_lock: Mutex::new(()),
        }
    }

    fn daily_count_key(&self, nudge_type: NudgeType, now: DateTime<Utc>) -> String {
        let local_date = now.with_timezone(&self.offset).date_naive();
        format!(
            "nudge.{}.count.{}",
            nudge_type.as_str(),
            local_date.format("%Y-%m-%d")
        )
    }

    /// Whether `now` falls inside the configured quiet hours, compared at
    /// minute resolution in the user's local zone
    pub fn is_within_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        let Some(quiet) = self.quiet_hours else {
            return false;
        };
        let local = now.with_timezone(&self.offset);
        NaiveTime::from_hms_opt(local.hour(), local.minute(), 0)
            .map(|time| quiet.contains(time))
            .unwrap_or(false)
    }

    /// Fires recorded for `nudge_type` on the local date of `now`
    pub fn fired_today(&self, nudge_type: NudgeType, now: DateTime<Utc>) -> u32 {
        self.storage.count(&self.daily_count_key(nudge_type, now))
    }

    fn cooldown(&self, nudge_type: NudgeType) -> Option<Duration> {
        match nudge_type {
            NudgeType::Move => Duration::try_minutes(
                self.nudges.move_cooldown_minutes.clamp(0, MAX_NUDGE_MINUTES),
            ),
            NudgeType::Stairs | NudgeType::Commute => None,
        }
    }

    fn check(
        &self,
        streak: &SedentaryStreak,
        nudge_type: NudgeType,
        now: DateTime<Utc>,
    ) -> Result<(), SuppressReason> {
        if !streak.is_open()
            || self.storage.text(&last_streak_key(nudge_type)).as_deref()
                == Some(streak.id.to_string().as_str())
        {
            return Err(SuppressReason::AlreadyHandled);
        }
        if streak.duration_minutes < self.streak_min_minutes {
            return Err(SuppressReason::BelowThreshold);
        }
        if self.is_within_quiet_hours(now) {
            return Err(SuppressReason::QuietHours);
        }
        if let Some(until) = self.storage.timestamp(&snoozed_until_key(nudge_type)) {
            if now < until {
                return Err(SuppressReason::Snoozed);
            }
        }
        if let (Some(last), Some(cooldown)) = (
            self.storage.timestamp(&last_fired_key(nudge_type)),
            self.cooldown(nudge_type),
        ) {
            if now - last < cooldown {
                return Err(SuppressReason::Cooldown);
            }
        }
        if self.fired_today(nudge_type, now) >= self.nudges.max_per_day {
            return Err(SuppressReason::QuotaExhausted);
        }
        Ok(())
    }

    /// Persist a fire. The last-fired timestamp, daily counter, handled streak
    /// and nudge record are written together; on any failure the keys already
    /// written are restored.
    fn record_fire(
        &self,
        streak: &SedentaryStreak,
        nudge_type: NudgeType,
        now: DateTime<Utc>,
    ) -> Result<NudgeRecord, CoreError> {
        let count_key = self.daily_count_key(nudge_type, now);
        let keys = [
            last_streak_key(nudge_type),
            count_key.clone(),
            last_fired_key(nudge_type),
        ];
        let previous: Vec<Option<String>> = keys.iter().map(|key| self.storage.text(key)).collect();

        let record = NudgeRecord {
            id: Uuid::new_v4(),
            timestamp: now,
            nudge_type,
            accepted: false,
            snoozed: false,
        };
        let fired = self.storage.count(&count_key);
        let written = self
            .storage
            .set_text(&keys[0], Some(streak.id.to_string()))
            .and_then(|()| self.storage.set_count(&count_key, fired.saturating_add(1)))
            .and_then(|()| self.storage.set_timestamp(&keys[2], Some(now)))
            .and_then(|()| self.storage.append_events(std::slice::from_ref(&record)));

        if let Err(e) = written {
            for (key, value) in keys.iter().zip(previous) {
                if let Err(restore) = self.storage.set_text(key, value) {
                    log::warn!("cannot restore {}: {}", key, restore);
                }
            }
            return Err(e);
        }
        Ok(record)
    }

    /// Evaluate a sedentary streak for a move nudge.
    ///
    /// On a fire the request is dispatched, rate-limit state is updated and the
    /// streak is marked nudged.
    pub fn evaluate(&self, streak: &mut SedentaryStreak, now: DateTime<Utc>) -> NudgeDecision {
        let nudge_type = NudgeType::Move;
        let _guard = self.decision_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Err(reason) = self.check(streak, nudge_type, now) {
            log::debug!("move nudge suppressed for streak {}: {:?}", streak.id, reason);
            return NudgeDecision::Suppress(reason);
        }

        let record = match self.record_fire(streak, nudge_type, now) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("cannot record move nudge, not dispatching: {}", e);
                return NudgeDecision::Suppress(SuppressReason::StorageFailure);
            }
        };

        let request = DispatchRequest {
            title: format!("Been still ~{} min.", self.streak_min_minutes),
            body: "2-min lap now?".to_string(),
            category: nudge_type,
        };
        self.dispatcher
            .send(&request.title, &request.body, request.category);
        streak.nudged = true;

        log::info!(
            "move nudge fired for {}-minute streak ({} of {} today)",
            streak.duration_minutes,
            self.fired_today(nudge_type, now),
            self.nudges.max_per_day
        );

        NudgeDecision::Fire { request, record }
    }

    /// Configured snooze length in minutes
    pub fn default_snooze_minutes(&self) -> i64 {
        self.nudges.snooze_minutes
    }

    /// Suppress `nudge_type` for `minutes` from `now`. Negative values snooze
    /// for zero minutes; values past [`MAX_NUDGE_MINUTES`] are rejected.
    pub fn snooze(
        &self,
        nudge_type: NudgeType,
        now: DateTime<Utc>,
        minutes: i64,
    ) -> Result<NudgeRecord, CoreError> {
        let until = Some(minutes.max(0))
            .filter(|m| *m <= MAX_NUDGE_MINUTES)
            .and_then(Duration::try_minutes)
            .and_then(|length| now.checked_add_signed(length))
            .ok_or_else(|| {
                CoreError::InvalidConfig(format!("snooze length out of range: {} minutes", minutes))
            })?;

        let _guard = self.decision_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.storage
            .set_timestamp(&snoozed_until_key(nudge_type), Some(until))?;

        let record = NudgeRecord {
            id: Uuid::new_v4(),
            timestamp: now,
            nudge_type,
            accepted: false,
            snoozed: true,
        };
        self.storage.append_events(std::slice::from_ref(&record))?;
        log::info!("{} nudges snoozed until {}", nudge_type.as_str(), until.to_rfc3339());
        Ok(record)
    }

    /// Mark a previously fired nudge as accepted by the user.
    /// Returns whether a matching record was found.
    pub fn accept(&self, record_id: Uuid) -> Result<bool, CoreError> {
        let mut found = false;
        self.storage.update_events::<NudgeRecord, _>(|records| {
            for record in records.iter_mut().filter(|r| r.id == record_id) {
                record.accepted = true;
                found = true;
            }
        })?;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryStore, KeyValueStore};
    use chrono::TimeZone;
    use std::thread;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<DispatchRequest>>,
    }

    impl RecordingDispatcher {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
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

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    fn streak(minutes: u32) -> SedentaryStreak {
        let end = at(1, 12, 0);
        SedentaryStreak {
            id: Uuid::new_v4(),
            start: end - Duration::minutes(minutes as i64),
            end,
            duration_minutes: minutes,
            nudged: false,
            resolved_by_walk: false,
        }
    }

    fn engine_with(config: AppConfig) -> (NudgePolicyEngine, Arc<RecordingDispatcher>, Storage) {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let storage = Storage::in_memory();
        let engine = NudgePolicyEngine::new(&config, storage.clone(), dispatcher.clone());
        (engine, dispatcher, storage)
    }

    fn engine() -> (NudgePolicyEngine, Arc<RecordingDispatcher>, Storage) {
        engine_with(AppConfig::default())
    }

    #[test]
    fn test_fire_dispatches_and_records() {
        let (engine, dispatcher, storage) = engine();
        let mut candidate = streak(60);

        let decision = engine.evaluate(&mut candidate, at(1, 12, 0));

        assert!(decision.fire());
        let request = decision.request().unwrap();
        assert_eq!(request.title, "Been still ~45 min.");
        assert_eq!(request.body, "2-min lap now?");
        assert_eq!(request.category, NudgeType::Move);
        assert_eq!(dispatcher.count(), 1);
        assert!(candidate.nudged);
        assert_eq!(storage.timestamp("nudge.move.last_at"), Some(at(1, 12, 0)));
        assert_eq!(storage.count("nudge.move.count.2024-03-01"), 1);
        assert_eq!(storage.recent_events::<NudgeRecord>(10).len(), 1);
    }

    #[test]
    fn test_below_threshold_has_no_side_effects() {
        let (engine, dispatcher, storage) = engine();
        let mut candidate = streak(44);

        let decision = engine.evaluate(&mut candidate, at(1, 12, 0));

        assert_eq!(decision.suppress_reason(), Some(SuppressReason::BelowThreshold));
        assert!(decision.request().is_none());
        assert_eq!(dispatcher.count(), 0);
        assert!(!candidate.nudged);
        assert!(storage.timestamp("nudge.move.last_at").is_none());
    }

    #[test]
    fn test_quiet_hours_wraparound() {
        let (engine, _, _) = engine();
        assert!(engine.is_within_quiet_hours(at(1, 23, 30)));
        assert!(engine.is_within_quiet_hours(at(1, 5, 0)));
        assert!(!engine.is_within_quiet_hours(at(1, 12, 0)));

        let mut candidate = streak(60);
        assert_eq!(
            engine.evaluate(&mut candidate, at(1, 23, 30)).suppress_reason(),
            Some(SuppressReason::QuietHours)
        );
        assert!(engine.evaluate(&mut candidate, at(1, 12, 0)).fire());
    }

    #[test]
    fn test_quiet_hours_use_local_offset() {
        let config = AppConfig {
            utc_offset_minutes: -5 * 60,
            ..AppConfig::default()
        };
        let (engine, _, _) = engine_with(config);
        // 02:00 UTC is 21:00 local
        assert!(engine.is_within_quiet_hours(at(2, 2, 0)));
        // 17:00 UTC is 12:00 local
        assert!(!engine.is_within_quiet_hours(at(2, 17, 0)));
    }

    #[test]
    fn test_quiet_hours_minute_resolution() {
        let (engine, _, _) = engine();
        let just_after_end = at(1, 7, 0) + Duration::seconds(30);
        assert!(engine.is_within_quiet_hours(just_after_end));
        assert!(!engine.is_within_quiet_hours(at(1, 7, 1)));
    }

    #[test]
    fn test_cooldown_boundary() {
        let (engine, _, _) = engine();
        assert!(engine.evaluate(&mut streak(60), at(1, 9, 0)).fire());

        let before = engine.evaluate(&mut streak(60), at(1, 10, 29));
        assert_eq!(before.suppress_reason(), Some(SuppressReason::Cooldown));

        assert!(engine.evaluate(&mut streak(60), at(1, 10, 30)).fire());
    }

    #[test]
    fn test_quota_exhaustion_resets_at_local_midnight() {
        let (engine, dispatcher, _) = engine();
        for hour in [8, 10, 12, 14] {
            assert!(engine.evaluate(&mut streak(60), at(1, hour, 0)).fire());
        }

        let exhausted = engine.evaluate(&mut streak(60), at(1, 16, 0));
        assert_eq!(exhausted.suppress_reason(), Some(SuppressReason::QuotaExhausted));
        assert_eq!(engine.fired_today(NudgeType::Move, at(1, 16, 0)), 4);

        assert!(engine.evaluate(&mut streak(60), at(2, 8, 0)).fire());
        assert_eq!(dispatcher.count(), 5);
    }

    #[test]
    fn test_quota_keyed_by_local_date() {
        let mut config = AppConfig {
            utc_offset_minutes: 10 * 60,
            ..AppConfig::default()
        };
        config.nudges.max_per_day = 1;
        config.nudges.move_cooldown_minutes = 0;
        let (engine, _, storage) = engine_with(config);

        // 23:00 UTC on the 1st is 09:00 on the 2nd locally
        assert!(engine.evaluate(&mut streak(60), at(1, 23, 0)).fire());
        assert_eq!(storage.count("nudge.move.count.2024-03-02"), 1);

        // 02:00 UTC on the 2nd is still the 2nd locally
        let decision = engine.evaluate(&mut streak(60), at(2, 2, 0));
        assert_eq!(decision.suppress_reason(), Some(SuppressReason::QuotaExhausted));
    }

    #[test]
    fn test_same_streak_fires_once() {
        let mut config = AppConfig::default();
        config.nudges.move_cooldown_minutes = 0;
        let (engine, _, _) = engine_with(config);

        let base = streak(60);
        let mut first = base.clone();
        let mut duplicate = base.clone();

        assert!(engine.evaluate(&mut first, at(1, 12, 0)).fire());
        assert_eq!(
            engine.evaluate(&mut duplicate, at(1, 12, 5)).suppress_reason(),
            Some(SuppressReason::AlreadyHandled)
        );
        assert_eq!(
            engine.evaluate(&mut first, at(1, 12, 10)).suppress_reason(),
            Some(SuppressReason::AlreadyHandled)
        );
    }

    #[test]
    fn test_resolved_streak_not_nudged() {
        let (engine, dispatcher, _) = engine();
        let mut candidate = streak(90);
        candidate.resolved_by_walk = true;
        assert_eq!(
            engine.evaluate(&mut candidate, at(1, 12, 0)).suppress_reason(),
            Some(SuppressReason::AlreadyHandled)
        );
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn test_snooze_suppresses_until_expiry() {
        let (engine, _, storage) = engine();
        let minutes = engine.default_snooze_minutes();
        let record = engine.snooze(NudgeType::Move, at(1, 12, 0), minutes).unwrap();
        assert!(record.snoozed);

        assert_eq!(
            engine.evaluate(&mut streak(60), at(1, 12, 59)).suppress_reason(),
            Some(SuppressReason::Snoozed)
        );
        assert!(engine.evaluate(&mut streak(60), at(1, 13, 0)).fire());
        assert_eq!(storage.recent_events::<NudgeRecord>(10).len(), 2);
    }

    #[test]
    fn test_accept_marks_record() {
        let (engine, _, storage) = engine();
        let decision = engine.evaluate(&mut streak(60), at(1, 12, 0));
        let NudgeDecision::Fire { record, .. } = decision else {
            panic!("expected fire");
        };

        assert!(engine.accept(record.id).unwrap());
        assert!(!engine.accept(Uuid::new_v4()).unwrap());
        assert!(storage.recent_events::<NudgeRecord>(1)[0].accepted);
    }

    #[test]
    fn test_malformed_state_treated_as_absent() {
        let store = Arc::new(InMemoryStore::new());
        store.set("nudge.move.last_at", Some("garbage".to_string())).unwrap();
        store
            .set("nudge.move.count.2024-03-01", Some("lots".to_string()))
            .unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = NudgePolicyEngine::new(&AppConfig::default(), Storage::new(store), dispatcher);

        assert!(engine.evaluate(&mut streak(60), at(1, 12, 0)).fire());
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, CoreError> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: Option<String>) -> Result<(), CoreError> {
            Err(CoreError::StorageError(format!("read-only: {}", key)))
        }
    }

    #[test]
    fn test_storage_failure_does_not_dispatch() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = NudgePolicyEngine::new(
            &AppConfig::default(),
            Storage::new(Arc::new(ReadOnlyStore)),
            dispatcher.clone(),
        );
        let mut candidate = streak(60);

        let decision = engine.evaluate(&mut candidate, at(1, 12, 0));

        assert_eq!(decision.suppress_reason(), Some(SuppressReason::StorageFailure));
        assert_eq!(dispatcher.count(), 0);
        assert!(!candidate.nudged);
    }

    /// In-memory store that rejects writes to keys containing `pattern`
    struct RejectingStore {
        inner: InMemoryStore,
        pattern: Mutex<Option<&'static str>>,
    }

    impl RejectingStore {
        fn rejecting(pattern: &'static str) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryStore::new(),
                pattern: Mutex::new(Some(pattern)),
            })
        }

        fn heal(&self) {
            *self.pattern.lock().unwrap() = None;
        }
    }

    impl KeyValueStore for RejectingStore {
        fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Option<String>) -> Result<(), CoreError> {
            match *self.pattern.lock().unwrap() {
                Some(pattern) if key.contains(pattern) => {
                    Err(CoreError::StorageError(format!("rejected: {}", key)))
                }
                _ => self.inner.set(key, value),
            }
        }
    }

    #[test]
    fn test_failed_counter_write_leaves_no_cooldown() {
        let store = RejectingStore::rejecting(".count.");
        let storage = Storage::new(store.clone());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = NudgePolicyEngine::new(&AppConfig::default(), storage.clone(), dispatcher.clone());

        let failed = engine.evaluate(&mut streak(60), at(1, 12, 0));
        assert_eq!(failed.suppress_reason(), Some(SuppressReason::StorageFailure));
        assert_eq!(storage.timestamp("nudge.move.last_at"), None);
        assert_eq!(storage.text("nudge.move.last_streak"), None);

        store.heal();
        assert!(engine.evaluate(&mut streak(60), at(1, 12, 5)).fire());
        assert_eq!(dispatcher.count(), 1);
    }

    #[test]
    fn test_failed_record_append_restores_previous_state() {
        let store = RejectingStore::rejecting("storage.nudges");
        let storage = Storage::new(store.clone());
        storage.set_count("nudge.move.count.2024-03-01", 2).unwrap();
        storage
            .set_timestamp("nudge.move.last_at", Some(at(1, 8, 0)))
            .unwrap();
        let engine = NudgePolicyEngine::new(
            &AppConfig::default(),
            storage.clone(),
            Arc::new(RecordingDispatcher::default()),
        );

        let failed = engine.evaluate(&mut streak(60), at(1, 12, 0));
        assert_eq!(failed.suppress_reason(), Some(SuppressReason::StorageFailure));
        assert_eq!(storage.count("nudge.move.count.2024-03-01"), 2);
        assert_eq!(storage.timestamp("nudge.move.last_at"), Some(at(1, 8, 0)));
        assert_eq!(storage.text("nudge.move.last_streak"), None);
    }

    #[test]
    fn test_unvalidated_huge_cooldown_does_not_panic() {
        let mut config = AppConfig::default();
        config.nudges.move_cooldown_minutes = 1_000_000_000_000_000;
        let (engine, _, _) = engine_with(config);

        assert!(engine.evaluate(&mut streak(60), at(1, 9, 0)).fire());
        assert_eq!(
            engine.evaluate(&mut streak(60), at(20, 9, 0)).suppress_reason(),
            Some(SuppressReason::Cooldown)
        );
    }

    #[test]
    fn test_snooze_out_of_range_rejected() {
        let (engine, _, storage) = engine();

        let result = engine.snooze(NudgeType::Move, at(1, 12, 0), i64::MAX);
        assert!(matches!(result, Err(CoreError::InvalidConfig(_))));
        assert_eq!(storage.timestamp("nudge.move.snoozed_until"), None);
        assert!(storage.recent_events::<NudgeRecord>(10).is_empty());

        // Negative lengths snooze for nothing
        engine.snooze(NudgeType::Move, at(1, 12, 0), -30).unwrap();
        assert!(engine.evaluate(&mut streak(60), at(1, 12, 0)).fire());
    }

    #[test]
    fn test_concurrent_evaluations_respect_quota() {
        let mut config = AppConfig::default();
        config.nudges.move_cooldown_minutes = 0;
        config.nudges.max_per_day = 3;
        let (engine, dispatcher, storage) = engine_with(config);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.evaluate(&mut streak(60), at(1, 12, 0)).fire())
            })
            .collect();
        let fired = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fired| *fired)
            .count();

        assert_eq!(fired, 3);
        assert_eq!(dispatcher.count(), 3);
        assert_eq!(storage.count("nudge.move.count.2024-03-01"), 3);
    }
}
