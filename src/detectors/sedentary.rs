//! Sedentary streak tracking
//!
//! Non-walking windows are merged into streaks with the same merge/flush
//! strategy as walk bouts. Walking interrupts a streak only once it is real:
//! a run of walking windows resolves the open streak as soon as it lasts
//! `resolve_min_sec` or reaches `resolve_min_steps`. Shorter runs are absorbed
//! and the streak carries on across them.

use crate::config::SedentaryConfig;
use crate::types::{MotionWindow, SedentaryStreak, WalkBout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Walking that followed a sedentary run and has not resolved it yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWalk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: u32,
}

impl PendingWalk {
    fn resolves(&self, config: &SedentaryConfig) -> bool {
        (self.end - self.start).num_seconds() >= config.resolve_min_sec
            || self.steps >= config.resolve_min_steps
    }
}

/// Sedentary run still open when a batch of windows ends.
///
/// Feeding it back into the next batch continues the same run, so a sitting
/// period split across several batches is measured as one streak. The streak
/// admitted from the run always carries `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSegment {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub walk: Option<PendingWalk>,
}

impl OpenSegment {
    fn starting(window: &MotionWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            start: window.start,
            end: window.end,
            walk: None,
        }
    }
}

fn admit(
    open: &OpenSegment,
    resolved_by_walk: bool,
    config: &SedentaryConfig,
) -> Option<SedentaryStreak> {
    let minutes = (open.end - open.start).num_minutes().max(0);
    let duration_minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
    if duration_minutes < config.streak_min_minutes {
        log::debug!("sedentary segment of {} min below threshold", duration_minutes);
        return None;
    }
    Some(SedentaryStreak {
        id: open.id,
        start: open.start,
        end: open.end,
        duration_minutes,
        nudged: false,
        resolved_by_walk,
    })
}

/// Detect sedentary streaks in `windows`.
///
/// A streak still open when the input ends is emitted unresolved; it is the
/// candidate the nudge policy evaluates.
pub fn detect_streaks(windows: &[MotionWindow], config: &SedentaryConfig) -> Vec<SedentaryStreak> {
    continue_streaks(None, windows, config).0
}

/// Detect streaks in `windows`, continuing from the segment left open by the
/// previous batch.
///
/// Returns the streaks and the segment still open at the end of `windows`.
/// When the open segment is long enough it is also emitted as an unresolved
/// streak with the segment's id.
pub fn continue_streaks(
    carried: Option<OpenSegment>,
    windows: &[MotionWindow],
    config: &SedentaryConfig,
) -> (Vec<SedentaryStreak>, Option<OpenSegment>) {
    let mut sorted: Vec<&MotionWindow> = windows.iter().collect();
    sorted.sort_unstable_by_key(|w| w.start);

    let mut streaks = Vec::new();
    let mut open = carried;

    for window in sorted {
        if !window.is_walking_majority {
            match open.as_mut() {
                Some(segment) => {
                    // Any pending walk was too short to resolve the streak
                    segment.walk = None;
                    segment.end = segment.end.max(window.end);
                }
                None => open = Some(OpenSegment::starting(window)),
            }
            continue;
        }

        let Some(segment) = open.as_mut() else {
            continue;
        };

        let walk = segment.walk.get_or_insert(PendingWalk {
            start: window.start,
            end: window.end,
            steps: 0,
        });
        walk.end = walk.end.max(window.end);
        walk.steps = walk.steps.saturating_add(window.steps);

        if walk.resolves(config) {
            if let Some(streak) = open.take().and_then(|o| admit(&o, true, config)) {
                streaks.push(streak);
            }
        }
    }

    if let Some(streak) = open.as_ref().and_then(|o| admit(o, false, config)) {
        streaks.push(streak);
    }

    (streaks, open)
}

/// Mark streaks resolved by bouts that follow them.
///
/// A bout starting at or after a streak's end resolves it when it starts
/// within `resolve_min_sec` of that end or carries `resolve_min_steps` steps.
/// Returns the number of streaks newly resolved.
pub fn resolve_with_bouts(
    streaks: &mut [SedentaryStreak],
    bouts: &[WalkBout],
    config: &SedentaryConfig,
) -> usize {
    let mut resolved = 0;
    for streak in streaks.iter_mut().filter(|s| !s.resolved_by_walk) {
        let interrupted = bouts.iter().any(|bout| {
            let lag_sec = (bout.start - streak.end).num_seconds();
            lag_sec >= 0 && (lag_sec <= config.resolve_min_sec || bout.steps >= config.resolve_min_steps)
        });
        if interrupted {
            streak.resolved_by_walk = true;
            resolved += 1;
        }
    }
    resolved
}

/// Streak tracker bound to a configuration
pub struct SedentaryStreakTracker {
    config: SedentaryConfig,
}

impl SedentaryStreakTracker {
    pub fn new(config: &SedentaryConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn detect(&self, windows: &[MotionWindow]) -> Vec<SedentaryStreak> {
        detect_streaks(windows, &self.config)
    }

    pub fn detect_continuing(
        &self,
        carried: Option<OpenSegment>,
        windows: &[MotionWindow],
    ) -> (Vec<SedentaryStreak>, Option<OpenSegment>) {
        continue_streaks(carried, windows, &self.config)
    }

    pub fn resolve(&self, streaks: &mut [SedentaryStreak], bouts: &[WalkBout]) -> usize {
        resolve_with_bouts(streaks, bouts, &self.config)
    }
}
