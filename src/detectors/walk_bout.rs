//! Walk bout segmentation
//!
//! Merges consecutive walking-majority windows into candidate segments and
//! admits those that meet the duration and steps/cadence thresholds.

use crate::config::WalkBoutConfig;
use crate::types::{BoutLabel, MotionWindow, WalkBout};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lower bound on the cadence denominator (minutes)
const MIN_CADENCE_DENOMINATOR_MIN: f64 = 1e-6;

/// Walk bout segmenter bound to a set of thresholds
pub struct WalkBoutSegmenter {
    min_duration_sec: i64,
    min_steps: u32,
    min_cadence_spm: u32,
}

impl WalkBoutSegmenter {
    pub fn new(config: &WalkBoutConfig) -> Self {
        Self {
            min_duration_sec: config.min_duration_sec,
            min_steps: config.min_steps,
            min_cadence_spm: config.min_cadence_spm,
        }
    }

    pub fn detect(&self, windows: &[MotionWindow], created_at: DateTime<Utc>) -> Vec<WalkBout> {
        detect_bouts(
            windows,
            self.min_duration_sec,
            self.min_steps,
            self.min_cadence_spm,
            created_at,
        )
    }
}

/// Open walking segment
struct Segment {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    steps: u32,
    distance_meters: f64,
}

/// Detect walk bouts in `windows`.
///
/// Windows are sorted by start time first. Touching walking windows
/// (`end == next.start`) merge; any non-walking window closes the segment.
pub fn detect_bouts(
    windows: &[MotionWindow],
    min_duration_sec: i64,
    min_steps: u32,
    min_cadence_spm: u32,
    created_at: DateTime<Utc>,
) -> Vec<WalkBout> {
    if windows.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&MotionWindow> = windows.iter().collect();
    sorted.sort_unstable_by_key(|w| w.start);

    let mut bouts = Vec::new();
    let mut open: Option<Segment> = None;

    let flush = |segment: Option<Segment>, bouts: &mut Vec<WalkBout>| {
        let Some(segment) = segment else { return };
        let duration_sec = (segment.end - segment.start).num_seconds().max(0);
        let duration_min = (duration_sec as f64 / 60.0).max(MIN_CADENCE_DENOMINATOR_MIN);
        let avg_cadence = segment.steps as f64 / duration_min;

        let long_enough = duration_sec >= min_duration_sec;
        let active_enough =
            segment.steps >= min_steps || avg_cadence.round() >= min_cadence_spm as f64;
        if !(long_enough && active_enough) {
            log::debug!(
                "dropping walk segment {}s, {} steps, {:.1} spm",
                duration_sec,
                segment.steps,
                avg_cadence
            );
            return;
        }

        bouts.push(WalkBout {
            id: Uuid::new_v4(),
            start: segment.start,
            end: segment.end,
            steps: segment.steps,
            distance_meters: segment.distance_meters,
            avg_cadence_spm: avg_cadence,
            label: BoutLabel::Auto,
            created_at,
        });
    };

    for window in sorted {
        if window.is_walking_majority {
            let segment = open.get_or_insert(Segment {
                start: window.start,
                end: window.end,
                steps: 0,
                distance_meters: 0.0,
            });
            segment.end = segment.end.max(window.end);
            segment.steps = segment.steps.saturating_add(window.steps);
            segment.distance_meters += window.distance_meters;
        } else {
            flush(open.take(), &mut bouts);
        }
    }

    flush(open.take(), &mut bouts);

    bouts
}
