//! Event detectors
//!
//! Every detector is a pure function of its input slice plus thresholds. None
//! of them keep state between calls, so they can run concurrently on disjoint
//! inputs and re-running one on the same input gives the same events.

pub mod commute;
pub mod sedentary;
pub mod stairs;
pub mod walk_bout;

pub use commute::{detect_sessions, CommuteSessionizer};
pub use sedentary::{
    continue_streaks, detect_streaks, resolve_with_bouts, OpenSegment, SedentaryStreakTracker,
};
pub use stairs::{detect_events, StairEventAggregator};
pub use walk_bout::{detect_bouts, WalkBoutSegmenter};
