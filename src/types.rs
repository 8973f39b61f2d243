//! Core types for the Move More pipeline
//!
//! This module defines the data that flows through each stage: raw windows and
//! samples supplied by acquisition, the events produced by the detectors, and
//! the records written by the nudge policy engine.

use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Joined pedometer/activity window used for bout and streak detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Steps counted in the window
    pub steps: u32,
    /// Distance covered (meters)
    pub distance_meters: f64,
    /// Average cadence reported for the window (steps per minute)
    pub avg_cadence_spm: f64,
    /// Whether walking was the majority activity for the window
    pub is_walking_majority: bool,
}

impl MotionWindow {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        steps: u32,
        distance_meters: f64,
        avg_cadence_spm: f64,
        is_walking_majority: bool,
    ) -> Self {
        Self {
            start,
            end,
            steps,
            distance_meters,
            avg_cadence_spm,
            is_walking_majority,
        }
    }

    /// Window length in whole seconds, never negative
    pub fn duration_sec(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start >= self.end {
            return Err(CoreError::InvalidWindow(format!(
                "start {} is not before end {}",
                self.start.to_rfc3339(),
                self.end.to_rfc3339()
            )));
        }
        if !self.distance_meters.is_finite() || self.distance_meters < 0.0 {
            return Err(CoreError::InvalidWindow(format!(
                "distance_meters must be non-negative, got {}",
                self.distance_meters
            )));
        }
        if !self.avg_cadence_spm.is_finite() || self.avg_cadence_spm < 0.0 {
            return Err(CoreError::InvalidWindow(format!(
                "avg_cadence_spm must be non-negative, got {}",
                self.avg_cadence_spm
            )));
        }
        Ok(())
    }
}

/// How a walk bout came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoutLabel {
    None,
    Auto,
    User,
}

/// An admitted contiguous walking segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkBout {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub steps: u32,
    pub distance_meters: f64,
    pub avg_cadence_spm: f64,
    pub label: BoutLabel,
    pub created_at: DateTime<Utc>,
}

impl WalkBout {
    pub fn duration_sec(&self) -> i64 {
        (self.end - self.start).num_seconds().max(0)
    }
}

/// Floor-count window reported by the altimeter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StairsWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub floors_up: u32,
    pub floors_down: u32,
}

/// Place classification attached to stair events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceType {
    Home,
    Work,
    Other,
}

/// Discrete stair-climbing event for one aggregation bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StairEvent {
    pub id: Uuid,
    /// End of the bucket this event summarizes
    pub timestamp: DateTime<Utc>,
    pub flights_up: u32,
    pub flights_down: u32,
    pub context: PlaceType,
}

/// Contiguous sedentary time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SedentaryStreak {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Set once the policy engine has fired a nudge for this streak
    pub nudged: bool,
    /// Set once a walk interrupted the streak
    pub resolved_by_walk: bool,
}

impl SedentaryStreak {
    /// Streak that is still a candidate for a move nudge
    pub fn is_open(&self) -> bool {
        !self.nudged && !self.resolved_by_walk
    }
}

/// Coarse location fix used for commute sessionization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Platform-reported speed, when available (m/s)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

/// Travel mode inferred from median speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommuteMode {
    Walk,
    Cycle,
    Automotive,
}

/// A sustained displacement between two places
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuteSession {
    pub id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mode: CommuteMode,
    pub distance_km: f64,
    pub median_speed_mps: f64,
}

impl CommuteSession {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }
}

/// Nudge category, also used as the notification category tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeType {
    Move,
    Stairs,
    Commute,
}

impl NudgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeType::Move => "move",
            NudgeType::Stairs => "stairs",
            NudgeType::Commute => "commute",
        }
    }

    /// Notification category identifier registered with the platform
    pub fn category_id(&self) -> &'static str {
        match self {
            NudgeType::Move => "MOVE",
            NudgeType::Stairs => "STAIRS",
            NudgeType::Commute => "COMMUTE",
        }
    }
}

/// A nudge that was fired or snoozed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub nudge_type: NudgeType,
    pub accepted: bool,
    pub snoozed: bool,
}

/// Notification handed to the dispatch collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub title: String,
    pub body: String,
    pub category: NudgeType,
}

/// One local calendar day of derived events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub walk_bouts_count: u32,
    pub walk_bout_minutes: u32,
    pub flights_up: u32,
    pub flights_down: u32,
    pub commute_walk_min: u32,
    pub commute_auto_min: u32,
    pub commute_cycle_min: u32,
    pub long_sedentary_streaks: u32,
}
