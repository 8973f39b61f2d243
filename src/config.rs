//! Runtime configuration
//!
//! Thresholds for every detector and the nudge policy. Configuration is loaded
//! once at process start and never mutated afterwards. Anything missing or
//! malformed falls back to the defaults below instead of failing startup.

use crate::error::CoreError;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Longest accepted cooldown or snooze, one year
pub const MAX_NUDGE_MINUTES: i64 = 366 * 24 * 60;

/// Walk bout admission thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkBoutConfig {
    pub min_duration_sec: i64,
    pub min_steps: u32,
    pub min_cadence_spm: u32,
}

impl Default for WalkBoutConfig {
    fn default() -> Self {
        Self {
            min_duration_sec: 60,
            min_steps: 60,
            min_cadence_spm: 60,
        }
    }
}

/// Sedentary streak admission and resolution thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SedentaryConfig {
    pub streak_min_minutes: u32,
    /// A walk lasting this long resolves the current streak
    pub resolve_min_sec: i64,
    /// A walk with this many steps resolves the current streak
    pub resolve_min_steps: u32,
}

impl Default for SedentaryConfig {
    fn default() -> Self {
        Self {
            streak_min_minutes: 45,
            resolve_min_sec: 120,
            resolve_min_steps: 150,
        }
    }
}

/// Stair bucket size and emission threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StairsConfig {
    pub window_minutes: u32,
    pub min_delta_floors: u32,
}

impl Default for StairsConfig {
    fn default() -> Self {
        Self {
            window_minutes: 2,
            min_delta_floors: 1,
        }
    }
}

/// Commute sessionization thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommuteConfig {
    pub min_duration_min: i64,
    pub min_displacement_km: f64,
    pub walk_max_mps: f64,
    pub cycle_max_mps: f64,
}

impl Default for CommuteConfig {
    fn default() -> Self {
        Self {
            min_duration_min: 5,
            min_displacement_km: 1.0,
            walk_max_mps: 2.0,
            cycle_max_mps: 8.0,
        }
    }
}

/// Nudge rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgesConfig {
    pub max_per_day: u32,
    pub move_cooldown_minutes: i64,
    /// Local time of day, `HH:MM`
    pub quiet_start: String,
    /// Local time of day, `HH:MM`
    pub quiet_end: String,
    pub snooze_minutes: i64,
}

impl Default for NudgesConfig {
    fn default() -> Self {
        Self {
            max_per_day: 4,
            move_cooldown_minutes: 90,
            quiet_start: "21:00".to_string(),
            quiet_end: "07:00".to_string(),
            snooze_minutes: 60,
        }
    }
}

impl NudgesConfig {
    /// Parsed quiet window, or `None` when either bound is unparseable
    pub fn quiet_hours(&self) -> Option<QuietHours> {
        match QuietHours::parse(&self.quiet_start, &self.quiet_end) {
            Ok(quiet) => Some(quiet),
            Err(e) => {
                log::warn!("quiet hours disabled: {}", e);
                None
            }
        }
    }
}

/// Local time-of-day interval during which nudges are suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn parse(start: &str, end: &str) -> Result<Self, CoreError> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    /// Inclusive on both ends; `start > end` wraps midnight.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| CoreError::InvalidTimeOfDay(format!("{:?}: {}", value, e)))
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub walk_bout: WalkBoutConfig,
    pub sedentary: SedentaryConfig,
    pub stairs: StairsConfig,
    pub commute: CommuteConfig,
    pub nudges: NudgesConfig,
    /// Offset of the user's local zone from UTC, used for quiet hours and
    /// calendar-day quotas
    pub utc_offset_minutes: i32,
}

impl AppConfig {
    /// Strict parse, for callers that want to report bad input
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration, falling back to defaults on any error
    pub fn from_json_or_default(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a file, falling back to defaults when the file
    /// is missing or malformed
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json_or_default(&contents),
            Err(e) => {
                log::warn!(
                    "cannot read configuration from {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.walk_bout.min_duration_sec < 0 {
            return Err(CoreError::InvalidConfig(
                "walk_bout.min_duration_sec must be non-negative".to_string(),
            ));
        }
        if self.commute.walk_max_mps > self.commute.cycle_max_mps {
            return Err(CoreError::InvalidConfig(
                "commute.walk_max_mps must not exceed commute.cycle_max_mps".to_string(),
            ));
        }
        let durations = [
            ("move_cooldown_minutes", self.nudges.move_cooldown_minutes),
            ("snooze_minutes", self.nudges.snooze_minutes),
        ];
        for (name, minutes) in durations {
            if !(0..=MAX_NUDGE_MINUTES).contains(&minutes) {
                return Err(CoreError::InvalidConfig(format!(
                    "nudges.{} must be between 0 and {}: {}",
                    name, MAX_NUDGE_MINUTES, minutes
                )));
            }
        }
        if self.local_offset().is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }

    pub fn local_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }

    /// Local offset, or UTC when the configured offset is out of range
    pub fn local_offset_or_utc(&self) -> FixedOffset {
        self.local_offset().unwrap_or_else(|| {
            log::warn!(
                "utc_offset_minutes {} out of range, using UTC",
                self.utc_offset_minutes
            );
            Utc.fix()
        })
    }
}
