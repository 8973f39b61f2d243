//! Commute sessionization
//!
//! Location fixes are walked pairwise. Pairs moving at walking pace or faster
//! chain into candidate sessions; a candidate becomes a commute when it lasts
//! long enough and ends far enough from where it started. Mode comes from the
//! median step speed. Only displacement and speed thresholds are used.

use crate::config::CommuteConfig;
use crate::types::{CommuteMode, CommuteSession, LocationSample};
use uuid::Uuid;

/// Slowest step speed still counted as travelling (m/s)
pub const MIN_MOVING_SPEED_MPS: f64 = 0.5;

/// Longest gap between fixes that can stay inside one session (seconds)
pub const MAX_SAMPLE_GAP_SEC: i64 = 600;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two fixes in meters
pub fn haversine_meters(a: &LocationSample, b: &LocationSample) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Classify a median speed into a travel mode
pub fn classify_mode(median_speed_mps: f64, config: &CommuteConfig) -> CommuteMode {
    if median_speed_mps <= config.walk_max_mps {
        CommuteMode::Walk
    } else if median_speed_mps <= config.cycle_max_mps {
        CommuteMode::Cycle
    } else {
        CommuteMode::Automotive
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Candidate session: indices into the sorted samples plus per-step stats
struct Candidate {
    first: usize,
    last: usize,
    path_meters: f64,
    speeds: Vec<f64>,
}

/// Sessionize `samples` into commute sessions
pub fn detect_sessions(samples: &[LocationSample], config: &CommuteConfig) -> Vec<CommuteSession> {
    let mut sorted: Vec<&LocationSample> = samples.iter().collect();
    sorted.sort_by_key(|s| s.timestamp);

    let mut candidates = Vec::new();
    let mut open: Option<Candidate> = None;

    for (i, pair) in sorted.windows(2).enumerate() {
        let (prev, next) = (pair[0], pair[1]);
        let dt_sec = (next.timestamp - prev.timestamp).num_seconds();
        let distance = haversine_meters(prev, next);
        let speed = match next.speed_mps {
            Some(reported) if reported.is_finite() && reported >= 0.0 => reported,
            _ if dt_sec > 0 => distance / dt_sec as f64,
            _ => 0.0,
        };

        let moving = dt_sec > 0 && dt_sec <= MAX_SAMPLE_GAP_SEC && speed >= MIN_MOVING_SPEED_MPS;
        if moving {
            let candidate = open.get_or_insert(Candidate {
                first: i,
                last: i,
                path_meters: 0.0,
                speeds: Vec::new(),
            });
            candidate.last = i + 1;
            candidate.path_meters += distance;
            candidate.speeds.push(speed);
        } else if let Some(candidate) = open.take() {
            candidates.push(candidate);
        }
    }
    if let Some(candidate) = open.take() {
        candidates.push(candidate);
    }

    candidates
        .into_iter()
        .filter_map(|mut candidate| {
            let start = sorted[candidate.first];
            let end = sorted[candidate.last];
            let minutes = (end.timestamp - start.timestamp).num_minutes();
            let displacement_km = haversine_meters(start, end) / 1000.0;
            if minutes < config.min_duration_min || displacement_km < config.min_displacement_km {
                log::debug!(
                    "dropping travel segment {} min, {:.2} km displacement",
                    minutes,
                    displacement_km
                );
                return None;
            }
            let median_speed_mps = median(&mut candidate.speeds)?;
            Some(CommuteSession {
                id: Uuid::new_v4(),
                start: start.timestamp,
                end: end.timestamp,
                mode: classify_mode(median_speed_mps, config),
                distance_km: candidate.path_meters / 1000.0,
                median_speed_mps,
            })
        })
        .collect()
}

/// Commute sessionizer bound to a configuration
pub struct CommuteSessionizer {
    config: CommuteConfig,
}

impl CommuteSessionizer {
    pub fn new(config: &CommuteConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn detect(&self, samples: &[LocationSample]) -> Vec<CommuteSession> {
        detect_sessions(samples, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 9, 8, 0, 0).unwrap()
    }

    /// Degrees of latitude per meter along a meridian
    const DEG_PER_M: f64 = 1.0 / 111_194.9;

    /// Samples heading north at `speed` m/s, one fix per `step_sec`
    fn track(start_sec: i64, count: i64, step_sec: i64, speed: f64, lat0: f64) -> Vec<LocationSample> {
        (0..count)
            .map(|i| LocationSample {
                timestamp: base() + Duration::seconds(start_sec + i * step_sec),
                latitude: lat0 + (i * step_sec) as f64 * speed * DEG_PER_M,
                longitude: 13.4,
                speed_mps: None,
            })
            .collect()
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let a = LocationSample {
            timestamp: base(),
            latitude: 52.0,
            longitude: 13.4,
            speed_mps: None,
        };
        let b = LocationSample {
            latitude: 53.0,
            ..a.clone()
        };
        assert!((haversine_meters(&a, &b) - 111_194.9).abs() < 5.0);
    }

    #[test]
    fn test_cycle_commute_detected() {
        // 15 minutes at 5 m/s = 4.5 km
        let samples = track(0, 16, 60, 5.0, 52.5);
        let sessions = detect_sessions(&samples, &CommuteConfig::default());

        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.mode, CommuteMode::Cycle);
        assert_eq!(session.duration_minutes(), 15);
        assert!((session.distance_km - 4.5).abs() < 0.05);
        assert!((session.median_speed_mps - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_stationary_fixes_ignored() {
        let samples = track(0, 30, 60, 0.0, 52.5);
        assert!(detect_sessions(&samples, &CommuteConfig::default()).is_empty());
    }

    #[test]
    fn test_short_displacement_rejected() {
        // 10 minutes walking at 1.2 m/s is only 720 m
        let samples = track(0, 11, 60, 1.2, 52.5);
        assert!(detect_sessions(&samples, &CommuteConfig::default()).is_empty());
    }

    #[test]
    fn test_long_gap_splits_sessions() {
        let mut samples = track(0, 11, 60, 15.0, 52.5);
        let last_lat = samples.last().unwrap().latitude;
        samples.extend(track(600 + 3600, 11, 60, 15.0, last_lat + 0.1));

        let sessions = detect_sessions(&samples, &CommuteConfig::default());

        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.mode == CommuteMode::Automotive));
    }

    #[test]
    fn test_reported_speed_preferred() {
        let mut samples = track(0, 21, 60, 1.5, 52.5);
        for sample in samples.iter_mut() {
            sample.speed_mps = Some(1.5);
        }
        let sessions = detect_sessions(&samples, &CommuteConfig::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].mode, CommuteMode::Walk);
    }

    #[test]
    fn test_classify_mode_boundaries() {
        let config = CommuteConfig::default();
        assert_eq!(classify_mode(2.0, &config), CommuteMode::Walk);
        assert_eq!(classify_mode(2.01, &config), CommuteMode::Cycle);
        assert_eq!(classify_mode(8.0, &config), CommuteMode::Cycle);
        assert_eq!(classify_mode(12.0, &config), CommuteMode::Automotive);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn test_sessionizer_uses_config() {
        let sessionizer = CommuteSessionizer::new(&CommuteConfig {
            min_displacement_km: 0.5,
            ..CommuteConfig::default()
        });
        let samples = track(0, 11, 60, 1.2, 52.5);
        assert_eq!(sessionizer.detect(&samples).len(), 1);
    }
}
