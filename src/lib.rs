//! MoveMore core - on-device movement event segmentation and nudge policy
//!
//! Raw pedometer, activity, altimeter and location readings are turned into
//! discrete events (walk bouts, stair events, sedentary streaks, commutes) by
//! pure detectors. A policy engine decides when a long sedentary streak earns
//! a move nudge, under quiet hours, a cooldown and a daily quota.
//!
//! ## Modules
//!
//! - **Detectors**: stateless segmentation over sorted input slices
//! - **Policy**: rate-limited nudge decisions backed by persisted state
//! - **Pipeline**: checkpointed ingestion and the per-wake processing cycle

pub mod aggregate;
pub mod config;
pub mod detectors;
pub mod error;
pub mod ingestion;
pub mod pipeline;
pub mod policy;
pub mod storage;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregate::{aggregate_day, DailyAggregator, DayEvents};
pub use config::AppConfig;
pub use error::CoreError;
pub use ingestion::{Backfill, Ingestor, LocationSource, MotionSource, StairsSource, WakeReason};
pub use pipeline::{segment_motion, segment_motion_continuing, CycleReport, MovementProcessor};
pub use policy::{NotificationDispatcher, NudgeDecision, NudgePolicyEngine, SuppressReason};
pub use storage::{InMemoryStore, JsonFileStore, KeyValueStore, Storage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "movemore-core";
