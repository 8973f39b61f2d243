//! MoveMore CLI - run the detectors and the nudge policy over recorded data
//!
//! Commands:
//! - bouts / streaks: segment motion windows
//! - stairs: aggregate floor counts into stair events
//! - commutes: sessionize location samples
//! - nudge / snooze: drive the nudge policy against a state file
//! - config: print the effective configuration
//! - doctor: diagnose configuration and state files

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use movemore_core::config::AppConfig;
use movemore_core::detectors::{detect_sessions, StairEventAggregator, WalkBoutSegmenter};
use movemore_core::pipeline::segment_motion;
use movemore_core::policy::{NotificationDispatcher, NudgePolicyEngine, SuppressReason};
use movemore_core::storage::{JsonFileStore, Storage};
use movemore_core::types::{
    LocationSample, MotionWindow, NudgeType, PlaceType, SedentaryStreak, StairsWindow,
};
use movemore_core::{CoreError, PRODUCER_NAME, VERSION};

/// MoveMore - on-device movement event segmentation and nudges
#[derive(Parser)]
#[command(name = "movemore")]
#[command(version = VERSION)]
#[command(about = "Segment movement data and evaluate move nudges", long_about = None)]
struct Cli {
    /// Configuration file (defaults are used when missing or malformed)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect walk bouts in a JSON array of motion windows
    Bouts {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Detect sedentary streaks in a JSON array of motion windows
    Streaks {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Aggregate a JSON array of stairs windows into stair events
    Stairs {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Place attached to the events
        #[arg(long, default_value = "other")]
        context: Place,

        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Sessionize a JSON array of location samples into commutes
    Commutes {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Evaluate a sedentary streak for a move nudge
    Nudge {
        /// Streak JSON file (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Policy state file, created if missing
        #[arg(long)]
        state: PathBuf,

        /// Evaluation time (RFC 3339, defaults to now)
        #[arg(long)]
        now: Option<String>,
    },

    /// Snooze a nudge type
    Snooze {
        #[arg(long, default_value = "move")]
        nudge_type: Kind,

        /// Policy state file, created if missing
        #[arg(long)]
        state: PathBuf,

        /// Snooze length (defaults to the configured length)
        #[arg(long)]
        minutes: Option<i64>,

        /// Snooze start (RFC 3339, defaults to now)
        #[arg(long)]
        now: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Diagnose configuration and state
    Doctor {
        /// Check a policy state file
        #[arg(long)]
        state: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum Place {
    Home,
    Work,
    Other,
}

impl From<Place> for PlaceType {
    fn from(place: Place) -> Self {
        match place {
            Place::Home => PlaceType::Home,
            Place::Work => PlaceType::Work,
            Place::Other => PlaceType::Other,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Move,
    Stairs,
    Commute,
}

impl From<Kind> for NudgeType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Move => NudgeType::Move,
            Kind::Stairs => NudgeType::Stairs,
            Kind::Commute => NudgeType::Commute,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MoveMoreCliError> {
    let config = match &cli.config {
        Some(path) => AppConfig::load(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Bouts {
            input,
            output_format,
        } => {
            let windows: Vec<MotionWindow> = read_json(&input)?;
            let bouts = WalkBoutSegmenter::new(&config.walk_bout).detect(&windows, Utc::now());
            print_events(&bouts, &output_format)
        }

        Commands::Streaks {
            input,
            output_format,
        } => {
            let windows: Vec<MotionWindow> = read_json(&input)?;
            let events = segment_motion(&windows, &config, Utc::now());
            print_events(&events.streaks, &output_format)
        }

        Commands::Stairs {
            input,
            context,
            output_format,
        } => {
            let windows: Vec<StairsWindow> = read_json(&input)?;
            let events = StairEventAggregator::new(&config.stairs).detect(&windows, context.into());
            print_events(&events, &output_format)
        }

        Commands::Commutes {
            input,
            output_format,
        } => {
            let samples: Vec<LocationSample> = read_json(&input)?;
            let sessions = detect_sessions(&samples, &config.commute);
            print_events(&sessions, &output_format)
        }

        Commands::Nudge { input, state, now } => cmd_nudge(&config, &input, &state, now.as_deref()),

        Commands::Snooze {
            nudge_type,
            state,
            minutes,
            now,
        } => {
            let engine = open_engine(&config, &state);
            let now = parse_now(now.as_deref())?;
            let minutes = minutes.unwrap_or(config.nudges.snooze_minutes);
            let record = engine.snooze(nudge_type.into(), now, minutes)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }

        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }

        Commands::Doctor { state, json } => cmd_doctor(cli.config.as_deref(), state.as_deref(), json),
    }
}

/// Logs dispatches; the decision printed on stdout carries the request
struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn send(&self, title: &str, body: &str, category: NudgeType) {
        log::info!("[{}] {} {}", category.category_id(), title, body);
    }
}

fn open_engine(config: &AppConfig, state: &Path) -> NudgePolicyEngine {
    let storage = Storage::new(Arc::new(JsonFileStore::open(state)));
    NudgePolicyEngine::new(config, storage, Arc::new(LogDispatcher))
}

fn cmd_nudge(
    config: &AppConfig,
    input: &Path,
    state: &Path,
    now: Option<&str>,
) -> Result<(), MoveMoreCliError> {
    let mut streak: SedentaryStreak = read_json(input)?;
    let now = parse_now(now)?;
    let engine = open_engine(config, state);

    let decision = engine.evaluate(&mut streak, now);
    let report = NudgeReport {
        fire: decision.fire(),
        request: decision.request().map(|r| NudgeRequestView {
            title: r.title.clone(),
            body: r.body.clone(),
            category: r.category.category_id().to_string(),
        }),
        reason: decision.suppress_reason(),
        fired_today: engine.fired_today(NudgeType::Move, now),
        streak,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, state: Option<&Path>, json: bool) -> Result<(), MoveMoreCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("MoveMore version {}", VERSION),
    });

    match config {
        Some(path) if path.exists() => {
            let check = match fs::read_to_string(path) {
                Ok(content) => match AppConfig::from_json(&content) {
                    Ok(parsed) => {
                        let quiet = if parsed.nudges.quiet_hours().is_some() {
                            format!("quiet {}-{}", parsed.nudges.quiet_start, parsed.nudges.quiet_end)
                        } else {
                            "quiet hours disabled".to_string()
                        };
                        DoctorCheck {
                            name: "config".to_string(),
                            status: CheckStatus::Ok,
                            message: format!(
                                "Configuration valid ({} nudges/day, {})",
                                parsed.nudges.max_per_day, quiet
                            ),
                        }
                    }
                    Err(e) => DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Warning,
                        message: format!("Configuration rejected, defaults will be used: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read configuration file: {}", e),
                },
            };
            checks.push(check);
        }
        Some(_) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Configuration file does not exist, defaults will be used".to_string(),
        }),
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using default configuration".to_string(),
        }),
    }

    if let Some(state_path) = state {
        let check = if !state_path.exists() {
            DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Warning,
                message: "State file does not exist and will be created".to_string(),
            }
        } else {
            match fs::read_to_string(state_path) {
                Ok(content) => {
                    match serde_json::from_str::<std::collections::HashMap<String, String>>(&content) {
                        Ok(values) => DoctorCheck {
                            name: "state".to_string(),
                            status: CheckStatus::Ok,
                            message: format!("State file valid ({} keys)", values.len()),
                        },
                        Err(e) => DoctorCheck {
                            name: "state".to_string(),
                            status: CheckStatus::Error,
                            message: format!("Invalid state JSON: {}", e),
                        },
                    }
                }
                Err(e) => DoctorCheck {
                    name: "state".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read state file: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY; pass --input for detector commands".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for input)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("MoveMore Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(MoveMoreCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, MoveMoreCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(input: &Path) -> Result<T, MoveMoreCliError> {
    let data = read_input(input)?;
    if data.trim().is_empty() {
        return Err(MoveMoreCliError::EmptyInput);
    }
    Ok(serde_json::from_str(&data)?)
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>, MoveMoreCliError> {
    match now {
        Some(value) => DateTime::parse_from_rfc3339(value.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MoveMoreCliError::ParseError(format!("Invalid --now {:?}: {}", value, e))),
        None => Ok(Utc::now()),
    }
}

fn print_events<T: Serialize>(events: &[T], format: &OutputFormat) -> Result<(), MoveMoreCliError> {
    match format {
        OutputFormat::Ndjson => {
            for event in events {
                println!("{}", serde_json::to_string(event)?);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(events)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(events)?),
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum MoveMoreCliError {
    Io(io::Error),
    Core(CoreError),
    Json(serde_json::Error),
    EmptyInput,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for MoveMoreCliError {
    fn from(e: io::Error) -> Self {
        MoveMoreCliError::Io(e)
    }
}

impl From<CoreError> for MoveMoreCliError {
    fn from(e: CoreError) -> Self {
        MoveMoreCliError::Core(e)
    }
}

impl From<serde_json::Error> for MoveMoreCliError {
    fn from(e: serde_json::Error) -> Self {
        MoveMoreCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<MoveMoreCliError> for CliError {
    fn from(e: MoveMoreCliError) -> Self {
        match e {
            MoveMoreCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            MoveMoreCliError::Core(e) => CliError {
                code: "CORE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'movemore doctor' to check configuration and state".to_string()),
            },
            MoveMoreCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax and field names".to_string()),
            },
            MoveMoreCliError::EmptyInput => CliError {
                code: "EMPTY_INPUT".to_string(),
                message: "Input is empty".to_string(),
                hint: Some("Pass --input or pipe JSON on stdin".to_string()),
            },
            MoveMoreCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            MoveMoreCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Timestamps use RFC 3339, e.g. 2024-05-01T12:00:00Z".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct NudgeRequestView {
    title: String,
    body: String,
    category: String,
}

#[derive(Serialize)]
struct NudgeReport {
    fire: bool,
    request: Option<NudgeRequestView>,
    reason: Option<SuppressReason>,
    fired_today: u32,
    streak: SedentaryStreak,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
