//! FFI bindings for MoveMore
//!
//! C-compatible functions for calling the detectors and the nudge policy from
//! the host app. Inputs and outputs are JSON in null-terminated C strings.
//! Returned strings are allocated here and must be freed with
//! `movemore_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AppConfig;
use crate::detectors::{detect_sessions, StairEventAggregator, WalkBoutSegmenter};
use crate::error::CoreError;
use crate::pipeline::segment_motion;
use crate::policy::{NotificationDispatcher, NudgePolicyEngine, SuppressReason};
use crate::storage::{InMemoryStore, Storage};
use crate::types::{
    DispatchRequest, LocationSample, MotionWindow, NudgeType, PlaceType, SedentaryStreak,
    StairsWindow,
};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Required string argument; records an error naming `what` when missing
unsafe fn required_arg(ptr: *const c_char, what: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {} string pointer", what));
    }
    value
}

/// NULL or empty config means defaults; anything else must parse
unsafe fn config_arg(ptr: *const c_char) -> Result<AppConfig, CoreError> {
    match cstr_to_string(ptr) {
        Some(json) if !json.trim().is_empty() => AppConfig::from_json(&json),
        _ => Ok(AppConfig::default()),
    }
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidWindow(format!("invalid timestamp {:?}: {}", value, e)))
}

/// Serialize `result` or record its error, returning NULL
fn json_result<T: Serialize>(result: Result<T, CoreError>) -> *mut c_char {
    match result.and_then(|value| serde_json::to_string(&value).map_err(CoreError::from)) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Detect walk bouts in a JSON array of motion windows.
///
/// # Safety
/// - `windows_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_detect_bouts(
    windows_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(windows_str) = required_arg(windows_json, "windows JSON") else {
        return ptr::null_mut();
    };

    json_result(config_arg(config_json).and_then(|config| {
        let windows: Vec<MotionWindow> = serde_json::from_str(&windows_str)?;
        Ok(WalkBoutSegmenter::new(&config.walk_bout).detect(&windows, Utc::now()))
    }))
}

/// Detect sedentary streaks in a JSON array of motion windows. Streaks are
/// resolved against bouts found in the same windows.
///
/// # Safety
/// - `windows_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_detect_streaks(
    windows_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(windows_str) = required_arg(windows_json, "windows JSON") else {
        return ptr::null_mut();
    };

    json_result(config_arg(config_json).and_then(|config| {
        let windows: Vec<MotionWindow> = serde_json::from_str(&windows_str)?;
        Ok(segment_motion(&windows, &config, Utc::now()).streaks)
    }))
}

/// Aggregate a JSON array of stairs windows into stair events.
///
/// # Safety
/// - `windows_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - `context` may be NULL for `"other"`; otherwise `"home"`, `"work"` or `"other"`.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_detect_stairs(
    windows_json: *const c_char,
    config_json: *const c_char,
    context: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(windows_str) = required_arg(windows_json, "windows JSON") else {
        return ptr::null_mut();
    };

    json_result(config_arg(config_json).and_then(|config| {
        let place = match cstr_to_string(context) {
            Some(name) => serde_json::from_value::<PlaceType>(serde_json::Value::String(name))?,
            None => PlaceType::Other,
        };
        let windows: Vec<StairsWindow> = serde_json::from_str(&windows_str)?;
        Ok(StairEventAggregator::new(&config.stairs).detect(&windows, place))
    }))
}

/// Sessionize a JSON array of location samples into commutes.
///
/// # Safety
/// - `samples_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_detect_commutes(
    samples_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(samples_str) = required_arg(samples_json, "samples JSON") else {
        return ptr::null_mut();
    };

    json_result(config_arg(config_json).and_then(|config| {
        let samples: Vec<LocationSample> = serde_json::from_str(&samples_str)?;
        Ok(detect_sessions(&samples, &config.commute))
    }))
}

/// Default configuration as JSON.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
#[no_mangle]
pub unsafe extern "C" fn movemore_default_config() -> *mut c_char {
    clear_last_error();
    json_result(Ok(AppConfig::default()))
}

// ============================================================================
// Nudge Engine API
// ============================================================================

/// Dispatch is left to the host, which posts the request returned by
/// `movemore_engine_evaluate`
struct HostDispatcher;

impl NotificationDispatcher for HostDispatcher {
    fn send(&self, title: &str, _body: &str, category: NudgeType) {
        log::debug!("handing {} nudge {:?} to host", category.as_str(), title);
    }
}

/// Opaque handle to a nudge policy engine and its state
pub struct NudgeEngineHandle {
    engine: NudgePolicyEngine,
    store: Arc<InMemoryStore>,
}

#[derive(Serialize)]
struct DecisionView<'a> {
    fire: bool,
    request: Option<&'a DispatchRequest>,
    reason: Option<SuppressReason>,
    streak: &'a SedentaryStreak,
}

/// Create an engine. `state_json` is a snapshot from
/// `movemore_engine_save_state`, or NULL to start fresh.
///
/// # Safety
/// - `config_json` and `state_json` may be NULL.
/// - Must be freed with `movemore_engine_free`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_engine_new(
    config_json: *const c_char,
    state_json: *const c_char,
) -> *mut NudgeEngineHandle {
    clear_last_error();

    let config = match config_arg(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let store = match cstr_to_string(state_json) {
        Some(json) => match InMemoryStore::from_json(&json) {
            Ok(store) => store,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        },
        None => InMemoryStore::new(),
    };
    let store = Arc::new(store);

    let engine = NudgePolicyEngine::new(
        &config,
        Storage::new(store.clone()),
        Arc::new(HostDispatcher),
    );
    Box::into_raw(Box::new(NudgeEngineHandle { engine, store }))
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `movemore_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn movemore_engine_free(engine: *mut NudgeEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Evaluate a streak for a move nudge at `now` (RFC 3339).
///
/// Returns `{"fire": bool, "request": {...}|null, "reason": "..."|null,
/// "streak": {...}}`, where `streak` carries the updated `nudged` flag.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `movemore_engine_new`.
/// - `streak_json` and `now` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_engine_evaluate(
    engine: *const NudgeEngineHandle,
    streak_json: *const c_char,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let Some(streak_str) = required_arg(streak_json, "streak JSON") else {
        return ptr::null_mut();
    };
    let Some(now_str) = required_arg(now, "timestamp") else {
        return ptr::null_mut();
    };

    let evaluated = parse_instant(&now_str).and_then(|now| {
        let streak: SedentaryStreak = serde_json::from_str(&streak_str)?;
        Ok((now, streak))
    });
    let (now, mut streak) = match evaluated {
        Ok(parsed) => parsed,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let decision = handle.engine.evaluate(&mut streak, now);
    let view = DecisionView {
        fire: decision.fire(),
        request: decision.request(),
        reason: decision.suppress_reason(),
        streak: &streak,
    };
    json_result(Ok(view))
}

/// Snooze a nudge type for `minutes` from `now` (RFC 3339). A negative
/// `minutes` uses the configured snooze length.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `movemore_engine_new`.
/// - `nudge_type` must be `"move"`, `"stairs"` or `"commute"`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn movemore_engine_snooze(
    engine: *const NudgeEngineHandle,
    nudge_type: *const c_char,
    now: *const c_char,
    minutes: i64,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &*engine;

    let Some(type_str) = required_arg(nudge_type, "nudge type") else {
        return -1;
    };
    let Some(now_str) = required_arg(now, "timestamp") else {
        return -1;
    };

    let minutes = if minutes < 0 {
        handle.engine.default_snooze_minutes()
    } else {
        minutes
    };

    let result = parse_instant(&now_str).and_then(|now| {
        let nudge_type: NudgeType =
            serde_json::from_value(serde_json::Value::String(type_str))?;
        handle.engine.snooze(nudge_type, now, minutes)
    });
    match result {
        Ok(_) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Snapshot engine state as JSON for the host to persist.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `movemore_engine_new`.
/// - Returns a newly allocated string that must be freed with `movemore_free_string`.
/// - Returns NULL on error; call `movemore_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn movemore_engine_save_state(engine: *const NudgeEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    match handle.store.to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by MoveMore functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a MoveMore function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn movemore_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next MoveMore call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn movemore_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn movemore_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
