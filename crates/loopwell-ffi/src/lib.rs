//! C FFI surface for loopwell.
//!
//! Pattern: opaque EngineHandle + C strings + JSON serialization.
//!
//! Any platform with C FFI (Dart, Swift, Kotlin, Python, Node.js) can drive
//! the engine: hand it a track descriptor as JSON, send playback commands as
//! JSON, poll the snapshot and the event queue.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use loopwell_core::effects::fetch::{FileFetcher, SourceFetcher};
use loopwell_core::{Engine, EngineConfig, PlaybackCommand, PlayerEvent, TrackDescriptor};
use parking_lot::Mutex;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `loopwell_string_free`).
#[no_mangle]
pub extern "C" fn loopwell_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from loopwell FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn loopwell_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct EngineHandle {
    _private: [u8; 0],
}

struct EngineHandleInner {
    engine: Arc<Engine>,
    events: Mutex<Receiver<PlayerEvent>>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Opens an engine on the default audio device. Returns an opaque handle,
/// or NULL on error.
///
/// `config_json` may be NULL (defaults) or an EngineConfig object. An extra
/// `"root"` key sets the directory relative part locators resolve against.
#[no_mangle]
pub extern "C" fn loopwell_open(config_json: *const c_char) -> *mut EngineHandle {
    open_with(config_json, |fetcher, config| Engine::native(fetcher, config))
}

/// Opens an engine that schedules everything but produces no sound.
#[no_mangle]
pub extern "C" fn loopwell_open_headless(config_json: *const c_char) -> *mut EngineHandle {
    open_with(config_json, |fetcher, config| Engine::headless(fetcher, config))
}

fn open_with(
    config_json: *const c_char,
    build: impl FnOnce(Arc<SourceFetcher>, EngineConfig) -> loopwell_core::Result<Engine>,
) -> *mut EngineHandle {
    clear_error();
    let value = if config_json.is_null() {
        Value::Object(Default::default())
    } else {
        let json = match read_cstr(config_json) {
            Ok(s) => s,
            Err(e) => {
                set_error(e);
                return ptr::null_mut();
            }
        };
        match serde_json::from_str::<Value>(&json) {
            Ok(v) => v,
            Err(e) => {
                set_error(e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let config = match EngineConfig::from_value(&value) {
        Ok(c) => c,
        Err(e) => {
            set_error(e.to_string());
            return ptr::null_mut();
        }
    };
    let files = match value["root"].as_str() {
        Some(root) => FileFetcher::with_root(root),
        None => FileFetcher::new(),
    };

    match build(Arc::new(SourceFetcher::new(files)), config) {
        Ok(engine) => {
            let events = engine.subscribe();
            engine.start();
            let inner = EngineHandleInner {
                engine: Arc::new(engine),
                events: Mutex::new(events),
            };
            Box::into_raw(Box::new(inner)) as *mut EngineHandle
        }
        Err(e) => {
            set_error(e.to_string());
            ptr::null_mut()
        }
    }
}

/// Closes the engine and releases all resources.
#[no_mangle]
pub extern "C" fn loopwell_close(handle: *mut EngineHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut EngineHandleInner);
            inner.engine.shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

/// Replace the current track with a TrackDescriptor JSON. NULL clears it.
/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn loopwell_set_track(handle: *mut EngineHandle, track_json: *const c_char) -> i32 {
    clear_error();
    let inner = match inner_ref(handle) {
        Ok(i) => i,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };

    let track = if track_json.is_null() {
        None
    } else {
        let json = match read_cstr(track_json) {
            Ok(s) => s,
            Err(e) => {
                set_error(e);
                return 0;
            }
        };
        match TrackDescriptor::from_json(&json) {
            Ok(t) => Some(Arc::new(t)),
            Err(e) => {
                set_error(e.to_string());
                return 0;
            }
        }
    };

    match inner.engine.set_track(track) {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.to_string());
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Send a playback command. `json` is a PlaybackCommand JSON.
/// Returns 1 on success, 0 on error.
///
/// Commands that may load parts (`play`, `toggle_play`) run on a background
/// thread; their outcome arrives through `loopwell_poll_event` and the
/// snapshot's `error` field.
#[no_mangle]
pub extern "C" fn loopwell_command(handle: *mut EngineHandle, json: *const c_char) -> i32 {
    clear_error();
    let inner = match inner_ref(handle) {
        Ok(i) => i,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };
    let json_str = match read_cstr(json) {
        Ok(s) => s,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };
    let cmd: PlaybackCommand = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            set_error(e.to_string());
            return 0;
        }
    };

    match cmd {
        PlaybackCommand::Play | PlaybackCommand::TogglePlay { .. } => {
            let engine = Arc::clone(&inner.engine);
            thread::spawn(move || {
                if let Err(e) = engine.command(cmd) {
                    log::warn!("loopwell: background command failed: {}", e);
                }
            });
            1
        }
        _ => match inner.engine.command(cmd) {
            Ok(()) => 1,
            Err(e) => {
                set_error(e.to_string());
                0
            }
        },
    }
}

/// Poll the timer once, for hosts that drive their own loop.
/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn loopwell_tick(handle: *mut EngineHandle) -> i32 {
    clear_error();
    match inner_ref(handle) {
        Ok(inner) => {
            inner.engine.tick();
            1
        }
        Err(e) => {
            set_error(e);
            0
        }
    }
}

/// Get the current PlayerSnapshot as JSON (caller frees).
#[no_mangle]
pub extern "C" fn loopwell_state(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    let inner = match inner_ref(handle) {
        Ok(i) => i,
        Err(e) => return err_null(e),
    };
    json_to_cstr(&inner.engine.snapshot())
}

/// Next pending PlayerEvent as JSON (caller frees), or NULL when the queue
/// is empty.
#[no_mangle]
pub extern "C" fn loopwell_poll_event(handle: *mut EngineHandle) -> *mut c_char {
    clear_error();
    let inner = match inner_ref(handle) {
        Ok(i) => i,
        Err(e) => return err_null(e),
    };
    let next = inner.events.lock().try_recv().ok();
    match next {
        Some(event) => json_to_cstr(&event),
        None => ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn loopwell_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn inner_ref<'a>(handle: *mut EngineHandle) -> Result<&'a EngineHandleInner, String> {
    if handle.is_null() {
        return Err("null engine handle".into());
    }
    Ok(unsafe { &*(handle as *mut EngineHandleInner) })
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------
