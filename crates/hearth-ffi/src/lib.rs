//! C ABI for the hearth embedded server.
//!
//! Exposes the four-call surface from `rpcserver` hosts:
//!
//! - `init(cmd)`            — build the process-wide server, 0 on success
//! - `json_rpc(m, p, h, b)` — dispatch one call, returns an owned JSON string
//! - `get_completion(json)` — completion fast path, returns an owned JSON string
//! - `deinit()`             — drain and tear down
//! - `hearth_string_free(p)` — release any string returned above
//!
//! Boundary rules enforced here, on every path:
//!
//! - returned pointers are never null, always NUL-terminated UTF-8 JSON, and
//!   must be released exactly once via `hearth_string_free`
//! - panics never cross the boundary; they degrade to an `internal_error`
//!   envelope
//! - null input pointers are read as empty strings and rejected by the
//!   domain's own validation, not by crashing

use std::ffi::{c_char, c_int, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Once};

use tokio::runtime::Runtime;

use hearth_core::{ResponseEnvelope, Server, ServerError};

/// The single process-wide server instance plus the runtime that drives it.
///
/// Both halves are behind `Arc` so concurrent callers can finish their call
/// against a server that `deinit` has already evicted from the slot; the
/// runtime is only dropped once the last in-flight call releases it.
struct FfiServer {
    runtime: Arc<Runtime>,
    server: Arc<Server>,
}

static SLOT: Mutex<Option<FfiServer>> = Mutex::new(None);
static TRACING: Once = Once::new();

// ─── Entry points ──────────────────────────────────────────────────────────

/// Initialize the server from a command string. Returns 0 on success,
/// 1 for a bad command string, 2 if already initialized, 3 for resource
/// failures.
#[no_mangle]
pub extern "C" fn init(cmd: *const c_char) -> c_int {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });

    let result = catch_unwind(|| init_impl(cmd));
    match result {
        Ok(status) => status,
        Err(_) => {
            tracing::error!("[ffi] panic during init");
            ServerError::Internal("panic during init".into()).init_status()
        }
    }
}

fn init_impl(cmd: *const c_char) -> c_int {
    let cmd = match read_str(cmd) {
        Ok(s) => s,
        Err(_) => {
            return ServerError::BadCommand("command string is not valid UTF-8".into())
                .init_status()
        }
    };

    let mut slot = lock_slot();
    if slot.is_some() {
        tracing::warn!("[ffi] init called while already initialized");
        return ServerError::AlreadyInitialized("init called twice".into()).init_status();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("[ffi] runtime construction failed: {}", e);
            return ServerError::Internal(format!("runtime construction failed: {}", e))
                .init_status();
        }
    };

    let server = match Server::new(&cmd) {
        Ok(server) => server,
        Err(err) => return err.init_status(),
    };

    *slot = Some(FfiServer {
        runtime: Arc::new(runtime),
        server: Arc::new(server),
    });
    0
}

/// Dispatch one HTTP-shaped call. Always returns an owned envelope string.
#[no_mangle]
pub extern "C" fn json_rpc(
    method: *const c_char,
    path: *const c_char,
    headers: *const c_char,
    body: *const c_char,
) -> *mut c_char {
    guarded(|| {
        let method = read_str(method)?;
        let path = read_str(path)?;
        let headers = read_str(headers)?;
        let body = read_str(body)?;

        let (runtime, server) = current_server()?;
        Ok(runtime.block_on(server.json_rpc(&method, &path, &headers, &body)))
    })
}

/// Run a completion to its final result. Always returns an owned envelope
/// string.
#[no_mangle]
pub extern "C" fn get_completion(req_json: *const c_char) -> *mut c_char {
    guarded(|| {
        let req_json = read_str(req_json)?;
        let (runtime, server) = current_server()?;
        Ok(runtime.block_on(server.get_completion(&req_json)))
    })
}

/// Drain in-flight work and tear the server down. Safe to call repeatedly;
/// calls after the first are no-ops.
#[no_mangle]
pub extern "C" fn deinit() {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let taken = lock_slot().take();
        if let Some(instance) = taken {
            instance.runtime.block_on(instance.server.shutdown());
            // Runtime and server drop here unless a concurrent call still
            // holds a clone; the last holder drops them.
        }
    }));
    if result.is_err() {
        tracing::error!("[ffi] panic during deinit");
    }
}

/// Release a string previously returned by `json_rpc`/`get_completion`.
///
/// # Safety
///
/// `ptr` must be a pointer returned by this library, released at most once.
#[no_mangle]
pub unsafe extern "C" fn hearth_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ─── Boundary plumbing ─────────────────────────────────────────────────────

/// Run a fallible call body, converting every failure mode (domain error,
/// panic, NUL-poisoned output) into an owned envelope string.
fn guarded<F>(f: F) -> *mut c_char
where
    F: FnOnce() -> Result<String, ServerError>,
{
    let json = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(json)) => json,
        Ok(Err(err)) => ResponseEnvelope::error(&err).to_json(),
        Err(_) => {
            tracing::error!("[ffi] panic during call");
            ResponseEnvelope::error(&ServerError::Internal("panic during call".into())).to_json()
        }
    };
    into_owned_cstring(json)
}

fn lock_slot() -> std::sync::MutexGuard<'static, Option<FfiServer>> {
    // A poisoned slot means a panic mid-update; the contained state is still
    // a coherent Option, so continue with it rather than aborting every call.
    SLOT.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clone the current server and runtime out of the slot without holding the
/// lock across the (potentially long) call.
fn current_server() -> Result<(Arc<Runtime>, Arc<Server>), ServerError> {
    let slot = lock_slot();
    match slot.as_ref() {
        Some(instance) => Ok((Arc::clone(&instance.runtime), Arc::clone(&instance.server))),
        None => Err(ServerError::NotInitialized(
            "server is not initialized".into(),
        )),
    }
}

/// Read a borrowed C string. Null reads as empty (the domain rejects empty
/// where it matters); invalid UTF-8 is a caller error, not a crash.
fn read_str(ptr: *const c_char) -> Result<String, ServerError> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    let cstr = unsafe { CStr::from_ptr(ptr) };
    cstr.to_str()
        .map(|s| s.to_string())
        .map_err(|_| ServerError::InvalidRequest("argument is not valid UTF-8".into()))
}

/// Hand ownership of `json` to the caller. Serde never emits interior NULs,
/// but if one sneaks through the string is sanitized instead of truncated.
fn into_owned_cstring(json: String) -> *mut c_char {
    match CString::new(json) {
        Ok(cstring) => cstring.into_raw(),
        Err(e) => {
            let mut bytes = e.into_vec();
            bytes.retain(|&b| b != 0);
            CString::new(bytes).unwrap_or_default().into_raw()
        }
    }
}
