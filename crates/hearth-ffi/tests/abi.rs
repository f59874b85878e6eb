//! Full ABI round-trip through the extern "C" surface.
//!
//! The ABI owns one process-wide server slot, so the whole contract is
//! exercised as a single sequential test rather than parallel test functions
//! fighting over `init`/`deinit`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use hearth_ffi::{deinit, get_completion, hearth_string_free, init, json_rpc};

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

/// Take ownership of a returned pointer, parse it, and free it exactly once.
fn consume(ptr: *mut c_char) -> serde_json::Value {
    assert!(!ptr.is_null(), "the ABI never returns null");
    let json = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .expect("returned strings are valid UTF-8")
        .to_string();
    unsafe { hearth_string_free(ptr) };
    serde_json::from_str(&json).expect("returned strings are well-formed JSON")
}

#[test]
fn test_abi_contract_end_to_end() {
    // Calls before init fail deterministically.
    let before = consume(get_completion(c(r#"{"prompt":"hi"}"#).as_ptr()));
    assert_eq!(before["error_kind"], "not_initialized");
    let before = consume(json_rpc(
        c("GET").as_ptr(),
        c("/health").as_ptr(),
        c("").as_ptr(),
        c("").as_ptr(),
    ));
    assert_eq!(before["error_kind"], "not_initialized");

    // Bad command string: non-zero status, server stays uninitialized.
    assert_eq!(init(c("model=test nonsense=1").as_ptr()), 1);
    // An unreadable (non-UTF-8) command string classifies the same way.
    let garbled = CString::new(vec![0x6d, 0xff, 0xfe]).unwrap();
    assert_eq!(init(garbled.as_ptr()), 1);
    let still = consume(get_completion(c(r#"{"prompt":"hi"}"#).as_ptr()));
    assert_eq!(still["error_kind"], "not_initialized");

    // Successful init; a second init is classified, never a silent rebuild.
    assert_eq!(init(c("model=test max_concurrency=2").as_ptr()), 0);
    assert_eq!(init(c("model=test").as_ptr()), 2);

    // Generic dispatch.
    let health = consume(json_rpc(
        c("GET").as_ptr(),
        c("/health").as_ptr(),
        c("X-Caller: abi-test").as_ptr(),
        c("").as_ptr(),
    ));
    assert_eq!(health["status"], "success");
    assert_eq!(health["payload"]["model"], "test");

    let not_found = consume(json_rpc(
        c("GET").as_ptr(),
        c("/missing").as_ptr(),
        c("").as_ptr(),
        c("").as_ptr(),
    ));
    assert_eq!(not_found["error_kind"], "not_found");

    let wrong_method = consume(json_rpc(
        c("DELETE").as_ptr(),
        c("/health").as_ptr(),
        c("").as_ptr(),
        c("").as_ptr(),
    ));
    assert_eq!(wrong_method["error_kind"], "method_not_allowed");

    // Completion fast path: success and validation error.
    let done = consume(get_completion(c(r#"{"prompt":"echo chamber"}"#).as_ptr()));
    assert_eq!(done["status"], "success");
    assert_eq!(done["payload"]["text"], "echo chamber");

    let invalid = consume(get_completion(c(r#"{"prompt":""}"#).as_ptr()));
    assert_eq!(invalid["error_kind"], "invalid_request");

    // Null pointers are read as empty and rejected by validation.
    let null_call = consume(json_rpc(
        std::ptr::null(),
        std::ptr::null(),
        std::ptr::null(),
        std::ptr::null(),
    ));
    assert_eq!(null_call["error_kind"], "invalid_request");

    // Async job through the route surface.
    let accepted = consume(json_rpc(
        c("POST").as_ptr(),
        c("/jobs").as_ptr(),
        c("").as_ptr(),
        c(r#"{"prompt":"one two three"}"#).as_ptr(),
    ));
    assert_eq!(accepted["payload"]["accepted"], true);
    let job_id = accepted["payload"]["job_id"].as_str().unwrap().to_string();

    let result = loop {
        let poll = consume(json_rpc(
            c("GET").as_ptr(),
            c(&format!("/jobs/{}", job_id)).as_ptr(),
            c("").as_ptr(),
            c("").as_ptr(),
        ));
        assert_eq!(poll["status"], "success");
        if poll["payload"]["state"] == "completed" {
            break poll;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    };
    assert_eq!(result["payload"]["text"], "one two three");

    // Teardown; everything afterwards is not_initialized, and deinit is
    // safely repeatable.
    deinit();
    deinit();
    let after = consume(get_completion(c(r#"{"prompt":"hi"}"#).as_ptr()));
    assert_eq!(after["error_kind"], "not_initialized");

    // The slot is reusable after a full teardown.
    assert_eq!(init(c("model=second").as_ptr()), 0);
    let health = consume(json_rpc(
        c("GET").as_ptr(),
        c("/health").as_ptr(),
        c("").as_ptr(),
        c("").as_ptr(),
    ));
    assert_eq!(health["payload"]["model"], "second");
    deinit();
}
