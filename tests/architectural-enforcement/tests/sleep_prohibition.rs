//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Library code MUST NOT sleep. Publishing never waits, and
//! consumers wait on their queue or their client, never on a timer.
//! **Exceptions**: Binaries (the demo paces a simulated upstream), test code.

use architectural_enforcement::{report, scan, LIBRARY_DIRS, PRODUCTION_DIRS};

#[test]
fn test_no_thread_sleep_anywhere() {
    let violations = scan(PRODUCTION_DIRS, true, |code| {
        (code.contains("thread::sleep") || code.contains("std::thread::park"))
            .then_some("Blocking sleep")
    });

    report(
        "CRITICAL: Blocking sleep found in production code!",
        &violations,
        &[
            "❌ FORBIDDEN: std::thread::sleep, std::thread::park",
            "✅ Wait on a channel, a oneshot, or tokio::time::interval() instead",
        ],
    );
}

#[test]
fn test_no_timer_sleep_in_library() {
    let violations = scan(LIBRARY_DIRS, false, |code| {
        (code.contains("time::sleep") || code.contains("sleep_until")).then_some("Timer sleep")
    });

    report(
        "Sleep found in library code!",
        &violations,
        &[
            "❌ FORBIDDEN: sleeping as synchronization or polling",
            "✅ Await the event itself (subscription recv, disconnect future)",
        ],
    );
}
