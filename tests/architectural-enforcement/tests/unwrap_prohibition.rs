//! Integration Test: Panic-Free Library
//!
//! **Policy**: Library code propagates errors with `?` and typed error enums.
//! `unwrap()` and `expect()` are for tests only.

use architectural_enforcement::{report, scan, LIBRARY_DIRS};

#[test]
fn test_no_unwrap_in_library_code() {
    let violations = scan(LIBRARY_DIRS, false, |code| {
        if code.contains(".unwrap()") {
            Some("unwrap()")
        } else if code.contains(".expect(") {
            Some("expect()")
        } else {
            None
        }
    });

    report(
        "Panicking calls found in library code!",
        &violations,
        &[
            "❌ FORBIDDEN: .unwrap(), .expect(..) outside tests",
            "✅ Return Result and propagate with ?",
        ],
    );
}
