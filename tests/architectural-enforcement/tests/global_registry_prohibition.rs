//! Integration Test: Global Registry Prohibition
//!
//! **Policy**: Stream registries are explicit values, constructed per
//! resource kind and handed to whatever needs them. Production code MUST NOT
//! keep shared tables in process-global state.
//! **Allowed**: `static` atomics (identifier counters), constants.

use architectural_enforcement::{report, scan, PRODUCTION_DIRS};

const GLOBAL_STATE_MARKERS: &[&str] = &[
    "Mutex", "RwLock", "OnceLock", "OnceCell", "LazyLock", "Lazy<", "HashMap", "RefCell",
];

fn global_state(code: &str) -> Option<&'static str> {
    let trimmed = code.trim_start();
    if trimmed.contains("lazy_static!") || trimmed.contains("thread_local!") {
        return Some("Global state macro");
    }

    let is_static = trimmed.starts_with("static ") || trimmed.starts_with("pub static ");
    if is_static && GLOBAL_STATE_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return Some("Process-global table");
    }
    if trimmed.starts_with("static mut ") || trimmed.starts_with("pub static mut ") {
        return Some("Mutable static");
    }
    None
}

#[test]
fn test_no_global_registries() {
    let violations = scan(PRODUCTION_DIRS, true, global_state);

    report(
        "Process-global state found in production code!",
        &violations,
        &[
            "❌ FORBIDDEN: static Mutex/RwLock/OnceLock tables, lazy_static!, static mut",
            "✅ Construct a StreamRegistry and pass clones to handlers",
        ],
    );
}

#[test]
fn test_detector_flags_global_tables() {
    assert!(global_state("static REGISTRY: Mutex<HashMap<String, u32>> = todo!();").is_some());
    assert!(global_state("    pub static STREAMS: OnceLock<Registry> = OnceLock::new();").is_some());
    assert!(global_state("lazy_static! {").is_some());
    assert!(global_state("static mut COUNT: u32 = 0;").is_some());
}

#[test]
fn test_detector_allows_counters() {
    assert!(global_state("        static COUNTER: AtomicU64 = AtomicU64::new(1);").is_none());
    assert!(global_state("pub const NOT_FOUND_CODE: u16 = 404;").is_none());
}
