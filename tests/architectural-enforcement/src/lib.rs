//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the production code of the workspace:
//! - No blocking sleeps (publish and relay paths must never park a thread)
//! - No process-global registries (registries are constructed and injected)
//! - No `unwrap()`/`expect()` in library code (errors are propagated)
//!
//! The helpers here walk the source tree and hand each production line to a
//! check. Everything from the first `#[cfg(test)]` in a file onward is
//! treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["opstream/core/src"];

/// Library-only source directories (binaries excluded)
pub const LIBRARY_DIRS: &[&str] = &["opstream/core/src"];

/// Workspace root, resolved from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// All `.rs` files under `dir`
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect()
}

/// Whether a file belongs to a binary target
pub fn is_binary(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == "bin") || path.ends_with("main.rs")
}

/// Numbered code lines of a file, with comments and test modules removed
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        let code = line.split("//").next().unwrap_or(line);
        if !code.trim().is_empty() {
            lines.push((idx + 1, code));
        }
    }
    lines
}

/// Run `check` over every production line under `dirs`
///
/// `check` returns a description of the violation, if any. Returns one
/// formatted entry per violation.
pub fn scan<F>(dirs: &[&str], include_binaries: bool, check: F) -> Vec<String>
where
    F: Fn(&str) -> Option<&'static str>,
{
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in dirs {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for file in rust_files(&path) {
            if !include_binaries && is_binary(&file) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&file) else {
                continue;
            };
            for (number, code) in production_lines(&content) {
                if let Some(what) = check(code) {
                    violations.push(format!(
                        "{}:{} - {}: {}",
                        file.display(),
                        number,
                        what,
                        code.trim()
                    ));
                }
            }
        }
    }

    violations
}

/// Print violations and fail the test if there are any
pub fn report(title: &str, violations: &[String], help: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in help {
        eprintln!("  {line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// comment\nlet x = 1; // trailing\n#[cfg(test)]\nfn t() {}\n";
        let lines = production_lines(source);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], (1, "fn a() {}"));
        assert_eq!(lines[1].0, 3);
        assert_eq!(lines[1].1.trim(), "let x = 1;");
    }

    #[test]
    fn test_binary_detection() {
        assert!(is_binary(Path::new("opstream/core/src/bin/opstream-demo.rs")));
        assert!(!is_binary(Path::new("opstream/core/src/streamer.rs")));
    }

    #[test]
    fn test_workspace_has_production_code() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(
                !rust_files(&root.join(dir)).is_empty(),
                "no sources found under {dir}"
            );
        }
    }
}
