//! Unit tests for log.rs
//!
//! Tests LogSeverity, LogEntry, DefaultLogger formatting and the engine_* macros.

use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::engine::Engine;
use crate::error::{Error, Result};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Captures entries whose source matches, other tests may log concurrently
struct CaptureLogger {
    source: &'static str,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        if entry.source == self.source {
            self.entries.lock().unwrap().push(entry.clone());
        }
    }
}

fn capture(source: &'static str) -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(CaptureLogger { source, entries: entries.clone() });
    entries
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_debug() {
    assert_eq!(format!("{:?}", LogSeverity::Trace), "Trace");
    assert_eq!(format!("{:?}", LogSeverity::Error), "Error");
}

// ============================================================================
// LOG ENTRY TESTS
// ============================================================================

#[test]
fn test_log_entry_now_records_thread() {
    let handle = std::thread::Builder::new()
        .name("streaming-worker".to_string())
        .spawn(|| LogEntry::now(LogSeverity::Info, "lumen3d::Test", "hello".to_string()))
        .unwrap();
    let entry = handle.join().unwrap();

    assert_eq!(entry.thread, "streaming-worker");
    assert_eq!(entry.source, "lumen3d::Test");
    assert_eq!(entry.message, "hello");
    assert!(entry.file.is_none());
    assert!(entry.line.is_none());
}

#[test]
fn test_log_entry_with_location() {
    let entry = LogEntry::now(LogSeverity::Error, "lumen3d::Test", "boom".to_string())
        .with_location("renderer.rs", 42);
    assert_eq!(entry.file, Some("renderer.rs"));
    assert_eq!(entry.line, Some(42));
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_format_plain_without_location() {
    let entry = LogEntry {
        severity: LogSeverity::Warn,
        timestamp: SystemTime::now(),
        thread: "main".to_string(),
        source: "lumen3d::Renderer".to_string(),
        message: "slow frame".to_string(),
        file: None,
        line: None,
    };
    let line = DefaultLogger::format_plain(&entry);
    assert!(line.contains("[WARN ] [main] [lumen3d::Renderer] slow frame"));
    assert!(!line.ends_with(')'));
}

#[test]
fn test_format_plain_with_location() {
    let entry = LogEntry::now(LogSeverity::Error, "lumen3d::vulkan", "lost".to_string())
        .with_location("vulkan.rs", 7);
    let line = DefaultLogger::format_plain(&entry);
    assert!(line.contains("[ERROR]"));
    assert!(line.ends_with("lost (vulkan.rs:7)"));
}

#[test]
fn test_default_logger_does_not_panic() {
    let entry = LogEntry::now(LogSeverity::Debug, "lumen3d::Test", "console".to_string());
    DefaultLogger.log(&entry);
}

// ============================================================================
// MACRO TESTS
// ============================================================================

#[test]
#[serial]
fn test_engine_error_macro_has_location() {
    let entries = capture("lumen3d::MacroTest");
    crate::engine_error!("lumen3d::MacroTest", "pool {} failed", 3);
    Engine::reset_logger();

    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].severity, LogSeverity::Error);
    assert_eq!(entries[0].message, "pool 3 failed");
    assert!(entries[0].file.is_some());
    assert!(entries[0].line.is_some());
}

#[test]
#[serial]
fn test_engine_err_and_bail_macros() {
    fn failing() -> Result<()> {
        crate::engine_bail!("lumen3d::BailTest", "fence wait failed on slot {}", 1);
    }

    let entries = capture("lumen3d::BailTest");
    let err = failing().unwrap_err();
    let built = crate::engine_err!("lumen3d::BailTest", "second");
    Engine::reset_logger();

    assert_eq!(err, Error::BackendError("fence wait failed on slot 1".to_string()));
    assert_eq!(built, Error::BackendError("second".to_string()));
    assert_eq!(entries.lock().unwrap().len(), 2);
}

#[test]
#[serial]
fn test_min_severity_filters_entries() {
    let entries = capture("lumen3d::FilterTest");
    Engine::set_min_severity(LogSeverity::Warn);
    crate::engine_info!("lumen3d::FilterTest", "dropped");
    crate::engine_warn!("lumen3d::FilterTest", "kept");
    Engine::reset_logger();

    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "kept");
    assert!(Engine::is_enabled(LogSeverity::Trace));
}
