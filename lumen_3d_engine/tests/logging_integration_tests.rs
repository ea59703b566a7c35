//! Integration tests for the engine logging front
//!
//! No GPU required. The logger is process-wide, hence `#[serial]`.
//!
//! Run with: cargo test --test logging_integration_tests

use lumen_3d_engine::lumen3d::log::{LogEntry, LogSeverity, Logger};
use lumen_3d_engine::lumen3d::{Engine, Error};
use lumen_3d_engine::{engine_bail, engine_err, engine_error, engine_info};
use serial_test::serial;
use std::sync::{Arc, Mutex};

// ============================================================================
// TEST LOGGER IMPLEMENTATION
// ============================================================================

/// Test logger that captures log entries for verification
struct TestLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl TestLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for TestLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn failing_call() -> lumen_3d_engine::lumen3d::Result<u32> {
    engine_bail!("test::bail", "fence wait failed on slot {}", 2);
}

// ============================================================================
// LOGGING TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_custom_logger() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    Engine::log(LogSeverity::Info, "test::module", "Test info message".to_string());
    Engine::log(LogSeverity::Warn, "test::module", "Test warning message".to_string());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].severity, LogSeverity::Info);
        assert_eq!(captured[0].message, "Test info message");
        assert_eq!(captured[1].severity, LogSeverity::Warn);
        assert!(!captured[1].thread.is_empty());
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_macros_record_location_for_errors() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    engine_info!("test::macros", "slot {} ready", 1);
    engine_error!("test::macros", "device lost");

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0].message, "slot 1 ready");
        assert_eq!(captured[0].file, None);
        assert_eq!(captured[1].severity, LogSeverity::Error);
        assert!(captured[1].file.unwrap().ends_with("logging_integration_tests.rs"));
        assert!(captured[1].line.is_some());
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_engine_err_logs_and_builds_error() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);

    let err = engine_err!("test::err", "vkCreateBuffer failed: {}", "ERROR_OUT_OF_DEVICE_MEMORY");
    assert_eq!(err, Error::BackendError("vkCreateBuffer failed: ERROR_OUT_OF_DEVICE_MEMORY".to_string()));
    assert_eq!(
        failing_call(),
        Err(Error::BackendError("fence wait failed on slot 2".to_string()))
    );

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert!(captured.iter().all(|e| e.severity == LogSeverity::Error));
        assert_eq!(captured[1].source, "test::bail");
    }

    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_min_severity_filters_entries() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);
    Engine::set_min_severity(LogSeverity::Warn);

    assert!(!Engine::is_enabled(LogSeverity::Info));
    Engine::log(LogSeverity::Debug, "test::filter", "dropped".to_string());
    Engine::log(LogSeverity::Error, "test::filter", "kept".to_string());

    {
        let captured = entries.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].message, "kept");
    }

    Engine::set_min_severity(LogSeverity::Trace);
    Engine::reset_logger();
}

#[test]
#[serial]
fn test_integration_logger_reset() {
    let (test_logger, entries) = TestLogger::new();
    Engine::set_logger(test_logger);
    Engine::log(LogSeverity::Info, "test::reset", "before".to_string());
    Engine::reset_logger();
    Engine::log(LogSeverity::Info, "test::reset", "after".to_string());

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "before");
}
