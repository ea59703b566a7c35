/// Vulkan debug messenger - validation layer messages routed to the engine logger
///
/// Messages are filtered by severity and category, counted, tagged with a
/// repeat indicator and logged under `lumen3d::vulkan::validation`. With
/// `DebugOutput::LoggerAndFile` they are also appended to a plain-text file.

use ash::vk;
use colored::*;
use lumen_3d_engine::lumen3d::render::{
    lock, DebugMessageFilter, DebugOutput, DebugSeverity, ValidationStats,
};
use lumen_3d_engine::{engine_debug, engine_error, engine_info, engine_warn};
use rustc_hash::FxHashMap;
use std::ffi::CStr;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

const SOURCE: &str = "lumen3d::vulkan::validation";

/// Callback configuration, set when the messenger is created
static DEBUG_CONFIG: Mutex<Option<Config>> = Mutex::new(None);

static VALIDATION_STATS: ValidationStatsTracker = ValidationStatsTracker::new();

/// Occurrences per message text
static MESSAGE_TRACKER: Mutex<Option<FxHashMap<String, u32>>> = Mutex::new(None);

#[derive(Debug, Clone)]
pub struct Config {
    pub severity: DebugSeverity,
    pub output: DebugOutput,
    pub message_filter: DebugMessageFilter,
    pub panic_on_error: bool,
    pub enable_stats: bool,
}

struct ValidationStatsTracker {
    errors: AtomicU32,
    warnings: AtomicU32,
    info: AtomicU32,
    verbose: AtomicU32,
}

impl ValidationStatsTracker {
    const fn new() -> Self {
        Self {
            errors: AtomicU32::new(0),
            warnings: AtomicU32::new(0),
            info: AtomicU32::new(0),
            verbose: AtomicU32::new(0),
        }
    }

    fn counter(&self, severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> &AtomicU32 {
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            &self.errors
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            &self.warnings
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            &self.info
        } else {
            &self.verbose
        }
    }

    fn get_stats(&self) -> ValidationStats {
        ValidationStats {
            errors: self.errors.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            info: self.info.load(Ordering::Relaxed),
            verbose: self.verbose.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.errors.store(0, Ordering::Relaxed);
        self.warnings.store(0, Ordering::Relaxed);
        self.info.store(0, Ordering::Relaxed);
        self.verbose.store(0, Ordering::Relaxed);
    }
}

/// Install the callback configuration and reset the counters
pub fn init_debug_config(config: Config) {
    VALIDATION_STATS.reset();
    *lock(&MESSAGE_TRACKER) = Some(FxHashMap::default());
    *lock(&DEBUG_CONFIG) = Some(config);
}

/// Forget the configuration; later callbacks are ignored
pub fn cleanup_debug_config() {
    *lock(&DEBUG_CONFIG) = None;
    *lock(&MESSAGE_TRACKER) = None;
}

/// Validation messages counted since the last backend creation
pub fn get_validation_stats() -> ValidationStats {
    VALIDATION_STATS.get_stats()
}

/// Print a colored summary of the validation counters to stdout
pub fn print_validation_stats_report() {
    let stats = get_validation_stats();

    if stats.total() == 0 {
        println!("\n{}", "No validation messages".green().bold());
        return;
    }

    println!("\n{}", "=== Validation Statistics Report ===".bright_blue().bold());
    if stats.errors > 0 {
        println!("  {} {}", "Errors:".red().bold(), stats.errors);
    }
    if stats.warnings > 0 {
        println!("  {} {}", "Warnings:".yellow().bold(), stats.warnings);
    }
    if stats.info > 0 {
        println!("  {} {}", "Info:".cyan(), stats.info);
    }
    if stats.verbose > 0 {
        println!("  {} {}", "Verbose:".bright_black(), stats.verbose);
    }
    println!("  {} {}", "Total:".white().bold(), stats.total());

    if let Some(tracker) = lock(&MESSAGE_TRACKER).as_ref() {
        let repeated = tracker.values().filter(|&&count| count > 1).count();
        if repeated > 0 {
            println!("\n  {} message(s) appeared multiple times", repeated);
        }
    }
    println!("{}\n", "====================================".bright_blue().bold());
}

/// Severities the messenger is created with
pub(crate) fn severity_flags(severity: DebugSeverity) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    match severity {
        DebugSeverity::ErrorsOnly => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        DebugSeverity::ErrorsAndWarnings => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        }
        DebugSeverity::All => {
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        }
    }
}

fn category_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    }
}

fn category_shown(filter: &DebugMessageFilter, message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> bool {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        filter.show_validation
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        filter.show_performance
    } else {
        filter.show_general
    }
}

unsafe fn c_str_or<'a>(ptr: *const std::os::raw::c_char, fallback: &'a str) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        std::borrow::Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

/// Debug messenger callback installed when validation is enabled
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let Some(config) = lock(&DEBUG_CONFIG).clone() else {
        return vk::FALSE;
    };
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = &*p_callback_data;

    if !severity_flags(config.severity).intersects(message_severity)
        || !category_shown(&config.message_filter, message_type)
    {
        return vk::FALSE;
    }

    let message_id_name = c_str_or(callback_data.p_message_id_name, "Unknown");
    let message = c_str_or(callback_data.p_message, "No message");
    let category = category_name(message_type);

    let occurrences = if config.enable_stats {
        VALIDATION_STATS.counter(message_severity).fetch_add(1, Ordering::Relaxed);
        let mut tracker = lock(&MESSAGE_TRACKER);
        let count = tracker
            .get_or_insert_with(FxHashMap::default)
            .entry(message.to_string())
            .or_insert(0);
        *count += 1;
        *count
    } else {
        1
    };
    let repeat = if occurrences > 1 {
        format!(" [x{}]", occurrences)
    } else {
        String::new()
    };

    let text = format!("[{}]{} {}: {}", category, repeat, message_id_name, message);
    let is_error = message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
    if is_error {
        engine_error!(SOURCE, "{}", text);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        engine_warn!(SOURCE, "{}", text);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        engine_info!(SOURCE, "{}", text);
    } else {
        engine_debug!(SOURCE, "{}", text);
    }

    if let DebugOutput::LoggerAndFile(path) = &config.output {
        write_to_file(path, &format!("[VULKAN {:?}] {}", message_severity, text));
    }

    if config.panic_on_error && is_error {
        panic!(
            "Vulkan validation error (panic_on_validation_error)\nMessage ID: {}\nType: {}\nMessage: {}",
            message_id_name, category, message
        );
    }

    vk::FALSE
}

fn write_to_file(path: &str, message: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_flags_widen_with_level() {
        let errors = severity_flags(DebugSeverity::ErrorsOnly);
        let warnings = severity_flags(DebugSeverity::ErrorsAndWarnings);
        let all = severity_flags(DebugSeverity::All);

        assert_eq!(errors, vk::DebugUtilsMessageSeverityFlagsEXT::ERROR);
        assert!(warnings.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING));
        assert!(!warnings.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(all.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
    }

    #[test]
    fn test_category_filter() {
        let filter = DebugMessageFilter {
            show_general: true,
            show_validation: false,
            show_performance: true,
        };

        assert!(!category_shown(&filter, vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION));
        assert!(category_shown(&filter, vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE));
        assert!(category_shown(&filter, vk::DebugUtilsMessageTypeFlagsEXT::GENERAL));
        assert_eq!(category_name(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE), "Performance");
    }

    #[test]
    fn test_stats_counter_by_severity() {
        let tracker = ValidationStatsTracker::new();
        tracker.counter(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR).fetch_add(1, Ordering::Relaxed);
        tracker.counter(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING).fetch_add(2, Ordering::Relaxed);
        tracker.counter(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE).fetch_add(1, Ordering::Relaxed);

        let stats = tracker.get_stats();
        assert_eq!((stats.errors, stats.warnings, stats.info, stats.verbose), (1, 2, 0, 1));
        assert_eq!(stats.total(), 4);

        tracker.reset();
        assert_eq!(tracker.get_stats().total(), 0);
    }
}
