/// Renderer configuration

/// Which validation messages are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugSeverity {
    ErrorsOnly,
    ErrorsAndWarnings,
    All,
}

/// Where validation messages go in addition to the engine logger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOutput {
    /// Engine logger only
    Logger,
    /// Engine logger and an appended plain-text file
    LoggerAndFile(String),
}

/// Validation message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugMessageFilter {
    pub show_general: bool,
    pub show_validation: bool,
    pub show_performance: bool,
}

impl Default for DebugMessageFilter {
    fn default() -> Self {
        Self {
            show_general: true,
            show_validation: true,
            show_performance: true,
        }
    }
}

/// Counters of validation messages seen since the backend was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub errors: u32,
    pub warnings: u32,
    pub info: u32,
    pub verbose: u32,
}

impl ValidationStats {
    pub fn total(&self) -> u32 {
        self.errors + self.warnings + self.info + self.verbose
    }
}

/// Renderer configuration, consumed by backend constructors
#[derive(Debug, Clone)]
pub struct Config {
    /// Enable validation/debug layers
    pub enable_validation: bool,
    /// Application name reported to the driver
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Wait for vertical blank when presenting
    pub vsync: bool,
    /// Initial swapchain size, used when the window reports no extent
    pub initial_extent: (u32, u32),
    pub debug_severity: DebugSeverity,
    pub debug_output: DebugOutput,
    pub debug_message_filter: DebugMessageFilter,
    /// Panic as soon as validation reports an error
    pub panic_on_validation_error: bool,
    /// Count validation messages (see [`ValidationStats`])
    pub enable_validation_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Lumen3D Application".to_string(),
            app_version: (1, 0, 0),
            vsync: true,
            initial_extent: (1280, 720),
            debug_severity: DebugSeverity::ErrorsAndWarnings,
            debug_output: DebugOutput::Logger,
            debug_message_filter: DebugMessageFilter::default(),
            panic_on_validation_error: false,
            enable_validation_stats: true,
        }
    }
}

impl Config {
    /// Builder-style helper for the common case of naming the application
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Builder-style helper toggling validation layers
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }
}
