//! Configuration data model

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub tool: ToolConfig,
    pub listen: ListenConfig,
}

/// Global settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// How the external `twm` executable is located and invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Program name or path; bare names are resolved through `$PATH`
    pub program: String,
    /// Optional upper bound for one-shot queries, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "twm".to_string(),
            timeout_ms: None,
        }
    }
}

/// What to do with bytes left over after the last newline at end of stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingLinePolicy {
    /// Treat the leftover bytes as a final record
    #[default]
    Emit,
    /// Drop the leftover bytes and surface a truncation warning
    Discard,
}

impl std::str::FromStr for TrailingLinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emit" => Ok(Self::Emit),
            "discard" => Ok(Self::Discard),
            _ => Err(format!(
                "Unknown trailing-line policy: {} (expected \"emit\" or \"discard\")",
                s
            )),
        }
    }
}

/// Settings for `twm listen` event-stream sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    /// Event names passed to `--events`; empty subscribes to everything
    pub events: Vec<String>,
    /// How long a terminated tool gets to exit before it is killed
    pub grace_period_ms: u64,
    /// Lines buffered between the reader and the dispatcher; 0 means unbounded
    pub channel_capacity: usize,
    pub trailing_line: TrailingLinePolicy,
    /// Forward the tool's stderr to the log
    pub forward_stderr: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            grace_period_ms: 2_000,
            channel_capacity: 64,
            trailing_line: TrailingLinePolicy::Emit,
            forward_stderr: true,
        }
    }
}
