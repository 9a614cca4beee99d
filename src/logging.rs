//! Process-wide tracing setup with a priority that can be changed at run
//! time from the control surface.

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// syslog priorities, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Emerg,
    Alert,
    Crit,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl Priority {
    /// Unknown names fall back to `warning`.
    pub fn from_name(name: &str) -> Priority {
        name.parse().unwrap_or(Priority::Warning)
    }

    pub fn name(self) -> &'static str {
        match self {
            Priority::Emerg => "emerg",
            Priority::Alert => "alert",
            Priority::Crit => "crit",
            Priority::Error => "error",
            Priority::Warning => "warning",
            Priority::Notice => "notice",
            Priority::Info => "info",
            Priority::Debug => "debug",
        }
    }

    /// tracing has no notice level, so notice and info both map to INFO.
    pub fn directive(self) -> &'static str {
        match self {
            Priority::Emerg | Priority::Alert | Priority::Crit | Priority::Error => "error",
            Priority::Warning => "warn",
            Priority::Notice | Priority::Info => "info",
            Priority::Debug => "debug",
        }
    }
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "emerg" | "panic" => Priority::Emerg,
            "alert" => Priority::Alert,
            "crit" => Priority::Crit,
            "err" | "error" => Priority::Error,
            "warn" | "warning" => Priority::Warning,
            "notice" => Priority::Notice,
            "info" => Priority::Info,
            "debug" => Priority::Debug,
            _ => return Err(()),
        })
    }
}

/// Current priority plus the handle that applies it to the subscriber.
pub struct LogLevel {
    priority: Priority,
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogLevel {
    /// Not bound to any subscriber; changes are only recorded.
    pub fn detached(priority: Priority) -> Self {
        Self {
            priority,
            handle: None,
        }
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Switch to the priority called `name` and return what was applied.
    pub fn set(&mut self, name: &str) -> Result<Priority> {
        let priority = Priority::from_name(name);
        if let Some(handle) = &self.handle {
            handle
                .reload(EnvFilter::new(priority.directive()))
                .map_err(|e| AppError::Control(format!("cannot change log priority: {}", e)))?;
        }
        self.priority = priority;
        Ok(priority)
    }
}

/// Install the global subscriber. `RUST_LOG`, when set, wins over the
/// configured priority until the priority is changed.
pub fn init(cfg: &LoggingConfig) -> Result<LogLevel> {
    let priority = Priority::from_name(&cfg.priority);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(priority.directive()));
    let (filter, handle) = reload::Layer::new(filter);

    let file_layer = match &cfg.logfile {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer.is_none().then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("cannot install log subscriber: {}", e)))?;

    Ok(LogLevel {
        priority,
        handle: Some(handle),
    })
}
