//! Downstream consumers of accepted frames.
//!
//! Delivery is best effort: every enabled sink sees every accepted frame,
//! whatever happened to the previous push, and nothing is retried.

mod database;
mod mqtt;

pub use database::DatabaseSink;
pub use mqtt::MqttSink;

use crate::aggregate::Averages;
use crate::error::{AppError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

/// Derived values a sink may forward along with the frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkContext {
    pub averages: Averages,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounters {
    pub pushed: u64,
    pub errors: u64,
    pub dropped: u64,
}

#[async_trait]
pub trait Sink: Send {
    fn name(&self) -> &'static str;

    /// Apply one configuration key. Returns false when the key or value is
    /// not understood.
    fn configure(&mut self, key: &str, value: &str) -> bool;

    async fn init(&mut self) -> Result<()>;

    async fn push(&mut self, frame: &Frame, ctx: &SinkContext) -> Result<()>;

    async fn fini(&mut self);

    fn counters(&self) -> SinkCounters;
}

/// Lets a sink act at most once per period. The first call always passes.
#[derive(Debug, Clone)]
pub struct RateLimit {
    period: Duration,
    last: Option<DateTime<Utc>>,
}

impl RateLimit {
    pub fn new(secs: i64) -> Self {
        Self {
            period: Duration::seconds(secs),
            last: None,
        }
    }

    pub fn set_period(&mut self, secs: i64) {
        self.period = Duration::seconds(secs);
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn allow(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last {
            if now - last < self.period {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

struct Entry {
    enabled: bool,
    sink: Box<dyn Sink>,
}

/// Registered sinks, addressed by name.
#[derive(Default)]
pub struct SinkSet {
    entries: Vec<Entry>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database and MQTT sinks, both disabled until configured.
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.register(Box::new(DatabaseSink::default()));
        set.register(Box::new(MqttSink::default()));
        set
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.entries.push(Entry {
            enabled: false,
            sink,
        });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.sink.name() == name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.enabled && e.sink.name() == name)
    }

    /// Route `key = value` to the sink called `name`. The `enable` key is
    /// handled here.
    pub fn configure(&mut self, name: &str, key: &str, value: &str) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.sink.name() == name)
            .ok_or_else(|| AppError::Config(format!("unknown sink: {}", name)))?;

        if key == "enable" {
            entry.enabled = parse_flag(value)
                .ok_or_else(|| AppError::Config(format!("{}/enable: bad flag '{}'", name, value)))?;
            return Ok(());
        }
        if !entry.sink.configure(key, value) {
            return Err(AppError::Config(format!(
                "unknown config name {}/{} (value '{}')",
                name, key, value
            )));
        }
        Ok(())
    }

    /// Initialise every enabled sink. All are attempted; any failure fails
    /// the whole.
    pub async fn init_all(&mut self) -> Result<()> {
        let mut failed = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            match entry.sink.init().await {
                Ok(()) => info!(sink = entry.sink.name(), "sink initialised"),
                Err(e) => {
                    error!(sink = entry.sink.name(), error = %e, "sink initialisation failed");
                    failed.push(entry.sink.name());
                }
            }
        }
        into_result(failed)
    }

    /// Push to every enabled sink regardless of earlier failures.
    pub async fn push_all(&mut self, frame: &Frame, ctx: &SinkContext) -> Result<()> {
        let mut failed = Vec::new();
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            if let Err(e) = entry.sink.push(frame, ctx).await {
                warn!(sink = entry.sink.name(), frame = frame.seq(), error = %e, "push failed");
                failed.push(entry.sink.name());
            }
        }
        into_result(failed)
    }

    pub async fn fini_all(&mut self) {
        for entry in self.entries.iter_mut().filter(|e| e.enabled) {
            entry.sink.fini().await;
        }
    }

    /// `(name, enabled, counters)` for every registered sink.
    pub fn counters(&self) -> Vec<(&'static str, bool, SinkCounters)> {
        self.entries
            .iter()
            .map(|e| (e.sink.name(), e.enabled, e.sink.counters()))
            .collect()
    }
}

fn into_result(failed: Vec<&'static str>) -> Result<()> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(AppError::Sink(failed.join(", ")))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Some(true),
        "false" | "no" | "off" => Some(false),
        other => other.parse::<i64>().ok().map(|n| n != 0),
    }
}

/// Numeric configuration value, surrounding blanks ignored.
pub(crate) fn parse_number<T: std::str::FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
