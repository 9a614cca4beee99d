use crate::error::{AppError, Result};
use crate::schema::Schema;
use crate::sink::SinkSet;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.example.yaml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub control: ControlConfig,
    /// Expected value per label, checked on every decoded group.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// `sink name -> key -> value`, handed to the sink as is.
    #[serde(default)]
    pub sinks: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// syslog-style priority name
    #[serde(default = "default_priority")]
    pub priority: String,
    pub logfile: Option<PathBuf>,
}

fn default_priority() -> String {
    "notice".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            logfile: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Append every raw chunk read to this file.
    pub lograw: Option<PathBuf>,
    /// Read the meter stream from standard input instead of `port`.
    #[serde(default)]
    pub stdin: bool,
}

fn default_serial_port() -> PathBuf {
    PathBuf::from("/dev/ttyAMA0")
}

fn default_timeout_secs() -> u64 {
    3
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            timeout_secs: default_timeout_secs(),
            lograw: None,
            stdin: false,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_control_port() -> u16 {
    54345
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: default_control_port(),
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Path from `APP_CONFIG`, or the example shipped with the repo.
    pub fn path_from_env() -> PathBuf {
        env::var("APP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, parse,
    /// then apply the SERIAL_PORT, DATABASE_URL and MQTT_HOST overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        let mut cfg: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };

        if let Ok(port) = env::var("SERIAL_PORT") {
            cfg.serial.port = PathBuf::from(port);
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            cfg.set_sink_key("database", "url", url);
        }
        if let Ok(host) = env::var("MQTT_HOST") {
            cfg.set_sink_key("mqtt", "host", host);
        }

        if cfg.serial.timeout_secs == 0 {
            return Err(AppError::Config("serial.timeout_secs must be positive".into()));
        }
        Ok(cfg)
    }

    fn set_sink_key(&mut self, sink: &str, key: &str, value: String) {
        self.sinks
            .entry(sink.to_string())
            .or_default()
            .insert(key.to_string(), Value::String(value));
    }

    /// Field schema with the configured expected values.
    pub fn schema(&self) -> Result<Schema> {
        let mut schema = Schema::new();
        for (label, value) in &self.fields {
            let value = scalar(value).ok_or_else(|| {
                AppError::Config(format!("fields/{}: value must be a scalar", label))
            })?;
            schema.set_default(label, &value)?;
        }
        Ok(schema)
    }

    /// The default sinks with every configured key applied.
    pub fn sinks(&self) -> Result<SinkSet> {
        let mut set = SinkSet::with_defaults();
        for (name, keys) in &self.sinks {
            for (key, value) in keys {
                let value = scalar(value).ok_or_else(|| {
                    AppError::Config(format!("sinks/{}/{}: value must be a scalar", name, key))
                })?;
                set.configure(name, key, &value)?;
            }
        }
        Ok(set)
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$".
fn expand_env_placeholders(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let end = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, end).ok_or_else(|| {
            AppError::Config(format!("unterminated env placeholder: missing '{}'", end))
        })?;
        let val = env::var(&var)
            .map_err(|_| AppError::Config(format!("missing environment variable: {}", var)))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until we hit `end`, consuming it.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
