use crate::schema::FieldId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("DB error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("Sink error: {0}")]
    Sink(String),
    #[error("Control error: {0}")]
    Control(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Everything that can make a candidate frame go away.
///
/// Decode-time variants reject the whole frame; stream-time variants abort the
/// buffer being filled. None of them is fatal to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame buffer is not delimited by LF ... CR")]
    MalformedBuffer,
    #[error("information group has an invalid checksum: expected {expected:#04x}, got {found:#04x}")]
    InvalidChecksum { expected: u8, found: u8 },
    #[error("information group has an invalid format: '{0}'")]
    MalformedGroup(String),
    #[error("unknown information label: '{0}'")]
    UnknownField(String),
    #[error("information {field} has an invalid value: '{value}'")]
    InvalidValue { field: FieldId, value: String },
    #[error("incomplete frame, presence bitmap {found:#010x} misses {missing:#010x}")]
    IncompleteFrame { found: u32, missing: u32 },
    #[error("max buffer length {0} reached, dropping frame")]
    BufferOverflow(usize),
    #[error("frame interrupted by EOT, dropping frame")]
    FrameInterrupted,
    #[error("duplicate frame")]
    DuplicateFrame,
}

impl FrameError {
    pub fn is_checksum(&self) -> bool {
        matches!(self, FrameError::InvalidChecksum { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown info label: '{0}'")]
    UnknownField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("no power average over a {0} seconds window")]
    UnknownWindow(i64),
}
