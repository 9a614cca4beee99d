pub mod aggregate;
pub mod config;
pub mod control;
pub mod daemon;
pub mod demux;
pub mod error;
pub mod frame;
pub mod logging;
pub mod schema;
pub mod serial;
pub mod sink;
pub mod stats;

// Re-export commonly used items
pub use aggregate::{Aggregator, Averages, EnergyReport};
pub use config::Config;
pub use daemon::{Daemon, Station};
pub use demux::Demultiplexer;
pub use error::{AggregateError, AppError, FrameError, Result, SchemaError};
pub use frame::{Decoder, Frame, InformationGroup};
pub use schema::{FieldId, FieldMask, Schema};
pub use sink::{Sink, SinkContext, SinkSet};
pub use stats::Stats;
