// src/lib.rs
//! Structured key/value logging. Loggers build records, a collector offers
//! every record to every sink, and each sink decides through per-key filters
//! whether to format and write it.

pub mod collector;
pub mod config;
pub mod error;
pub mod filter;
pub mod formatters;
pub mod input_format;
pub mod logger;
pub mod output_format;
pub mod pair;
pub mod sink;

pub use error::*;

pub use collector::{
    collector, dispatch, dispatch_and_wait, flush_all, reset_collector, sink_to, Collector,
};
pub use config::{CollectorConfig, ErrorStrategy, FileConfig, SinkConfig};
pub use filter::{
    Filter, FilterSlot, FloatRangeFilter, IntRangeFilter, KeyFilter, RegexFilter,
    TimeRangeFilter, ValueSetFilter,
};
pub use formatters::{Formatter, JsonFormatter, LogfmtFormatter};
pub use input_format::{read_records, InputFormat, InputStats};
pub use logger::{Level, Logger};
pub use output_format::OutputFormat;
pub use pair::{Field, IntoValue, Pair, Record, TypedValue, Value, ValueType, MESSAGE_KEY};
pub use sink::{Destination, FlushStatus, Sink, SinkRules, SinkState, SinkStats};
