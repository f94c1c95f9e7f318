use crate::collector::{self, Collector};
use crate::pair::{Field, IntoValue, Record, TypedValue, ValueType, MESSAGE_KEY};
use crate::sink::FlushStatus;
use chrono::Local;
use indexmap::IndexMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

pub const LEVEL_KEY: &str = "level";
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Severity names used by the level helpers. Levels are ordinary pairs:
/// sinks select them with value filters like any other key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Crit,
    Fatal,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warning",
            Level::Error => "error",
            Level::Crit => "critical",
            Level::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds records and hands them to a collector.
///
/// A logger carries a context, pairs repeated in every record it emits, and
/// the pairs added for the record being built. Context keys are unique and
/// keep their first position; pending pairs may repeat keys. Emitting a
/// record clears the pending pairs and leaves the context alone.
///
/// Loggers are not shared between threads; clone one to fork it with a
/// copy of its context.
#[derive(Clone)]
pub struct Logger {
    collector: Arc<Collector>,
    context: IndexMap<String, Field>,
    pending: Vec<Field>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Logger feeding the process-wide collector.
    pub fn new() -> Self {
        Self::with_collector(collector::collector())
    }

    pub fn with_collector(collector: Arc<Collector>) -> Self {
        Self {
            collector,
            context: IndexMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Sets a context pair. An existing key keeps its position and gets the new value.
    pub fn with(&mut self, key: impl Into<String>, value: impl IntoValue) -> &mut Self {
        let key = key.into();
        let field = Field::new(key.clone(), value);
        self.context.insert(key, field);
        self
    }

    /// Context key without a value.
    pub fn with_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.with(key, TypedValue::void())
    }

    pub fn without<I, S>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.context.shift_remove(key.as_ref());
        }
        self
    }

    pub fn reset_context(&mut self) -> &mut Self {
        self.context.clear();
        self
    }

    pub fn context_keys(&self) -> impl Iterator<Item = &str> {
        self.context.keys().map(String::as_str)
    }

    pub fn context_value(&self, key: &str) -> Option<&Field> {
        self.context.get(key)
    }

    /// Adds a pair to the record being built.
    pub fn add(&mut self, key: impl Into<String>, value: impl IntoValue) -> &mut Self {
        self.pending.push(Field::new(key, value));
        self
    }

    /// Drops the pairs added since the last emitted record.
    pub fn reset(&mut self) -> &mut Self {
        self.pending.clear();
        self
    }

    /// Adds a `timestamp` context pair rendered with the strftime `layout`
    /// each time a record is emitted.
    pub fn with_timestamp(&mut self, layout: impl Into<String>) -> &mut Self {
        let layout = layout.into();
        let stamp = TypedValue::deferred(ValueType::String, move || {
            let now = Local::now();
            let mut out = String::new();
            if write!(out, "{}", now.format(&layout)).is_err() {
                // Unusable layout: fall back to RFC 3339 rather than failing the record.
                out = now.to_rfc3339();
            }
            out
        });
        self.with(TIMESTAMP_KEY, stamp)
    }

    /// The record that would be emitted now, with deferred values evaluated.
    pub fn current_record(&self) -> Record {
        let mut record = Record::with_capacity(self.context.len() + self.pending.len());
        for field in self.context.values().chain(&self.pending) {
            record.push(field.resolve());
        }
        record
    }

    fn take_record(&mut self) -> Record {
        let record = self.current_record();
        self.pending.clear();
        record
    }

    /// Emits context and pending pairs as one record.
    pub fn log(&mut self) {
        let record = self.take_record();
        self.collector.dispatch(record);
    }

    /// Like [`log`](Self::log), then waits until every sink that accepted
    /// the record into its queue has handled it.
    pub fn log_and_wait(&mut self) -> FlushStatus {
        let record = self.take_record();
        self.collector.dispatch_and_wait(record)
    }

    /// Emits the record with `level` and `message` pairs appended.
    pub fn log_level(&mut self, level: Level, message: impl Into<String>) {
        self.add(LEVEL_KEY, level.as_str())
            .add(MESSAGE_KEY, message.into())
            .log();
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log_level(Level::Debug, message)
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log_level(Level::Info, message)
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log_level(Level::Warn, message)
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log_level(Level::Error, message)
    }

    pub fn crit(&mut self, message: impl Into<String>) {
        self.log_level(Level::Crit, message)
    }

    /// Logs at `fatal`. The process keeps running.
    pub fn fatal(&mut self, message: impl Into<String>) {
        self.log_level(Level::Fatal, message)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("context", &self.context.keys().collect::<Vec<_>>())
            .field("pending", &self.pending.len())
            .finish()
    }
}
