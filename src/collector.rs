use crate::config::CollectorConfig;
use crate::error::SinkError;
use crate::formatters::Formatter;
use crate::pair::Record;
use crate::sink::{read_lock, write_lock, Destination, FlushStatus, Sink, SinkState};
use once_cell::sync::Lazy;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// Registry of sinks and the broadcast point for records.
///
/// Most programs use the process-wide default from [`collector()`]; tests and
/// embedders that want isolation create their own with [`Collector::new`].
pub struct Collector {
    sinks: RwLock<Vec<Sink>>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Self::with_config(CollectorConfig::default())
    }

    pub fn with_config(config: CollectorConfig) -> Arc<Self> {
        Arc::new(Self {
            sinks: RwLock::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Returns the sink writing to `destination`, creating it when no sink
    /// has that key yet. For an existing sink only the formatter is replaced;
    /// filters, hidden keys and state carry over.
    ///
    /// New sinks are stopped: call [`Sink::start`] once configured.
    pub fn sink_to<F>(
        self: &Arc<Self>,
        destination: Destination,
        formatter: F,
    ) -> Result<Sink, SinkError>
    where
        F: Formatter + 'static,
    {
        let existing = self.find(destination.key());
        if let Some(sink) = existing {
            if sink.state() != SinkState::Closed {
                sink.set_formatter(Box::new(formatter));
                return Ok(sink);
            }
        }

        let mut sinks = write_lock(&self.sinks);
        // Another thread may have registered the key in between.
        if let Some(sink) = sinks
            .iter()
            .find(|s| s.key() == destination.key() && s.state() != SinkState::Closed)
        {
            let sink = sink.clone();
            drop(sinks);
            sink.set_formatter(Box::new(formatter));
            return Ok(sink);
        }

        let sink = Sink::spawn(
            destination,
            Box::new(formatter),
            &self.config,
            Arc::downgrade(self),
        )?;
        sinks.push(sink.clone());
        Ok(sink)
    }

    pub fn find(&self, key: &str) -> Option<Sink> {
        read_lock(&self.sinks)
            .iter()
            .find(|s| s.key() == key)
            .cloned()
    }

    /// Snapshot of the registered sinks.
    pub fn sinks(&self) -> Vec<Sink> {
        read_lock(&self.sinks).clone()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.sinks).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.sinks).is_empty()
    }

    pub(crate) fn deregister(&self, sink: &Sink) {
        write_lock(&self.sinks).retain(|s| !s.same_as(sink));
    }

    /// Offers the record to every active sink. May block while a sink's queue
    /// is full, but never waits for the record to be written.
    pub fn dispatch(&self, record: Record) {
        let record = Arc::new(record);
        for sink in self.sinks() {
            let _ = sink.offer(&record);
        }
    }

    /// Offers the record and waits until every sink it was queued to has
    /// handled it, bounded by the flush timeout.
    pub fn dispatch_and_wait(&self, record: Record) -> FlushStatus {
        let record = Arc::new(record);
        let tickets: Vec<(Sink, u64)> = self
            .sinks()
            .into_iter()
            .filter_map(|sink| sink.offer(&record).map(|seq| (sink, seq)))
            .collect();

        let deadline = Instant::now() + self.config.flush_timeout;
        self.wait_all(tickets, deadline)
    }

    /// Waits until every record dispatched before the call has been handled
    /// by its sinks, bounded by one flush timeout for all of them.
    pub fn flush_all(&self) -> FlushStatus {
        let targets: Vec<(Sink, u64)> = self
            .sinks()
            .into_iter()
            .map(|sink| {
                let target = sink.enqueued();
                (sink, target)
            })
            .collect();

        let deadline = Instant::now() + self.config.flush_timeout;
        self.wait_all(targets, deadline)
    }

    fn wait_all(&self, tickets: Vec<(Sink, u64)>, deadline: Instant) -> FlushStatus {
        let mut status = FlushStatus::Completed;
        for (sink, seq) in tickets {
            if !sink.wait_until(seq, deadline) {
                tracing::warn!(
                    sink = %sink.key(),
                    timeout = ?self.config.flush_timeout,
                    "flush timed out"
                );
                status = FlushStatus::TimedOut;
            }
        }
        status
    }

    /// Closes every registered sink, draining their queues first.
    pub fn close_all(&self) {
        for sink in self.sinks() {
            sink.close();
        }
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        let sinks = std::mem::take(
            self.sinks
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for sink in sinks {
            sink.close();
        }
    }
}

static DEFAULT_COLLECTOR: Lazy<RwLock<Arc<Collector>>> =
    Lazy::new(|| RwLock::new(Collector::new()));

/// The process-wide collector.
pub fn collector() -> Arc<Collector> {
    Arc::clone(&read_lock(&DEFAULT_COLLECTOR))
}

/// Closes every sink of the process-wide collector and installs a fresh one.
pub fn reset_collector() -> Arc<Collector> {
    let fresh = Collector::new();
    let previous = std::mem::replace(&mut *write_lock(&DEFAULT_COLLECTOR), Arc::clone(&fresh));
    previous.close_all();
    fresh
}

/// [`Collector::sink_to`] on the process-wide collector.
pub fn sink_to<F>(destination: Destination, formatter: F) -> Result<Sink, SinkError>
where
    F: Formatter + 'static,
{
    collector().sink_to(destination, formatter)
}

pub fn dispatch(record: Record) {
    collector().dispatch(record)
}

pub fn dispatch_and_wait(record: Record) -> FlushStatus {
    collector().dispatch_and_wait(record)
}

pub fn flush_all() -> FlushStatus {
    collector().flush_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::{JsonFormatter, LogfmtFormatter};
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_sink_to_reuses_key() {
        let collector = Collector::new();
        let buffer = Buffer::default();

        let first = collector
            .sink_to(Destination::new("buf", buffer.clone()), LogfmtFormatter::new())
            .unwrap();
        first.require_key(["a"]);
        let second = collector
            .sink_to(Destination::new("buf", buffer.clone()), JsonFormatter::new())
            .unwrap();

        assert_eq!(collector.len(), 1);
        assert!(first.same_as(&second));
        assert!(second.rules().slot("a").is_some());

        second.start();
        assert!(collector.dispatch_and_wait(Record::new().pair("a", 1)).is_completed());
        assert_eq!(buffer.contents(), "{\"a\":1}\n");
        collector.close_all();
    }

    #[test]
    fn test_closed_sink_leaves_registry() {
        let collector = Collector::new();
        let sink = collector
            .sink_to(Destination::new("gone", io::sink()), LogfmtFormatter::new())
            .unwrap();
        assert_eq!(collector.len(), 1);

        sink.close();
        assert!(collector.is_empty());
        assert_eq!(sink.state(), SinkState::Closed);

        let again = collector
            .sink_to(Destination::new("gone", io::sink()), LogfmtFormatter::new())
            .unwrap();
        assert!(!again.same_as(&sink));
        assert_eq!(again.state(), SinkState::Stopped);
    }

    #[test]
    fn test_flush_with_no_sinks_completes() {
        let collector = Collector::new();
        collector.dispatch(Record::new().pair("a", 1));
        assert_eq!(collector.flush_all(), FlushStatus::Completed);
        assert_eq!(
            collector.dispatch_and_wait(Record::new().pair("a", 1)),
            FlushStatus::Completed
        );
    }
}
