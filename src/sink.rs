use crate::collector::Collector;
use crate::config::CollectorConfig;
use crate::error::SinkError;
use crate::filter::{
    Filter, FilterSlot, FloatRangeFilter, IntRangeFilter, KeyFilter, RegexFilter, TimeRangeFilter,
    ValueSetFilter,
};
use crate::formatters::Formatter;
use crate::pair::Record;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const STDOUT_KEY: &str = "<stdout>";
pub const STDERR_KEY: &str = "<stderr>";

static NEXT_SINK_ID: AtomicUsize = AtomicUsize::new(1);

/// Records handled between two settles while the queue stays busy.
const SETTLE_BATCH: u64 = 32;

const SEND_BACKOFF_MIN: Duration = Duration::from_micros(50);
const SEND_BACKOFF_MAX: Duration = Duration::from_millis(5);

// A panicking filter or formatter must not take the registry down with it.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle of a sink. New sinks start `Stopped` so that filters can be
/// configured before the first record is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    Stopped = 0,
    Active = 1,
    Closed = 2,
}

impl SinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SinkState::Active,
            2 => SinkState::Closed,
            _ => SinkState::Stopped,
        }
    }
}

/// Outcome of a bounded flush. Timing out is not an error: the caller may
/// retry or carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Completed,
    TimedOut,
}

impl FlushStatus {
    pub fn is_completed(self) -> bool {
        self == FlushStatus::Completed
    }
}

/// A write-only byte stream together with the identity sinks are keyed by.
pub struct Destination {
    key: String,
    writer: Box<dyn Write + Send>,
}

impl Destination {
    /// Any writer under a caller-chosen identity.
    pub fn new(key: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            key: key.into(),
            writer: Box::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(STDOUT_KEY, io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(STDERR_KEY, io::stderr())
    }

    /// Appends to `path`, creating it if needed. The canonical path is the identity.
    pub fn file(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Destination {
                path: path.to_path_buf(),
                source,
            })?;
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self::new(key.display().to_string(), BufWriter::new(file)))
    }

    /// `stdout` (or `-`), `stderr`, or a file path.
    pub fn parse(spec: &str) -> Result<Self, SinkError> {
        match spec {
            "stdout" | "-" => Ok(Self::stdout()),
            "stderr" => Ok(Self::stderr()),
            path => Self::file(path),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination").field("key", &self.key).finish()
    }
}

/// Snapshot of what a sink did with the records it was offered.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub written: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub write_errors: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    write_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SinkStats {
        SinkStats {
            written: self.written.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Filter rules and hidden keys of one sink.
#[derive(Debug, Clone, Default)]
pub struct SinkRules {
    slots: HashMap<String, FilterSlot>,
    hidden: HashSet<String>,
}

impl SinkRules {
    pub fn set(&mut self, key: impl Into<String>, slot: FilterSlot) {
        self.slots.insert(key.into(), slot);
    }

    pub fn clear(&mut self, key: &str) {
        self.slots.remove(key);
    }

    pub fn slot(&self, key: &str) -> Option<&FilterSlot> {
        self.slots.get(key)
    }

    pub fn hide(&mut self, key: impl Into<String>) {
        self.hidden.insert(key.into());
    }

    pub fn unhide(&mut self, key: &str) {
        self.hidden.remove(key);
    }

    pub fn is_hidden(&self, key: &str) -> bool {
        self.hidden.contains(key)
    }

    /// A record is rejected as soon as one of its pairs fails the rule kept
    /// for its key, or when it lacks a required key. Value rules whose key
    /// is absent from the record never reject. Hidden keys take part like
    /// any other.
    pub fn admits(&self, record: &Record) -> bool {
        if self.slots.is_empty() {
            return true;
        }
        let failed = record.iter().any(|pair| {
            self.slots
                .get(&pair.key)
                .is_some_and(|slot| slot.rejects(&pair.key, &pair.value))
        });
        if failed {
            return false;
        }
        self.slots
            .iter()
            .filter(|(_, slot)| slot.requires_presence())
            .all(|(key, _)| record.contains_key(key))
    }

    fn release(&mut self) {
        self.slots = HashMap::new();
        self.hidden = HashSet::new();
    }
}

enum Envelope {
    Record(Arc<Record>),
    Formatter(Box<dyn Formatter>),
}

/// Count of records the worker has finished with, for flush barriers.
#[derive(Default)]
struct Progress {
    processed: Mutex<u64>,
    advanced: Condvar,
}

struct SinkShared {
    id: usize,
    key: String,
    state: AtomicU8,
    closing: AtomicBool,
    rules: RwLock<SinkRules>,
    queue: RwLock<Option<SyncSender<Envelope>>>,
    enqueued: AtomicU64,
    progress: Progress,
    counters: Counters,
    flush_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<Collector>,
}

impl SinkShared {
    fn state(&self) -> SinkState {
        SinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn acknowledge(&self, count: u64) {
        if count == 0 {
            return;
        }
        let mut processed = lock(&self.progress.processed);
        *processed += count;
        self.progress.advanced.notify_all();
    }

    fn wait_until(&self, seq: u64, deadline: Instant) -> bool {
        let mut processed = lock(&self.progress.processed);
        while *processed < seq {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .progress
                .advanced
                .wait_timeout(processed, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            processed = guard;
        }
        true
    }

    fn process(&self, record: &Record, formatter: &mut dyn Formatter, writer: &mut dyn Write) {
        if self.state() != SinkState::Active {
            Counters::bump(&self.counters.dropped);
            return;
        }

        let rules = read_lock(&self.rules);
        if !rules.admits(record) {
            Counters::bump(&self.counters.rejected);
            return;
        }

        formatter.begin();
        for pair in record.iter().filter(|p| !rules.is_hidden(&p.key)) {
            formatter.pair(&pair.key, &pair.value, pair.kind);
        }
        drop(rules);

        match writer.write_all(formatter.finish()) {
            Ok(()) => Counters::bump(&self.counters.written),
            Err(e) => {
                Counters::bump(&self.counters.write_errors);
                tracing::warn!(sink = %self.key, error = %e, "failed to write record");
            }
        }
    }

    /// Pushes buffered output to the destination, then releases waiters.
    fn settle(&self, writer: &mut dyn Write, unacked: &mut u64) {
        if let Err(e) = writer.flush() {
            Counters::bump(&self.counters.write_errors);
            tracing::warn!(sink = %self.key, error = %e, "failed to flush destination");
        }
        self.acknowledge(*unacked);
        *unacked = 0;
    }

    fn run(
        self: Arc<Self>,
        rx: Receiver<Envelope>,
        mut writer: Box<dyn Write + Send>,
        mut formatter: Box<dyn Formatter>,
    ) {
        let mut unacked: u64 = 0;
        loop {
            let envelope = if unacked == 0 {
                match rx.recv() {
                    Ok(envelope) => envelope,
                    Err(_) => break,
                }
            } else if unacked >= SETTLE_BATCH {
                self.settle(writer.as_mut(), &mut unacked);
                continue;
            } else {
                match rx.try_recv() {
                    Ok(envelope) => envelope,
                    Err(TryRecvError::Empty) => {
                        self.settle(writer.as_mut(), &mut unacked);
                        continue;
                    }
                    Err(TryRecvError::Disconnected) => break,
                }
            };

            match envelope {
                Envelope::Record(record) => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        self.process(&record, formatter.as_mut(), writer.as_mut())
                    }));
                    if outcome.is_err() {
                        Counters::bump(&self.counters.rejected);
                        tracing::error!(
                            sink = %self.key,
                            "filter or formatter panicked, record skipped"
                        );
                    }
                    unacked += 1;
                }
                Envelope::Formatter(next) => formatter = next,
            }
        }

        self.settle(writer.as_mut(), &mut unacked);
        write_lock(&self.rules).release();
        tracing::debug!(sink = %self.key, "sink worker finished");
    }
}

/// Handle to one output sink. Clones refer to the same sink.
///
/// Configuration methods return the handle so calls can be chained:
///
/// ```ignore
/// let sink = collector.sink_to(Destination::stdout(), LogfmtFormatter::new())?;
/// sink.require_value("level", ["ERROR", "FATAL"]).hide(["trace_id"]).start();
/// ```
#[derive(Clone)]
pub struct Sink {
    shared: Arc<SinkShared>,
}

impl Sink {
    pub(crate) fn spawn(
        destination: Destination,
        formatter: Box<dyn Formatter>,
        config: &CollectorConfig,
        registry: Weak<Collector>,
    ) -> Result<Self, SinkError> {
        let Destination { key, writer } = destination;
        let (tx, rx) = mpsc::sync_channel::<Envelope>(config.queue_capacity.max(1));
        let id = NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed);

        let shared = Arc::new(SinkShared {
            id,
            key: key.clone(),
            state: AtomicU8::new(SinkState::Stopped as u8),
            closing: AtomicBool::new(false),
            rules: RwLock::new(SinkRules::default()),
            queue: RwLock::new(Some(tx)),
            enqueued: AtomicU64::new(0),
            progress: Progress::default(),
            counters: Counters::default(),
            flush_timeout: config.flush_timeout,
            worker: Mutex::new(None),
            registry,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("kvlog-sink-{}", id))
            .spawn(move || worker_shared.run(rx, writer, formatter))
            .map_err(|source| SinkError::Spawn { key, source })?;
        *lock(&shared.worker) = Some(handle);

        tracing::debug!(sink = %shared.key, id, "sink created");
        Ok(Self { shared })
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn state(&self) -> SinkState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SinkState::Active
    }

    pub fn stats(&self) -> SinkStats {
        self.shared.counters.snapshot()
    }

    pub(crate) fn same_as(&self, other: &Sink) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn is_closed(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst) || self.state() == SinkState::Closed
    }

    fn configure(&self, f: impl FnOnce(&mut SinkRules)) -> &Self {
        if !self.is_closed() {
            f(&mut write_lock(&self.shared.rules));
        }
        self
    }

    fn set_slot(&self, key: String, slot: FilterSlot) -> &Self {
        self.configure(|rules| rules.set(key, slot))
    }

    /// Only records carrying every one of the keys pass.
    pub fn require_key<I, S>(&self, keys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure(|rules| {
            for key in keys {
                rules.set(key.as_ref(), FilterSlot::Required);
            }
        })
    }

    /// Records carrying any of the keys are rejected.
    pub fn exclude_key<I, S>(&self, keys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure(|rules| {
            for key in keys {
                rules.set(key.as_ref(), FilterSlot::Negative(Arc::new(KeyFilter)));
            }
        })
    }

    /// The key, when present, must hold one of `values`.
    /// An empty list is the same as [`require_key`](Self::require_key).
    pub fn require_value<I, S>(&self, key: &str, values: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = ValueSetFilter::new(values);
        if filter.is_empty() {
            return self.require_key([key]);
        }
        self.set_slot(key.to_string(), FilterSlot::Positive(Arc::new(filter)))
    }

    /// Records where the key holds one of `values` are rejected.
    /// An empty list is the same as [`exclude_key`](Self::exclude_key).
    pub fn exclude_value<I, S>(&self, key: &str, values: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = ValueSetFilter::new(values);
        if filter.is_empty() {
            return self.exclude_key([key]);
        }
        self.set_slot(key.to_string(), FilterSlot::Negative(Arc::new(filter)))
    }

    pub fn require_int_range(&self, key: &str, from: i64, to: i64) -> &Self {
        self.set_slot(
            key.to_string(),
            FilterSlot::Positive(Arc::new(IntRangeFilter { from, to })),
        )
    }

    pub fn exclude_int_range(&self, key: &str, from: i64, to: i64) -> &Self {
        self.set_slot(
            key.to_string(),
            FilterSlot::Negative(Arc::new(IntRangeFilter { from, to })),
        )
    }

    pub fn require_float_range(&self, key: &str, from: f64, to: f64) -> &Self {
        self.set_slot(
            key.to_string(),
            FilterSlot::Positive(Arc::new(FloatRangeFilter { from, to })),
        )
    }

    pub fn exclude_float_range(&self, key: &str, from: f64, to: f64) -> &Self {
        self.set_slot(
            key.to_string(),
            FilterSlot::Negative(Arc::new(FloatRangeFilter { from, to })),
        )
    }

    pub fn require_time_range(&self, key: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> &Self {
        self.with_time_filter(key, TimeRangeFilter::new(from, to), false)
    }

    pub fn exclude_time_range(&self, key: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> &Self {
        self.with_time_filter(key, TimeRangeFilter::new(from, to), true)
    }

    /// Time range rule with an explicit layout for parsing values.
    pub fn with_time_filter(&self, key: &str, filter: TimeRangeFilter, negative: bool) -> &Self {
        let filter: Arc<dyn Filter> = Arc::new(filter);
        let slot = if negative {
            FilterSlot::Negative(filter)
        } else {
            FilterSlot::Positive(filter)
        };
        self.set_slot(key.to_string(), slot)
    }

    pub fn require_pattern(&self, key: &str, pattern: Regex) -> &Self {
        self.set_slot(
            key.to_string(),
            FilterSlot::Positive(Arc::new(RegexFilter::new(pattern))),
        )
    }

    /// Custom predicate for the key, always treated as a positive rule.
    pub fn with_filter(&self, key: &str, filter: impl Filter + 'static) -> &Self {
        self.set_slot(key.to_string(), FilterSlot::Positive(Arc::new(filter)))
    }

    /// Drops any rule kept for the keys.
    pub fn clear_filters<I, S>(&self, keys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure(|rules| {
            for key in keys {
                rules.clear(key.as_ref());
            }
        })
    }

    /// Keeps the keys out of the formatted output. Filters still see them.
    pub fn hide<I, S>(&self, keys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure(|rules| {
            for key in keys {
                rules.hide(key.as_ref());
            }
        })
    }

    pub fn unhide<I, S>(&self, keys: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.configure(|rules| {
            for key in keys {
                rules.unhide(key.as_ref());
            }
        })
    }

    /// Copy of the current rules.
    pub fn rules(&self) -> SinkRules {
        read_lock(&self.shared.rules).clone()
    }

    pub fn start(&self) -> &Self {
        self.transition(SinkState::Stopped, SinkState::Active);
        self
    }

    /// Records offered while stopped are dropped, not kept for later.
    pub fn stop(&self) -> &Self {
        self.transition(SinkState::Active, SinkState::Stopped);
        self
    }

    fn transition(&self, from: SinkState, to: SinkState) {
        if self.is_closed() {
            return;
        }
        if self
            .shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!(sink = %self.shared.key, state = ?to, "sink state changed");
        }
    }

    pub(crate) fn set_formatter(&self, formatter: Box<dyn Formatter>) {
        // Ordered with queued records: earlier ones keep the old formatter.
        let _ = self.deliver(Envelope::Formatter(formatter));
    }

    /// Hands the envelope to the worker, waiting while the queue is full.
    /// Gives up once the sink starts closing, so a stalled destination
    /// never keeps `close` waiting on a producer.
    fn deliver(&self, mut envelope: Envelope) -> Result<(), Envelope> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(envelope);
        }
        let tx = match read_lock(&self.shared.queue).as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(envelope),
        };
        let mut backoff = SEND_BACKOFF_MIN;
        loop {
            match tx.try_send(envelope) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(rejected)) => return Err(rejected),
                Err(TrySendError::Full(rejected)) => {
                    if self.shared.closing.load(Ordering::SeqCst) {
                        return Err(rejected);
                    }
                    envelope = rejected;
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(SEND_BACKOFF_MAX);
                }
            }
        }
    }

    /// Queues the record if the sink is active. Returns the sequence number
    /// to wait for, or `None` when the record was not queued.
    pub(crate) fn offer(&self, record: &Arc<Record>) -> Option<u64> {
        match self.state() {
            SinkState::Active => {}
            SinkState::Stopped => {
                Counters::bump(&self.shared.counters.dropped);
                return None;
            }
            SinkState::Closed => return None,
        }

        let seq = self.shared.enqueued.fetch_add(1, Ordering::SeqCst) + 1;
        if self.deliver(Envelope::Record(Arc::clone(record))).is_err() {
            // Closing or worker gone; account for the record so flushes still complete.
            Counters::bump(&self.shared.counters.dropped);
            self.shared.acknowledge(1);
            return None;
        }
        Some(seq)
    }

    pub(crate) fn enqueued(&self) -> u64 {
        self.shared.enqueued.load(Ordering::SeqCst)
    }

    pub(crate) fn wait_until(&self, seq: u64, deadline: Instant) -> bool {
        self.shared.wait_until(seq, deadline)
    }

    /// Waits until every record queued before the call has been handled,
    /// at most for the configured flush timeout.
    pub fn flush(&self) -> FlushStatus {
        if self.state() == SinkState::Closed {
            return FlushStatus::Completed;
        }
        let deadline = Instant::now() + self.shared.flush_timeout;
        if self.wait_until(self.enqueued(), deadline) {
            FlushStatus::Completed
        } else {
            tracing::warn!(
                sink = %self.shared.key,
                timeout = ?self.shared.flush_timeout,
                "flush timed out"
            );
            FlushStatus::TimedOut
        }
    }

    /// Drains what is already queued, stops accepting records, releases the
    /// filters and leaves the collector. Closing twice is a no-op.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained = self.flush();
        self.shared
            .state
            .store(SinkState::Closed as u8, Ordering::SeqCst);
        // Producers still holding a sender give up once they see `closing`.
        drop(write_lock(&self.shared.queue).take());

        if drained.is_completed() {
            let handle = lock(&self.shared.worker).take();
            if let Some(handle) = handle {
                if handle.thread().id() != thread::current().id() {
                    let _ = handle.join();
                }
            }
        }

        if let Some(registry) = self.shared.registry.upgrade() {
            registry.deregister(self);
        }
        tracing::debug!(sink = %self.shared.key, "sink closed");
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.shared.id)
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .finish()
    }
}
