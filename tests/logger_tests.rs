mod common;

use common::SharedBuffer;
use kvlog::{
    Collector, Destination, JsonFormatter, Logger, LogfmtFormatter, TypedValue, ValueType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn setup() -> (Arc<Collector>, SharedBuffer) {
    let collector = Collector::new();
    let buffer = SharedBuffer::new();
    collector
        .sink_to(Destination::new("log", buffer.clone()), LogfmtFormatter::new())
        .unwrap()
        .start();
    (collector, buffer)
}

#[test]
fn test_context_and_pending_pairs() {
    let (collector, buffer) = setup();
    let mut log = Logger::with_collector(Arc::clone(&collector));
    log.with("service", "api");

    log.add("n", 1).add("ok", true).log();
    log.add("n", 2).log_and_wait();

    assert_eq!(
        buffer.lines(),
        ["service=\"api\" n=1 ok=true", "service=\"api\" n=2"]
    );
}

#[test]
fn test_level_helpers() {
    let (collector, buffer) = setup();
    let mut log = Logger::with_collector(collector.clone());

    log.info("started");
    log.warn("disk low");
    log.add("code", 7).error("failed");
    collector.flush_all();

    assert_eq!(
        buffer.lines(),
        [
            "level=\"info\" message=\"started\"",
            "level=\"warning\" message=\"disk low\"",
            "code=7 level=\"error\" message=\"failed\"",
        ]
    );
}

#[test]
fn test_level_filtering_is_plain_value_filtering() {
    let collector = Collector::new();
    let errors = SharedBuffer::new();
    collector
        .sink_to(Destination::new("errors", errors.clone()), JsonFormatter::new())
        .unwrap()
        .require_value("level", ["error", "critical", "fatal"])
        .start();

    let mut log = Logger::with_collector(collector.clone());
    log.debug("noise");
    log.crit("on fire");
    log.fatal("gone");
    collector.flush_all();

    assert_eq!(
        errors.lines(),
        [
            "{\"level\":\"critical\",\"message\":\"on fire\"}",
            "{\"level\":\"fatal\",\"message\":\"gone\"}",
        ]
    );
}

#[test]
fn test_deferred_value_resolved_once_per_record() {
    let (collector, buffer) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut log = Logger::with_collector(collector.clone());
    log.with(
        "call",
        TypedValue::deferred(ValueType::Integer, move || {
            (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
        }),
    );

    // A second sink sees the same resolved value.
    let mirror = SharedBuffer::new();
    collector
        .sink_to(Destination::new("mirror", mirror.clone()), LogfmtFormatter::new())
        .unwrap()
        .start();

    log.log();
    log.log();
    collector.flush_all();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(buffer.contents(), "call=1\ncall=2\n");
    assert_eq!(mirror.contents(), buffer.contents());
}

#[test]
fn test_forked_loggers_on_threads() {
    let (collector, buffer) = setup();
    let mut base = Logger::with_collector(collector.clone());
    base.with("app", "demo");

    thread::scope(|scope| {
        for worker in 0..4 {
            let mut log = base.clone();
            scope.spawn(move || {
                log.with("worker", worker);
                for n in 0..10 {
                    log.add("n", n).log();
                }
            });
        }
    });
    collector.flush_all();

    let lines = buffer.lines();
    assert_eq!(lines.len(), 40);
    assert!(lines.iter().all(|l| l.starts_with("app=\"demo\" worker=")));
    assert_eq!(base.context_keys().collect::<Vec<_>>(), ["app"]);
}

#[test]
fn test_optional_and_void_values() {
    let (collector, buffer) = setup();
    let mut log = Logger::with_collector(collector.clone());

    log.add("present", Some(3))
        .add("absent", None::<i32>)
        .with_key("marker");
    log.log_and_wait();

    assert_eq!(buffer.contents(), "marker= present=3 absent=\n");
}
