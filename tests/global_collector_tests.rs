// The process-wide collector is shared by every test in a binary, so this
// file holds a single test.
mod common;

use common::SharedBuffer;
use kvlog::{Destination, Logger, LogfmtFormatter, Record};

#[test]
fn test_default_collector_roundtrip_and_reset() {
    let fresh = kvlog::reset_collector();
    assert!(fresh.is_empty());

    let buffer = SharedBuffer::new();
    let sink = kvlog::sink_to(Destination::new("global", buffer.clone()), LogfmtFormatter::new())
        .unwrap();
    sink.start();

    kvlog::dispatch(Record::new().pair("via", "dispatch"));
    let mut log = Logger::new();
    log.add("via", "logger").log();
    assert!(kvlog::flush_all().is_completed());
    assert!(kvlog::dispatch_and_wait(Record::new().pair("via", "wait")).is_completed());

    assert_eq!(
        buffer.contents(),
        "via=\"dispatch\"\nvia=\"logger\"\nvia=\"wait\"\n"
    );

    let next = kvlog::reset_collector();
    assert!(next.is_empty());
    assert_eq!(sink.state(), kvlog::SinkState::Closed);

    kvlog::dispatch(Record::new().pair("via", "after-reset"));
    assert!(kvlog::flush_all().is_completed());
    assert_eq!(buffer.lines().len(), 3);
}
