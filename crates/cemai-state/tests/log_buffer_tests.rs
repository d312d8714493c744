use chrono::Utc;

use cemai_protocol::{LogAgent, LogEntry, LogLevel, LOG_BUFFER_CAPACITY};
use cemai_state::LogBuffer;

fn entry(n: usize) -> LogEntry {
    LogEntry {
        id: format!("log-{n}"),
        timestamp: Utc::now(),
        agent: LogAgent::Master,
        level: LogLevel::Info,
        message: format!("line {n}"),
    }
}

#[test]
fn test_buffer_never_exceeds_capacity() {
    let mut buffer = LogBuffer::new();
    assert_eq!(buffer.capacity(), LOG_BUFFER_CAPACITY);

    for n in 0..(LOG_BUFFER_CAPACITY * 2 + 17) {
        buffer.push(entry(n));
        assert!(buffer.len() <= LOG_BUFFER_CAPACITY);
    }
    assert_eq!(buffer.len(), LOG_BUFFER_CAPACITY);
}

#[test]
fn test_oldest_entries_evicted_first() {
    let mut buffer = LogBuffer::with_capacity(3);
    buffer.extend((0..5).map(entry));

    let ids: Vec<_> = buffer.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["log-2", "log-3", "log-4"]);
}

#[test]
fn test_latest_returns_tail_in_order() {
    let mut buffer = LogBuffer::new();
    buffer.extend((0..10).map(entry));

    let tail: Vec<_> = buffer.latest(3).into_iter().map(|e| e.message.clone()).collect();
    assert_eq!(tail, vec!["line 7", "line 8", "line 9"]);
    assert_eq!(buffer.latest(50).len(), 10);
}

#[test]
fn test_zero_capacity_is_clamped() {
    let mut buffer = LogBuffer::with_capacity(0);
    buffer.push(entry(1));
    buffer.push(entry(2));
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.iter().next().unwrap().id, "log-2");
}
