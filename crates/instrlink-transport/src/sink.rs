//! Traffic reporting.
//!
//! Transports report every outbound command and every completed inbound
//! frame to an [`EventSink`] injected at construction. The sink is a
//! collaborator: transports never depend on what it does with the events.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use instrlink_frame::{Command, Frame};

/// A timestamped log/publish target for transport traffic.
pub trait EventSink: Send + Sync {
    fn report(&self, timestamp: SystemTime, message: &str);
}

/// Shared handle to a sink, as held by transports.
pub type SharedSink = Arc<dyn EventSink>;

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn report(&self, _timestamp: SystemTime, _message: &str) {}
}

/// Emits events through `tracing` under the `instrlink::traffic` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn report(&self, timestamp: SystemTime, message: &str) {
        tracing::info!(
            target: "instrlink::traffic",
            at = %format_timestamp(timestamp),
            "{message}"
        );
    }
}

/// A recorded traffic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficEvent {
    pub timestamp: SystemTime,
    pub message: String,
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TrafficEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<TrafficEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl EventSink for MemorySink {
    fn report(&self, timestamp: SystemTime, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TrafficEvent {
                timestamp,
                message: message.to_string(),
            });
        }
    }
}

/// A sink that drops everything.
pub fn noop() -> SharedSink {
    Arc::new(NoopSink)
}

/// Local wall-clock rendering used in traffic logs.
pub fn format_timestamp(timestamp: SystemTime) -> String {
    DateTime::<Local>::from(timestamp)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

pub(crate) fn outbound_message(command: &Command) -> String {
    match command.description.as_deref() {
        Some(description) => format!(
            "{description} Send Command:'{}'",
            command.text_preview()
        ),
        None => format!(" >>>>>> [SEND: {}]", command.text_preview()),
    }
}

pub(crate) fn inbound_message(frame: &Frame) -> String {
    format!("Receive:'{}'", frame.text_preview())
}

pub(crate) fn report_sent(sink: &dyn EventSink, command: &Command) {
    sink.report(SystemTime::now(), &outbound_message(command));
}

pub(crate) fn report_received(sink: &dyn EventSink, frame: &Frame) {
    sink.report(SystemTime::now(), &inbound_message(frame));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_message_uses_description_when_present() {
        let described = Command::from("PWR ON\r\n").describe("power up DUT");
        assert_eq!(
            outbound_message(&described),
            "power up DUT Send Command:'PWR ON'"
        );

        let bare = Command::from("PWR ON\r\n");
        assert_eq!(outbound_message(&bare), " >>>>>> [SEND: PWR ON]");
    }

    #[test]
    fn inbound_message_trims_frame() {
        let frame = Frame::complete(&b"OK\r\n"[..]);
        assert_eq!(inbound_message(&frame), "Receive:'OK'");
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        report_sent(&sink, &Command::from("A\n"));
        report_received(&sink, &Frame::complete(&b"B\n"[..]));

        assert_eq!(
            sink.messages(),
            vec![" >>>>>> [SEND: A]".to_string(), "Receive:'B'".to_string()]
        );
        let events = sink.events();
        assert!(events[0].timestamp <= events[1].timestamp);
    }

    #[test]
    fn timestamp_format_has_microseconds() {
        let rendered = format_timestamp(SystemTime::now());
        let fraction = rendered.rsplit('.').next().unwrap();
        assert_eq!(fraction.len(), 6);
    }
}
