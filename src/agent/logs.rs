//! Live log bus for the agent's event stream
//!
//! [`BroadcastLogLayer`] is a tracing layer that turns every event into a
//! [`LogEvent`] on a broadcast channel. `GET /agent/v1/logs` subscribes to
//! that channel and streams the events as server-sent events.

use crate::agent::api::LogEvent;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::IntervalStream;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// SSE event name used for every log line
pub const LOG_EVENT_NAME: &str = "log";

/// Fan-out channel of log events for one node
#[derive(Clone)]
pub struct LogBus {
    node: String,
    sender: broadcast::Sender<LogEvent>,
}

impl LogBus {
    /// Create a bus that keeps up to `capacity` unread events per subscriber
    pub fn new(node: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            node: node.into(),
            sender,
        }
    }

    /// Node name stamped on events
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Publish one event. Dropped silently when nobody is listening.
    pub fn publish(&self, level: &str, message: impl Into<String>) {
        let _ = self.sender.send(LogEvent {
            time: Utc::now(),
            level: level.to_string(),
            message: message.into(),
            node: self.node.clone(),
        });
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    /// Tracing layer feeding this bus
    pub fn layer(&self) -> BroadcastLogLayer {
        BroadcastLogLayer { bus: self.clone() }
    }
}

/// Tracing layer that republishes events on a [`LogBus`]
#[derive(Clone)]
pub struct BroadcastLogLayer {
    bus: LogBus,
}

impl<S> Layer<S> for BroadcastLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if self.bus.sender.receiver_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.bus
            .publish(event.metadata().level().as_str(), visitor.finish());
    }
}

/// Collects the message plus `key=value` pairs for every other field.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push_str(&format!(" {}={}", field.name(), value));
        }
    }
}

/// Periodic liveness events so idle streams keep showing activity
pub fn heartbeat_events(node: String, period: Duration) -> impl Stream<Item = LogEvent> + Send + 'static {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    IntervalStream::new(interval).map(move |_| LogEvent {
        time: Utc::now(),
        level: "INFO".to_string(),
        message: "Heartbeat: node operational".to_string(),
        node: node.clone(),
    })
}

/// Encode one event as a raw SSE frame
pub fn sse_frame(event: &LogEvent) -> Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", LOG_EVENT_NAME, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn test_layer_publishes_events() {
        let bus = LogBus::new("edge-test", 16);
        let mut rx = bus.subscribe();
        let subscriber = tracing_subscriber::registry().with(bus.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(peer = "abc", "Peer sync failed");
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.level, "WARN");
        assert_eq!(event.node, "edge-test");
        assert_eq!(event.message, "Peer sync failed peer=abc");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let bus = LogBus::new("edge-test", 4);
        bus.publish("INFO", "nobody listens");
    }

    #[tokio::test]
    async fn test_heartbeat_stream() {
        let mut events = Box::pin(heartbeat_events("core".to_string(), Duration::from_millis(10)));
        let event = events.next().await.unwrap();
        assert_eq!(event.node, "core");
        assert!(event.message.starts_with("Heartbeat"));
    }

    #[test]
    fn test_sse_frame_shape() {
        let event = LogEvent {
            time: Utc::now(),
            level: "INFO".to_string(),
            message: "hello".to_string(),
            node: "core".to_string(),
        };
        let frame = sse_frame(&event);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: log\ndata: {"));
        assert!(text.ends_with("}\n\n"));
    }
}
