use crate::schema::{FeedEvent, Incident};
use log::debug;
use tokio::sync::broadcast;

/// Best-effort fan-out to live observers (SSE subscribers).
///
/// Backed by a broadcast channel: a lagging subscriber loses its oldest
/// pending events, every other subscriber and the publisher are unaffected.
/// At-most-once by design; nothing here is retried.
#[derive(Clone)]
pub struct LiveFeedSink {
    tx: broadcast::Sender<FeedEvent>,
}

impl LiveFeedSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn push_incident(&self, incident: Incident) {
        // send only errors when nobody is subscribed; that is not a fault.
        let _ = self.tx.send(FeedEvent::Incident(incident));
    }

    /// Sensor snapshots from the protocol engine ride the same feed so the
    /// observer surface sees one ordered stream per subscriber.
    pub fn push_sensors(&self, snapshot: serde_json::Value) {
        debug!("[feed] sensor snapshot for {} subscriber(s)", self.subscriber_count());
        let _ = self.tx.send(FeedEvent::Sensors(snapshot));
    }
}
