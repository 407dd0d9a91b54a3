use crate::bus::IncidentBus;
use crate::config::Config;
use crate::detector::AttackDetector;
use crate::sinks::{AuditLogSink, IncidentSink, LiveFeedSink, WebhookAlertSink};
use anyhow::Result;
use log::warn;
use std::sync::Arc;

/// Everything the pipeline needs, constructed once at process start and
/// passed by reference; there is no global lookup anywhere.
///
/// The protocol engine embeds this and calls `detector.observe_*` from its
/// session handlers; the HTTP surface uses it as axum state.
#[derive(Clone)]
pub struct AppContext {
    pub detector: Arc<AttackDetector>,
    pub bus: Arc<IncidentBus>,
    pub audit: Arc<AuditLogSink>,
    pub alerts: Arc<WebhookAlertSink>,
}

impl AppContext {
    pub async fn bootstrap(config: &Config) -> Result<Self> {
        let feed = LiveFeedSink::new(config.feed_capacity);
        let bus = Arc::new(IncidentBus::new(feed));

        let audit = Arc::new(AuditLogSink::new(&config.audit_file));
        bus.attach(Arc::clone(&audit) as Arc<dyn IncidentSink>);

        let alerts = Arc::new(WebhookAlertSink::from_config(config.alert.as_ref()));
        bus.attach(Arc::clone(&alerts) as Arc<dyn IncidentSink>);
        if alerts.is_configured() {
            if let Err(e) = alerts.test_connection().await {
                warn!("[alert] webhook connection test failed: {e:#}");
            }
        }

        let detector = Arc::new(AttackDetector::with_thresholds(
            Arc::clone(&bus),
            config.critical_register_max,
            config.critical_write_limit,
        ));

        Ok(Self {
            detector,
            bus,
            audit,
            alerts,
        })
    }

    /// Sensor snapshots from the decoy's register state, forwarded to live
    /// observers only; they are not incidents and never hit guaranteed
    /// sinks.
    pub fn publish_sensors(&self, snapshot: serde_json::Value) {
        self.bus.feed().push_sensors(snapshot);
    }
}
