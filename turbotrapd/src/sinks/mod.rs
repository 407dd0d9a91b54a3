//! Incident consumers attached to the bus.

pub mod audit;
pub mod live_feed;
pub mod webhook;

use crate::schema::Incident;
use async_trait::async_trait;
use std::fmt;

pub use audit::AuditLogSink;
pub use live_feed::LiveFeedSink;
pub use webhook::WebhookAlertSink;

/// Delivery failure classification driving the bus retry policy.
#[derive(Debug)]
pub enum DeliveryError {
    /// Worth retrying with backoff (network timeout, 5xx).
    Transient(String),
    /// Retrying cannot help (rejected payload, bad configuration).
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            DeliveryError::Transient(reason) | DeliveryError::Permanent(reason) => reason,
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Transient(reason) => write!(f, "transient delivery failure: {reason}"),
            DeliveryError::Permanent(reason) => write!(f, "permanent delivery failure: {reason}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// A guaranteed consumer of incidents. Each attached sink gets its own
/// queue and worker; `deliver` runs off the protocol hot path and may
/// block, fail, or stall without affecting other sinks.
#[async_trait]
pub trait IncidentSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, incident: &Incident) -> Result<(), DeliveryError>;
}
