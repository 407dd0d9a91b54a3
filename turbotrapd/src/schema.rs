use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    RateLimitExceeded,
    DangerousFunctionCode,
    MaliciousWrite,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::DangerousFunctionCode => "dangerous_function_code",
            Self::MaliciousWrite => "malicious_write",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::RateLimitExceeded => Severity::Medium,
            Self::DangerousFunctionCode => Severity::High,
            Self::MaliciousWrite => Severity::High,
        }
    }
}

/// Confirmed suspicious event. Immutable once constructed; flows from the
/// detector through the bus to every sink by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub kind: IncidentKind,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub attack_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_code: Option<u8>,
}

impl Incident {
    /// Operator-facing alert text used by the webhook sink.
    pub fn alert_body(&self) -> String {
        let mut body = format!(
            "INDUSTRIAL SECURITY ALERT\n\n\
             Time: {}\n\
             Source: {}\n\
             Attack Type: {}\n\
             Target: ABB Turbocharger Control Unit (TPL-77K)\n",
            self.timestamp.to_rfc3339(),
            self.source,
            self.attack_type,
        );
        if let (Some(register), Some(value)) = (self.register, self.value) {
            body.push_str(&format!("Target Register: {register}\nWritten Value: {value}\n"));
        }
        if let Some(code) = self.function_code {
            body.push_str(&format!("Function Code: {code}\n"));
        }
        body.push_str(&format!(
            "Details: {}\nRisk Level: {}\n",
            self.description,
            self.severity.as_str().to_uppercase()
        ));
        body
    }
}

/// Verdict for a single observed protocol event.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub is_suspicious: bool,
    pub attack_type: Option<String>,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Classification {
    pub fn benign(description: Option<String>) -> Self {
        Self {
            is_suspicious: false,
            attack_type: None,
            description,
            timestamp: Utc::now(),
        }
    }

    pub fn suspicious(attack_type: String, description: String) -> Self {
        Self {
            is_suspicious: true,
            attack_type: Some(attack_type),
            description: Some(description),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time aggregate over detector state, recomputed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct AttackSummary {
    pub total_attacks: u64,
    pub unique_attackers: usize,
    pub suspicious_writes: usize,
    pub function_code_tally: BTreeMap<u8, u64>,
    pub last_updated: DateTime<Utc>,
}

/// A suspicious register write retained for the summary surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteObservation {
    pub register: u16,
    pub value: u16,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Wire format of the live feed. Sensor snapshots come from the protocol
/// engine and are carried opaquely.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Incident(Incident),
    Sensors(serde_json::Value),
}
