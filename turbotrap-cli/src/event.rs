use colored::*;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Incident {
    pub source: String,
    pub timestamp: String,
    pub severity: Severity,
    pub attack_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Incident(Incident),
    Sensors(serde_json::Value),
}

impl FeedEvent {
    pub fn pretty(&self, color: bool) -> String {
        match self {
            FeedEvent::Incident(incident) => incident.pretty(color),
            FeedEvent::Sensors(snapshot) => {
                let line = format!("sensors {snapshot}");
                if color {
                    line.dimmed().to_string()
                } else {
                    line
                }
            }
        }
    }
}

impl Incident {
    pub fn pretty(&self, color: bool) -> String {
        let sev = match self.severity {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        };
        let sev_colored = if color {
            match self.severity {
                Severity::Info => sev.normal().to_string(),
                Severity::Low => sev.blue().to_string(),
                Severity::Medium => sev.yellow().to_string(),
                Severity::High => sev.red().bold().to_string(),
            }
        } else {
            sev.to_string()
        };
        format!(
            "[{sev_colored}] {} from {} - {} ({})",
            self.attack_type, self.source, self.description, self.timestamp
        )
    }
}
