use crate::config::AlertConfig;
use crate::schema::Incident;
use crate::sinks::{DeliveryError, IncidentSink};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// High-priority alert channel: posts each incident to a configured
/// webhook endpoint. The transport behind the endpoint (mail gateway,
/// pager, chat bridge) is somebody else's problem.
///
/// Unconfigured is a supported state, not an error: the miss is logged
/// once at startup and every subsequent delivery is a silent skip.
pub struct WebhookAlertSink {
    endpoint: Option<Endpoint>,
    client: Client,
}

struct Endpoint {
    url: String,
    auth_token: Option<String>,
    recipient: Option<String>,
}

impl WebhookAlertSink {
    pub fn from_config(config: Option<&AlertConfig>) -> Self {
        match config {
            Some(cfg) => {
                info!("[alert] webhook alerts enabled: {}", cfg.webhook_url);
                let client = Client::builder()
                    .timeout(Duration::from_secs(cfg.timeout_secs))
                    .build()
                    .unwrap_or_default();
                Self {
                    endpoint: Some(Endpoint {
                        url: cfg.webhook_url.clone(),
                        auth_token: cfg.auth_token.clone(),
                        recipient: cfg.recipient.clone(),
                    }),
                    client,
                }
            }
            None => {
                warn!("[alert] webhook not configured - alert delivery disabled");
                Self {
                    endpoint: None,
                    client: Client::new(),
                }
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Validates the configured endpoint without sending incident content.
    pub async fn test_connection(&self) -> Result<()> {
        let Some(endpoint) = &self.endpoint else {
            bail!("alert webhook not configured");
        };
        let payload = json!({
            "event": "connection_test",
            "device": "ABB Turbocharger Control Unit (TPL-77K)",
        });
        let response = self
            .request(endpoint, &payload)
            .send()
            .await
            .context("failed to reach alert webhook")?;
        if !response.status().is_success() {
            bail!("alert webhook test returned {}", response.status());
        }
        info!("[alert] webhook connection test succeeded");
        Ok(())
    }

    fn request(&self, endpoint: &Endpoint, payload: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut request = self.client.post(&endpoint.url).json(payload);
        if let Some(token) = &endpoint.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn post_incident(
        &self,
        endpoint: &Endpoint,
        incident: &Incident,
    ) -> Result<(), DeliveryError> {
        let payload = json!({
            "subject": format!(
                "CRITICAL: Industrial System Attack Detected - {}",
                incident.attack_type
            ),
            "priority": "high",
            "recipient": endpoint.recipient,
            "body": incident.alert_body(),
            "incident": incident,
        });

        let response = match self.request(endpoint, &payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Err(DeliveryError::Transient(e.to_string()));
            }
            Err(e) => return Err(DeliveryError::Permanent(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            debug!("[alert] delivered incident {} ({status})", incident.id);
            return Ok(());
        }
        let detail = format!("webhook returned {status}");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(DeliveryError::Transient(detail))
        } else {
            Err(DeliveryError::Permanent(detail))
        }
    }
}

#[async_trait]
impl IncidentSink for WebhookAlertSink {
    fn name(&self) -> &'static str {
        "alert-webhook"
    }

    async fn deliver(&self, incident: &Incident) -> Result<(), DeliveryError> {
        match &self.endpoint {
            Some(endpoint) => self.post_incident(endpoint, incident).await,
            None => {
                debug!("[alert] skipped incident {} (unconfigured)", incident.id);
                Ok(())
            }
        }
    }
}
