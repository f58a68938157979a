use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signature block carried by every inbound webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignature {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(rename = "body-plain", default)]
    pub body_plain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub event: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub sender: String,
    pub message: InboundMessage,
}

/// The full inbound webhook envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    pub signature: WebhookSignature,
    #[serde(rename = "event-data")]
    pub event_data: EventData,
}

/// The loosely-structured email the parser consumes. Built from a webhook
/// envelope or assembled directly on the admin dispatch path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailEnvelope {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body_plain: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

impl EmailEnvelope {
    pub fn from_webhook(envelope: &WebhookEnvelope) -> Self {
        let message = &envelope.event_data.message;
        let header = |name: &str| {
            message
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        Self {
            sender: header("from").unwrap_or_else(|| envelope.event_data.sender.clone()),
            recipient: envelope.event_data.recipient.clone(),
            subject: header("subject").unwrap_or_default(),
            body_plain: message.body_plain.clone(),
            headers: message.headers.clone(),
            timestamp: Some(envelope.signature.timestamp.clone()),
            attachments: Vec::new(),
        }
    }
}

/// `{action, parameters}` request on the internal dispatch surface.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub action: DispatchAction,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    ParseEmail,
    DispatchTask,
    AnalyzeEmail,
    ComposeDraft,
    SearchEmails,
    IngestEmail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ComponentHealth,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthReport {
    pub fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = if components
            .values()
            .all(|c| *c == ComponentHealth::Healthy)
        {
            ComponentHealth::Healthy
        } else {
            ComponentHealth::Degraded
        };
        Self { status, components }
    }
}
