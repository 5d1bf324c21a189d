use std::collections::HashMap;

use lettre::Address;
use serde::{Deserialize, Serialize};

/// Fixed, well-known queue the consumer subscribes to.
pub const EMAIL_QUEUE_NAME: &str = "notifications-email-queue";

/// Email fields as they arrive on the wire, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequestBody {
    pub to_email: String,
    pub subject: String,
    pub body: String,

    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

/// Broker envelope as it arrives on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub event_type: String,
    pub data: EmailRequestBody,
}

/// A validated request to send one email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailRequest {
    pub to_email: Address,
    pub subject: String,
    /// HTML content.
    pub body: String,
    /// Carried through untouched, never transmitted.
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub event_type: String,
    pub email: EmailRequest,
}
