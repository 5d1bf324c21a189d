use lettre::Address;
use thiserror::Error;

use crate::models::message::{
    EmailRequest, EmailRequestBody, NotificationEnvelope, NotificationEvent,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid recipient address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("subject must not be empty")]
    EmptySubject,
}

/// Parses a raw broker payload into a fully validated event.
pub fn decode(raw: &[u8]) -> Result<NotificationEvent, DecodeError> {
    let envelope: NotificationEnvelope = serde_json::from_slice(raw)?;

    Ok(NotificationEvent {
        event_type: envelope.event_type,
        email: EmailRequest::try_from(envelope.data)?,
    })
}

/// Accepts `user@host.tld`, optionally wrapped as `Name <user@host.tld>`.
/// The domain must be a dotted hostname; IP literals are refused.
pub fn validate_email_address(address: &str) -> Result<Address, DecodeError> {
    let invalid = |reason: String| DecodeError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let parsed = unwrap_display_name(address.trim())
        .parse::<Address>()
        .map_err(|e| invalid(e.to_string()))?;

    let domain = parsed.domain();

    if domain.starts_with('[') {
        return Err(invalid("IP address domains are not accepted".to_string()));
    }

    if !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return Err(invalid(
            "domain must be a hostname with at least one dot".to_string(),
        ));
    }

    Ok(parsed)
}

fn unwrap_display_name(address: &str) -> &str {
    match (address.rfind('<'), address.strip_suffix('>')) {
        (Some(start), Some(inner)) => inner[start + 1..].trim(),
        _ => address,
    }
}

impl TryFrom<EmailRequestBody> for EmailRequest {
    type Error = DecodeError;

    fn try_from(body: EmailRequestBody) -> Result<Self, Self::Error> {
        let to_email = validate_email_address(&body.to_email)?;

        if body.subject.is_empty() {
            return Err(DecodeError::EmptySubject);
        }

        Ok(Self {
            to_email,
            subject: body.subject,
            body: body.body,
            metadata: body.payload,
        })
    }
}
