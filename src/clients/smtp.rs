use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{error, info, warn};

use crate::models::{
    delivery::{CONFIGURATION_INCOMPLETE, DeliveryOutcome},
    message::EmailRequest,
};

/// Anything able to deliver a validated email. Implementations report
/// failures through [`DeliveryOutcome`] and never return an error.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn deliver(&self, email: &EmailRequest) -> DeliveryOutcome;
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: Option<String>,
    pub timeout_seconds: u64,
}

impl SmtpConfig {
    pub fn is_complete(&self) -> bool {
        self.host.is_some()
            && self.username.is_some()
            && self.password.is_some()
            && self.sender.is_some()
    }
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        if config.is_complete() {
            info!(
                host = config.host.as_deref().unwrap_or_default(),
                port = config.port,
                "SMTP mailer initialized"
            );
        } else {
            warn!("SMTP configuration incomplete, emails will not be sent");
        }

        Self { config }
    }

    async fn send(&self, email: &EmailRequest) -> Result<(), Error> {
        let (Some(host), Some(username), Some(password), Some(sender)) = (
            &self.config.host,
            &self.config.username,
            &self.config.password,
            &self.config.sender,
        ) else {
            return Err(anyhow!(CONFIGURATION_INCOMPLETE));
        };

        let from = sender
            .parse::<Mailbox>()
            .map_err(|e| anyhow!("Invalid sender address: {}", e))?;

        let message = Message::builder()
            .from(from)
            .to(Mailbox::new(None, email.to_email.clone()))
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.body.clone())
            .map_err(|e| anyhow!("Failed to build message: {}", e))?;

        // Built per call and dropped on return, so the relay connection never
        // outlives this send.
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow!("Invalid relay host: {}", e))?
            .port(self.config.port)
            .credentials(Credentials::new(username.clone(), password.clone()))
            .timeout(Some(Duration::from_secs(self.config.timeout_seconds)))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| anyhow!("SMTP send failed: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    async fn deliver(&self, email: &EmailRequest) -> DeliveryOutcome {
        if !self.config.is_complete() {
            error!(
                to_email = %email.to_email,
                "SMTP configuration incomplete. Email will not be sent"
            );
            return DeliveryOutcome::failed(CONFIGURATION_INCOMPLETE);
        }

        info!(to_email = %email.to_email, "Trying to send email");

        match self.send(email).await {
            Ok(()) => {
                info!(to_email = %email.to_email, "Email successfully sent");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                error!(to_email = %email.to_email, error = %e, "Failed to send email");
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }
}
