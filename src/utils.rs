use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    clients::smtp::EmailSender,
    models::{
        delivery::DeliveryOutcome,
        retry::ReconnectConfig,
        validation::{DecodeError, decode},
    },
};

/// Decodes one broker payload and hands the email to the sender.
pub async fn process_message(
    payload: &[u8],
    sender: &dyn EmailSender,
) -> Result<DeliveryOutcome, DecodeError> {
    let event = decode(payload)?;

    info!(
        event_type = %event.event_type,
        to_email = %event.email.to_email,
        "Processing notification event"
    );

    let outcome = sender.deliver(&event.email).await;

    if outcome.is_sent() {
        info!(event_type = %event.event_type, "Notification delivered");
    } else {
        warn!(
            event_type = %event.event_type,
            to_email = %event.email.to_email,
            outcome = %outcome,
            "Notification delivery failed"
        );
    }

    Ok(outcome)
}

/// Exponential reconnect schedule with a cap and +/-10% jitter. Unlike a
/// bounded retry it never gives up; callers reset it once a connection holds.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    delay_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay_ms = first_delay_ms(&config);

        Self {
            config,
            delay_ms,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let jitter = rand::random_range(-0.1..=0.1);
        let jittered_delay = ((self.delay_ms as f64 * (1.0 + jitter)) as u64).max(1);

        debug!(
            attempt = self.attempt,
            delay_ms = jittered_delay,
            "Backing off before reconnect"
        );

        self.delay_ms = std::cmp::min(
            self.delay_ms
                .saturating_mul(self.config.backoff_multiplier.max(1)),
            self.config.max_delay_ms.max(1),
        );

        Duration::from_millis(jittered_delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay_ms = first_delay_ms(&self.config);
    }
}

/// A zero delay would never grow, so the schedule starts at 1ms at least.
fn first_delay_ms(config: &ReconnectConfig) -> u64 {
    config.initial_delay_ms.min(config.max_delay_ms).max(1)
}
