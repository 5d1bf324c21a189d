//! Broker consumer for the email queue.
//!
//! The consumer owns the broker connection for the lifetime of the process and
//! moves through `Disconnected -> Connecting -> Subscribed`, dropping back to
//! `Disconnected` and reconnecting with backoff whenever the connection fails.
//! Only a missing or malformed broker URL puts it in the terminal `Failed`
//! state.
//!
//! Every delivery is handled on its own task and acknowledged exactly once,
//! whatever happens while processing it.

use std::{fmt::Display, panic::AssertUnwindSafe, sync::Arc};

use futures_util::{FutureExt, Stream, StreamExt};
use lapin::{Consumer, uri::AMQPUri};
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        rbmq::{Acknowledge, RabbitMqClient},
        smtp::EmailSender,
    },
    config::Config,
    models::{delivery::DeliveryOutcome, message::EMAIL_QUEUE_NAME, retry::ReconnectConfig},
    utils::{Backoff, process_message},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Failed,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("broker URL is not configured")]
    MissingBrokerUrl,

    #[error("broker URL is malformed: {0}")]
    InvalidBrokerUrl(String),
}

/// How a single delivery was settled. The message is acknowledged in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    DeliveryFailed(String),
    Malformed(String),
    Panicked,
}

pub struct MessageConsumer {
    broker_url: Option<String>,
    queue_name: String,
    prefetch_count: u16,
    reconnect_config: ReconnectConfig,
    sender: Arc<dyn EmailSender>,
    state: watch::Sender<ConsumerState>,
}

impl MessageConsumer {
    pub fn new(config: &Config, sender: Arc<dyn EmailSender>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);

        Self {
            broker_url: config.broker_url().map(str::to_string),
            queue_name: EMAIL_QUEUE_NAME.to_string(),
            prefetch_count: config.prefetch_count,
            reconnect_config: config.reconnect_config(),
            sender,
            state,
        }
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Runs until the configuration turns out to be unusable. Connection
    /// failures never end this loop.
    pub async fn run(self) -> Result<(), ConsumerError> {
        let url = match self.validate_broker_url() {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "Consumer cannot start");
                self.transition(ConsumerState::Failed);
                return Err(e);
            }
        };

        let mut backoff = Backoff::new(self.reconnect_config.clone());

        loop {
            self.transition(ConsumerState::Connecting);

            match self.subscribe(&url).await {
                Ok((client, consumer)) => {
                    backoff.reset();
                    self.transition(ConsumerState::Subscribed);
                    info!(queue = %self.queue_name, "Consumer connected and waiting for messages");

                    self.consume(client, consumer).await;

                    warn!(queue = %self.queue_name, "Lost connection to message broker");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt = backoff.attempt() + 1,
                        "Could not connect to the message broker"
                    );
                }
            }

            self.transition(ConsumerState::Disconnected);
            sleep(backoff.next_delay()).await;
        }
    }

    fn validate_broker_url(&self) -> Result<String, ConsumerError> {
        let url = self
            .broker_url
            .clone()
            .ok_or(ConsumerError::MissingBrokerUrl)?;

        url.parse::<AMQPUri>()
            .map_err(|e| ConsumerError::InvalidBrokerUrl(e.to_string()))?;

        Ok(url)
    }

    async fn subscribe(&self, url: &str) -> anyhow::Result<(Arc<RabbitMqClient>, Consumer)> {
        let client = RabbitMqClient::connect(url, &self.queue_name, self.prefetch_count).await?;
        let consumer = client.create_consumer().await?;

        Ok((Arc::new(client), consumer))
    }

    async fn consume(&self, client: Arc<RabbitMqClient>, consumer: Consumer) {
        let deliveries = consumer.map(|delivery| {
            delivery.map(|delivery| InboundMessage {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                payload: delivery.data,
            })
        });

        let acker: Arc<dyn Acknowledge> = client.clone();
        consume_deliveries(deliveries, Arc::clone(&self.sender), acker).await;

        if !client.is_connected() {
            debug!("Broker connection closed");
        }
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "Consumer state changed");
        }
    }
}

/// A delivery as handed over by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub payload: Vec<u8>,
}

/// Pulls deliveries until the stream errors or ends. Processing is spawned so
/// a slow send never holds up intake.
pub async fn consume_deliveries<S, E>(
    mut deliveries: S,
    sender: Arc<dyn EmailSender>,
    acker: Arc<dyn Acknowledge>,
) where
    S: Stream<Item = Result<InboundMessage, E>> + Unpin,
    E: Display,
{
    while let Some(delivery) = deliveries.next().await {
        let message = match delivery {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Delivery stream failed");
                return;
            }
        };

        debug!(
            delivery_tag = message.delivery_tag,
            redelivered = message.redelivered,
            "New message received"
        );

        let sender = Arc::clone(&sender);
        let acker = Arc::clone(&acker);

        tokio::spawn(async move {
            dispatch(
                message.delivery_tag,
                &message.payload,
                sender.as_ref(),
                acker.as_ref(),
            )
            .await;
        });
    }
}

/// Processes one delivery and acknowledges it. Decode errors, failed sends and
/// panics are all logged and acknowledged so a bad message is never redelivered
/// in a loop.
pub async fn dispatch(
    delivery_tag: u64,
    payload: &[u8],
    sender: &dyn EmailSender,
    acker: &dyn Acknowledge,
) -> Disposition {
    let disposition = match AssertUnwindSafe(process_message(payload, sender))
        .catch_unwind()
        .await
    {
        Ok(Ok(DeliveryOutcome::Sent)) => Disposition::Delivered,
        Ok(Ok(DeliveryOutcome::Failed(reason))) => Disposition::DeliveryFailed(reason),
        Ok(Err(e)) => {
            error!(delivery_tag, error = %e, "Failed to decode message, discarding");
            Disposition::Malformed(e.to_string())
        }
        Err(_) => {
            error!(delivery_tag, "Message processing panicked, discarding");
            Disposition::Panicked
        }
    };

    match acker.acknowledge(delivery_tag).await {
        Ok(()) => debug!(delivery_tag, disposition = ?disposition, "Message acknowledged"),
        Err(e) => error!(delivery_tag, error = %e, "Failed to acknowledge message"),
    }

    disposition
}
