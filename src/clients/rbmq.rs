use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer,
    options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error>;
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(url: &str, queue_name: &str, prefetch_count: u16) -> Result<Self, Error> {
        debug!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        let client = Self {
            connection,
            channel,
            queue_name: queue_name.to_string(),
        };

        client.declare_queue().await?;

        info!(queue = %client.queue_name, prefetch_count, "RabbitMQ channel ready");

        Ok(client)
    }

    /// Declares the durable queue. Safe to repeat: an existing queue with the
    /// same arguments is left as is.
    pub async fn declare_queue(&self) -> Result<u32, Error> {
        let queue = self
            .channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", self.queue_name, e))?;

        Ok(queue.message_count())
    }

    /// Registers a consumer with manual acknowledgement.
    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer_tag = format!("email_worker-{}", Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.queue_name, consumer_tag = %consumer_tag, "Consumer registered");

        Ok(consumer)
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

#[async_trait]
impl Acknowledge for RabbitMqClient {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }
}
