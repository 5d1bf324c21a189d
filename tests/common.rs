use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use email_service::{
    clients::{rbmq::Acknowledge, smtp::EmailSender},
    config::Config,
    models::{delivery::DeliveryOutcome, message::EmailRequest},
};
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::Notify};

/// Sender that records every email and answers with a fixed outcome.
pub struct RecordingSender {
    outcome: DeliveryOutcome,
    delivered: Mutex<Vec<EmailRequest>>,
    gate: Option<Arc<Notify>>,
    gated_recipient: Option<String>,
    finished: AtomicBool,
}

impl RecordingSender {
    pub fn new(outcome: DeliveryOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delivered: Mutex::new(Vec::new()),
            gate: None,
            gated_recipient: None,
            finished: AtomicBool::new(false),
        })
    }

    /// Blocks every delivery until the returned gate is notified.
    pub fn gated(outcome: DeliveryOutcome) -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let sender = Arc::new(Self {
            outcome,
            delivered: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
            gated_recipient: None,
            finished: AtomicBool::new(false),
        });
        (sender, gate)
    }

    /// Like [`RecordingSender::gated`], but only deliveries to `recipient` wait.
    pub fn gated_for(recipient: &str, outcome: DeliveryOutcome) -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let sender = Arc::new(Self {
            outcome,
            delivered: Mutex::new(Vec::new()),
            gate: Some(Arc::clone(&gate)),
            gated_recipient: Some(recipient.to_string()),
            finished: AtomicBool::new(false),
        });
        (sender, gate)
    }

    pub fn calls(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn delivered(&self) -> Vec<EmailRequest> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn deliver(&self, email: &EmailRequest) -> DeliveryOutcome {
        self.delivered.lock().unwrap().push(email.clone());

        let held = match &self.gated_recipient {
            Some(recipient) => *recipient == email.to_email.to_string(),
            None => true,
        };

        if let (Some(gate), true) = (&self.gate, held) {
            gate.notified().await;
        }

        self.finished.store(true, Ordering::SeqCst);
        self.outcome.clone()
    }
}

pub struct PanickingSender;

#[async_trait]
impl EmailSender for PanickingSender {
    async fn deliver(&self, _email: &EmailRequest) -> DeliveryOutcome {
        panic!("relay client exploded");
    }
}

/// Acknowledger that records delivery tags instead of talking to a broker.
#[derive(Default)]
pub struct CountingAcker {
    tags: Mutex<Vec<u64>>,
    fail: bool,
}

impl CountingAcker {
    pub fn failing() -> Self {
        Self {
            tags: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn tags(&self) -> Vec<u64> {
        self.tags.lock().unwrap().clone()
    }

    pub fn count_for(&self, delivery_tag: u64) -> usize {
        self.tags
            .lock()
            .unwrap()
            .iter()
            .filter(|tag| **tag == delivery_tag)
            .count()
    }
}

#[async_trait]
impl Acknowledge for CountingAcker {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<()> {
        self.tags.lock().unwrap().push(delivery_tag);

        if self.fail {
            return Err(anyhow!("channel closed"));
        }

        Ok(())
    }
}

pub fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
    Config::from_vars(
        vars.iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    )
}

pub fn event_payload(to_email: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "event_type": "order_created",
        "data": {
            "to_email": to_email,
            "subject": "Your order has been created",
            "body": "<h1>Hello!</h1><p>Thank you for your purchase.</p>",
            "payload": {
                "order_id": "12345",
                "customer_name": "User #1"
            }
        }
    }))
    .unwrap()
}

pub fn email_request(to_email: &str) -> EmailRequest {
    EmailRequest {
        to_email: to_email.parse().unwrap(),
        subject: "Test Subject".to_string(),
        body: "<h1>Test Body</h1>".to_string(),
        metadata: HashMap::new(),
    }
}

/// Listener that greets every client with a permanent failure and hangs up.
pub async fn spawn_rejecting_relay() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket
                .write_all(b"554 5.3.2 Service not available\r\n")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    Ok(port)
}

/// A port that nothing is listening on.
pub async fn closed_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    condition()
}
