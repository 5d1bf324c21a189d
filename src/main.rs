use std::sync::Arc;

use anyhow::{Error, Result};
use email_service::{
    api::run_api_server,
    clients::smtp::{EmailSender, SmtpMailer},
    config::Config,
    consumer::MessageConsumer,
    telemetry::init_tracing,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    init_tracing(config.log_format);

    info!("Starting email notification service");

    let sender: Arc<dyn EmailSender> = Arc::new(SmtpMailer::new(config.smtp_config()));

    let consumer = MessageConsumer::new(&config, Arc::clone(&sender));
    tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = %e, "Message consumer stopped; HTTP delivery remains available");
        }
    });

    run_api_server(&config, sender, shutdown_signal()).await?;

    info!("Email notification service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
