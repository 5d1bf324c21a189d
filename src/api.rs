use std::{future::Future, sync::Arc};

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::smtp::EmailSender,
    config::Config,
    models::{
        delivery::DeliveryOutcome,
        health::HealthResponse,
        message::{EmailRequest, EmailRequestBody},
        response::ApiResponse,
    },
};

pub const ACCEPTED_MESSAGE: &str = "Email request accepted, processing in background.";

pub struct AppState {
    sender: Arc<dyn EmailSender>,
}

pub fn router(sender: Arc<dyn EmailSender>) -> Router {
    let state = Arc::new(AppState { sender });

    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/send-email", post(send_email))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<F>(
    config: &Config,
    sender: Arc<dyn EmailSender>,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, router(sender))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::ok()))
}

async fn send_email(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EmailRequestBody>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            return (
                status,
                Json(ApiResponse::error(
                    rejection.body_text(),
                    "Invalid email request".to_string(),
                )),
            )
                .into_response();
        }
    };

    let email = match EmailRequest::try_from(body) {
        Ok(email) => email,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::error(
                    e.to_string(),
                    "Invalid email request".to_string(),
                )),
            )
                .into_response();
        }
    };

    let sender = Arc::clone(&state.sender);

    tokio::spawn(async move {
        if let DeliveryOutcome::Failed(reason) = sender.deliver(&email).await {
            warn!(to_email = %email.to_email, reason = %reason, "Background email delivery failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::accepted(ACCEPTED_MESSAGE.to_string())),
    )
        .into_response()
}
