use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::smtp::SmtpConfig, models::retry::ReconnectConfig, telemetry::LogFormat,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: Option<String>,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub smtp_server: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub sender_email: Option<String>,
    #[serde(default = "default_smtp_timeout_seconds")]
    pub smtp_timeout_seconds: u64,

    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_backoff_multiplier")]
    pub reconnect_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout_seconds() -> u64 {
    30
}

fn default_reconnect_initial_delay_ms() -> u64 {
    500
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Builds the configuration from an explicit set of variables instead of
    /// the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid environmental variable: {}", e))
    }

    pub fn broker_url(&self) -> Option<&str> {
        non_empty(&self.rabbitmq_url)
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: non_empty(&self.smtp_server).map(str::to_string),
            port: self.smtp_port,
            username: non_empty(&self.smtp_user).map(str::to_string),
            password: non_empty(&self.smtp_password).map(str::to_string),
            sender: non_empty(&self.sender_email).map(str::to_string),
            timeout_seconds: self.smtp_timeout_seconds,
        }
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: self.reconnect_initial_delay_ms,
            max_delay_ms: self.reconnect_max_delay_ms,
            backoff_multiplier: self.reconnect_backoff_multiplier,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
