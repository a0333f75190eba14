use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    clients::mailer::SmtpConfig,
    models::{
        retry::{RetryConfig, RetryPolicy},
        topology::{ExchangeType, QueueTopology, Route},
    },
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "defaults::prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "defaults::worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "defaults::request_exchange")]
    pub request_exchange: String,
    #[serde(default = "defaults::request_queue")]
    pub request_queue: String,
    #[serde(default = "defaults::request_routing_key")]
    pub request_routing_key: String,

    #[serde(default = "defaults::status_exchange")]
    pub status_exchange: String,
    #[serde(default = "defaults::status_queue")]
    pub status_queue: String,
    #[serde(default = "defaults::status_routing_key")]
    pub status_routing_key: String,

    #[serde(default = "defaults::dead_letter_exchange")]
    pub dead_letter_exchange: String,
    #[serde(default = "defaults::dead_letter_queue")]
    pub dead_letter_queue: String,
    #[serde(default = "defaults::dead_letter_routing_key")]
    pub dead_letter_routing_key: String,

    #[serde(default = "defaults::message_ttl_ms")]
    pub message_ttl_ms: u32,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default = "defaults::max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "defaults::initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "defaults::max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "defaults::retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "defaults::monitor_interval_seconds")]
    pub monitor_interval_seconds: u64,
    #[serde(default = "defaults::dead_letter_inbox_capacity")]
    pub dead_letter_inbox_capacity: usize,

    pub redis_url: String,
    #[serde(default = "defaults::idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "defaults::processing_ttl_seconds")]
    pub processing_ttl_seconds: u64,

    #[serde(default = "defaults::template_dir")]
    pub template_dir: String,

    pub smtp_host: String,
    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,
    pub smtp_from_email: String,
    #[serde(default = "defaults::smtp_from_name")]
    pub smtp_from_name: String,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_use_tls: bool,

    pub admin_token: Option<String>,

    #[serde(default = "defaults::server_port")]
    pub server_port: u16,
    #[serde(default = "defaults::log_format")]
    pub log_format: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()
    }

    /// Builds a config from explicit `NAME=value` pairs instead of the process environment.
    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()
    }

    fn validate(self) -> Result<Self, Error> {
        if self.worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        if self.processing_ttl_seconds == 0 || self.idempotency_ttl_seconds == 0 {
            return Err(anyhow!("Idempotency TTLs must be at least 1 second"));
        }

        Ok(self)
    }

    pub fn topology(&self) -> QueueTopology {
        QueueTopology {
            request: Route::new(
                &self.request_exchange,
                ExchangeType::Topic,
                &self.request_queue,
                &self.request_routing_key,
            ),
            status: Route::new(
                &self.status_exchange,
                ExchangeType::Topic,
                &self.status_queue,
                &self.status_routing_key,
            ),
            dead_letter: Route::new(
                &self.dead_letter_exchange,
                ExchangeType::Direct,
                &self.dead_letter_queue,
                &self.dead_letter_routing_key,
            ),
            message_ttl_ms: self.message_ttl_ms,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            from_email: self.smtp_from_email.clone(),
            from_name: self.smtp_from_name.clone(),
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            use_tls: self.smtp_use_tls,
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

mod defaults {
    pub fn prefetch_count() -> u16 {
        10
    }

    pub fn worker_concurrency() -> usize {
        4
    }

    pub fn request_exchange() -> String {
        "email.exchange".to_string()
    }

    pub fn request_queue() -> String {
        "email.queue".to_string()
    }

    pub fn request_routing_key() -> String {
        "email.routing.key".to_string()
    }

    pub fn status_exchange() -> String {
        "email.notification.exchange".to_string()
    }

    pub fn status_queue() -> String {
        "email.notification.queue".to_string()
    }

    pub fn status_routing_key() -> String {
        "email.notification.routing.key".to_string()
    }

    pub fn dead_letter_exchange() -> String {
        "email.dlx".to_string()
    }

    pub fn dead_letter_queue() -> String {
        "email.dlq".to_string()
    }

    pub fn dead_letter_routing_key() -> String {
        "email.dead.letter.key".to_string()
    }

    pub fn message_ttl_ms() -> u32 {
        10_000
    }

    pub fn max_retries() -> u32 {
        3
    }

    pub fn max_retry_attempts() -> u32 {
        5
    }

    pub fn initial_retry_delay_ms() -> u64 {
        500
    }

    pub fn max_retry_delay_ms() -> u64 {
        10_000
    }

    pub fn retry_backoff_multiplier() -> u64 {
        2
    }

    pub fn monitor_interval_seconds() -> u64 {
        60
    }

    pub fn dead_letter_inbox_capacity() -> usize {
        100
    }

    pub fn idempotency_ttl_seconds() -> u64 {
        86_400
    }

    pub fn processing_ttl_seconds() -> u64 {
        60
    }

    pub fn template_dir() -> String {
        "templates".to_string()
    }

    pub fn smtp_port() -> u16 {
        25
    }

    pub fn smtp_from_name() -> String {
        "Notifications".to_string()
    }

    pub fn server_port() -> u16 {
        8080
    }

    pub fn log_format() -> String {
        "pretty".to_string()
    }
}
