//! Completion notification with bounded exponential backoff.
//!
//! Delivery succeeds only on HTTP 200. Every other status and every transport
//! error counts as a failed attempt; the wait before the next attempt starts at
//! the configured initial delay and doubles each time (2s, 4s, 8s, ...).
//! Exhausting the attempts is a reported outcome, never an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::request::NotificationPayload;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
}

/// What the notification target answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one notification attempt.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResponse, NotifyError>;
}

/// JSON POST over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        payload: &NotificationPayload,
    ) -> Result<DeliveryResponse, NotifyError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(DeliveryResponse { status, body })
    }
}

pub struct Notifier {
    transport: Arc<dyn CallbackTransport>,
    initial_delay: Duration,
}

impl Notifier {
    pub fn new(transport: Arc<dyn CallbackTransport>, initial_delay: Duration) -> Self {
        Self {
            transport,
            initial_delay,
        }
    }

    /// Deliver `payload` to `url`, trying at most `max_attempts` times.
    ///
    /// An empty `url` returns `false` without any attempt.
    pub async fn notify(
        &self,
        url: &str,
        payload: &NotificationPayload,
        max_attempts: u32,
    ) -> bool {
        if url.is_empty() {
            warn!("No evaluation URL provided, skipping notification");
            return false;
        }

        let mut delay = self.initial_delay;
        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "Sending notification");
            match self.transport.post_json(url, payload).await {
                Ok(response) if response.status == 200 => {
                    info!(attempt, "Evaluation server notified");
                    return true;
                }
                Ok(response) => {
                    let body: String = response.body.chars().take(200).collect();
                    warn!(attempt, status = response.status, %body, "Notification rejected");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Notification attempt failed");
                }
            }

            if attempt < max_attempts {
                info!(delay_secs = delay.as_secs_f64(), "Waiting before retry");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        warn!(max_attempts, "Failed to notify evaluation server after all retries");
        false
    }
}
