//! Out-of-band delivery of password reset codes.
//!
//! The session layer only hands a code to a [`CodeDispatcher`]; actually
//! emailing it is somebody else's job. Delivery failures never undo the
//! stored code, the user can always ask for a resend.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

const MAX_DELIVERY_ATTEMPTS: u32 = 3;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Dispatch endpoint rejected delivery: {0}")]
    Rejected(String),
}

/// Hands a reset code to whatever delivers it to the account owner.
#[async_trait]
pub trait CodeDispatcher: Send + Sync {
    async fn dispatch(&self, email: &str, code: &str) -> Result<(), DispatchError>;
}

/// Discards codes. Used when no delivery channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl CodeDispatcher for NoopDispatcher {
    async fn dispatch(&self, email: &str, _code: &str) -> Result<(), DispatchError> {
        debug!(email = %email, "reset code dispatch disabled, dropping code");
        Ok(())
    }
}

/// Development only: writes the code to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl CodeDispatcher for LogDispatcher {
    async fn dispatch(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        warn!(email = %email, code, "password reset code (development dispatcher)");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    email: &'a str,
    code: &'a str,
}

/// POSTs `{ "email", "code" }` to an external mailer endpoint.
///
/// Delivery runs in a background task with retry (max 3 attempts,
/// exponential backoff); `dispatch` returns once the task is spawned.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn deliver(
        client: &Client,
        url: &str,
        email: &str,
        code: &str,
    ) -> Result<(), DispatchError> {
        let mut last_error = None;

        for attempt in 0..MAX_DELIVERY_ATTEMPTS {
            let result = client
                .post(url)
                .json(&WebhookPayload { email, code })
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_error = Some(DispatchError::Rejected(resp.status().to_string()));
                }
                Err(e) => last_error = Some(DispatchError::Request(e)),
            }

            if attempt + 1 < MAX_DELIVERY_ATTEMPTS {
                sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DispatchError::Rejected(format!("gave up after {MAX_DELIVERY_ATTEMPTS} attempts"))
        }))
    }
}

#[async_trait]
impl CodeDispatcher for WebhookDispatcher {
    async fn dispatch(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        let client = self.client.clone();
        let url = self.url.clone();
        let email = email.to_string();
        let code = code.to_string();
        tokio::spawn(async move {
            if let Err(e) = Self::deliver(&client, &url, &email, &code).await {
                warn!(email = %email, error = %e, "reset code delivery failed");
            }
        });
        Ok(())
    }
}

/// Keeps every dispatched `(email, code)` pair in memory. Lets tests and
/// embedders observe what would have been sent.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher that records and then reports failure.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent code sent to `email`.
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(e, _)| e == email)
            .map(|(_, code)| code)
    }
}

#[async_trait]
impl CodeDispatcher for RecordingDispatcher {
    async fn dispatch(&self, email: &str, code: &str) -> Result<(), DispatchError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((email.to_string(), code.to_string()));
        }
        if self.fail {
            return Err(DispatchError::Rejected("recording dispatcher set to fail".into()));
        }
        Ok(())
    }
}
