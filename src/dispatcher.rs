use async_trait::async_trait;
use std::time::Duration;

use crate::errors::{Result, WorkerError};
use crate::types::Alert;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery capability for alert payloads. Implementations must be safe for
/// concurrent use across camera workers.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: Alert) -> Result<()>;
}

/// Posts alerts as JSON to the backend REST endpoint.
pub struct HttpAlertDispatcher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAlertDispatcher {
    pub fn new(base_url: &str, endpoint: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: join_endpoint(base_url, endpoint),
        }
    }
}

fn join_endpoint(base_url: &str, endpoint: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), endpoint)
}

#[async_trait]
impl AlertDispatcher for HttpAlertDispatcher {
    async fn dispatch(&self, alert: Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&alert)
            .send()
            .await
            .map_err(|e| WorkerError::alert_dispatch(format!("send alert: {e}")))?;

        let status = response.status();
        if status.as_u16() >= 300 {
            return Err(WorkerError::alert_dispatch(format!("unexpected status: {status}")));
        }
        Ok(())
    }
}
