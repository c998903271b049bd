//! HTTP ingestion endpoint.
//!
//! POSTs each record as `{"text": ..., "metadata": <record>}`. The response
//! body is parsed only so it can be logged.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{HarvestError, Result};
use crate::traits::ingestion::{DeliveryReceipt, IngestionEndpoint};
use crate::types::record::Record;

/// Ingestion endpoint reached over HTTP.
///
/// # Example
///
/// ```rust,ignore
/// use harvester::ingestion::HttpIngestionEndpoint;
///
/// let endpoint = HttpIngestionEndpoint::new("http://localhost:3000/api/analyze/");
/// endpoint.deliver(&record).await?;
/// ```
pub struct HttpIngestionEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpIngestionEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: url.into(),
        }
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl IngestionEndpoint for HttpIngestionEndpoint {
    async fn preflight(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| {
                HarvestError::Delivery(format!("invalid ingestion URL {}: {}", self.url, e))
            })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(HarvestError::Delivery(format!(
                "unsupported ingestion URL scheme: {}",
                url.scheme()
            )));
        }
        Ok(())
    }

    async fn deliver(&self, record: &Record) -> Result<DeliveryReceipt> {
        let payload = json!({
            "text": record.text,
            "metadata": record,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HarvestError::Delivery(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| HarvestError::Delivery(e.to_string()))?;

        if !status.is_success() {
            return Err(HarvestError::Delivery(format!("HTTP {}", status)));
        }

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => {
                debug!(record_id = ?record.id, response = %body, "Ingestion response");
                Some(body)
            }
            Err(e) => {
                warn!(record_id = ?record.id, error = %e, "Ingestion response was not JSON");
                None
            }
        };

        Ok(DeliveryReceipt {
            status: status.as_u16(),
            body,
        })
    }
}
