//! Ingestion endpoint trait: the downstream service records are handed to.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::record::Record;

/// What came back from delivering one record. Only ever logged.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub status: u16,

    /// Parsed response body; `None` if it was not JSON.
    pub body: Option<Value>,
}

#[async_trait]
pub trait IngestionEndpoint: Send + Sync {
    /// Check the endpoint can be used at all before a submission starts.
    async fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver a single record.
    async fn deliver(&self, record: &Record) -> Result<DeliveryReceipt>;
}
