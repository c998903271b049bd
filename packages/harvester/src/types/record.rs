use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One extracted entry (a review, in the default source profile).
///
/// Only `id` and `text` matter to the orchestrator. Everything else the
/// extractor reports (title, rating, author, date, section...) rides along
/// in `fields` and is delivered to ingestion untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source identifier; `None` means the record cannot be deduplicated.
    pub id: Option<String>,

    pub text: String,

    #[serde(default, flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}
