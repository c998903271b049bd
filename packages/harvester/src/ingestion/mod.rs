//! Hand-off of collected records to the downstream ingestion service.
//!
//! - `BatchSubmitter` - chunked, paced, best-effort delivery over any endpoint
//! - `HttpIngestionEndpoint` - JSON-over-HTTP endpoint (reqwest)

pub mod batch;
pub mod http;

pub use batch::{BatchSubmitter, SubmissionReport};
pub use http::HttpIngestionEndpoint;
