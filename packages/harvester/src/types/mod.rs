//! Data types for extraction jobs.

pub mod job;
pub mod page;
pub mod record;
