//! Collaborator seams for the job controller.
//!
//! The controller only ever talks to the outside world through these traits,
//! so every collaborator can be swapped for a mock in tests.

pub mod extractor;
pub mod ingestion;
pub mod notifier;
pub mod store;
pub mod surface;
