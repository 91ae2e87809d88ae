//! # trackq-client
//!
//! Clients for trackq's external services:
//!
//! - `HttpTrackerClient`: the tracker REST API over reqwest, one client for
//!   every search endpoint on the ladder
//! - `OpenAiGenerator`: OpenAI-compatible chat completions, used only to
//!   polish narrated answers
//! - `Directory`: TTL-cached user/project/field snapshots
//!
//! Enable the `mock` feature for in-memory doubles of both traits.

pub mod directory;
pub mod error;
pub mod llm;
pub mod tracker;
pub mod types;

#[cfg(feature = "mock")]
pub mod mock;

pub use directory::{Directory, DirectoryCache, DirectorySnapshot};
pub use error::TrackerErrorCode;
pub use llm::OpenAiGenerator;
pub use tracker::{strip_order_by, HttpTrackerClient};
pub use types::FieldIds;
