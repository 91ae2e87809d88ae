//! # trackq-core
//!
//! Core types, traits, and configuration for trackq, the natural-language
//! query layer in front of a project-tracking REST API.
//!
//! This crate provides the data model shared by the extraction, client, and
//! engine crates, plus the traits the engine uses to reach external services.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ConfigError, TrackqConfig};
pub use error::{Error, ErrorKind, Result};
pub use models::*;
pub use traits::*;
