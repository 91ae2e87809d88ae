//! # trackq-engine
//!
//! Turns a composed filter into an answer:
//! - Retries with exponential backoff and a hard attempt ceiling
//! - A fallback chain over search endpoints and widened filters
//! - Pagination with a record cap, memoized in an LRU cache with a TTL
//! - Validation of returned records against the resolved entities
//! - Aggregation into breakdowns, story points, and risk flags
//! - Deterministic narration with explicit fallback disclosure
//!
//! `QueryService` wires the language layer and the tracker client into one
//! `process` call; `SessionManager` serializes it per user.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trackq_engine::{QueryService, SessionManager};
//!
//! let service = Arc::new(QueryService::new(tracker, &config, corpus));
//! let sessions = SessionManager::new(service);
//! let answer = sessions.ask("dana", "open bugs in OPS", &cancel).await;
//! println!("{}", answer.response_text);
//! ```

pub mod aggregate;
pub mod cache;
pub mod chain;
pub mod execution;
pub mod narrator;
pub mod retry;
pub mod service;
pub mod session;
pub mod validate;

pub use aggregate::{aggregate, AggregateOptions};
pub use cache::{cache_key, ResultCache};
pub use chain::{ChainOutcome, EndpointMemory, FallbackChain};
pub use execution::{ExecutionEngine, ExecutionOutcome};
pub use narrator::{disclosure_text, display_filter, NarrationInput, Narrator};
pub use retry::{retry_with_backoff, Retried, RetryPolicy};
pub use service::QueryService;
pub use session::{SessionManager, TranscriptEntry};
pub use validate::{validate, ValidationReport};
