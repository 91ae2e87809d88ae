//! Core traits for trackq's external collaborators.
//!
//! The engine only talks to the tracker and the text generator through
//! these traits, so HTTP clients and in-memory doubles are interchangeable.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// TRACKER
// =============================================================================

/// Project-tracking search API.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Fetch one page of records matching `request.filter`.
    async fn search(&self, endpoint: SearchEndpoint, request: &SearchRequest)
        -> Result<SearchPage>;

    /// Cardinality-only search: no record bodies are transferred.
    async fn count(&self, endpoint: SearchEndpoint, filter: &str) -> Result<u64>;

    /// Fetch a single record by key. `Ok(None)` when it does not exist.
    async fn get_record(&self, key: &str) -> Result<Option<Record>>;

    /// Free-text person directory search.
    async fn search_users(&self, query: &str) -> Result<Vec<DirectoryUser>>;

    /// All visible projects.
    async fn list_projects(&self) -> Result<Vec<ProjectInfo>>;

    /// Field metadata (custom field discovery).
    async fn list_fields(&self) -> Result<Vec<FieldMeta>>;
}

// =============================================================================
// TEXT GENERATION
// =============================================================================

/// Optional LLM used to polish deterministic prose.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Model name, for logging.
    fn model_name(&self) -> &str;
}
