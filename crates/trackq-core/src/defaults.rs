//! Centralized default constants for trackq.
//!
//! Every crate references these instead of defining its own magic numbers.

// =============================================================================
// EXTRACTION & RESOLUTION
// =============================================================================

/// Minimum similarity (0-100) for the approximate name tier.
pub const FUZZY_NAME_THRESHOLD: f64 = 80.0;

/// Score assigned to an exact name match.
pub const SCORE_EXACT: f64 = 100.0;

/// Score assigned to a substring/partial name match.
pub const SCORE_PARTIAL: f64 = 90.0;

/// Upper bound for approximate matches, kept below the partial tier.
pub const SCORE_FUZZY_MAX: f64 = 89.0;

/// Score assigned to a static alias hit.
pub const SCORE_ALIAS: f64 = 70.0;

/// Confidence for a slot taken from carried conversation context.
pub const CONTEXT_CONFIDENCE: f32 = 0.5;

/// Token-set similarity cutoff for fuzzy template matching.
pub const TEMPLATE_MATCH_CUTOFF: f64 = 0.88;

// =============================================================================
// EXECUTION
// =============================================================================

/// Records requested per page.
pub const PAGE_SIZE: u32 = 50;

/// Largest page size the tracker accepts.
pub const PAGE_SIZE_MAX: u32 = 100;

/// Cap on records fetched for one listing/analysis query.
pub const MAX_RECORDS: usize = 500;

/// Retries after the first attempt for transient failures.
pub const MAX_RETRIES: u32 = 3;

/// First backoff delay in milliseconds (doubles per retry).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Backoff delay ceiling in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 8_000;

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Result cache capacity (entries).
pub const RESULT_CACHE_SIZE: usize = 256;

/// Result cache time-to-live in seconds.
pub const RESULT_CACHE_TTL_SECS: u64 = 120;

// =============================================================================
// DIRECTORY
// =============================================================================

/// Directory snapshot time-to-live in seconds (30 minutes).
pub const DIRECTORY_TTL_SECS: u64 = 1_800;

/// Upper bound on users pulled into a directory snapshot.
pub const DIRECTORY_USER_LIMIT: usize = 1_000;

// =============================================================================
// AGGREGATION
// =============================================================================

/// Sample records included in a summary.
pub const SAMPLE_SIZE: usize = 5;

/// Days without update after which an open item is flagged stale.
pub const STALE_DAYS: i64 = 14;

/// Share of items held by one assignee that is flagged as outsized.
pub const CONCENTRATION_SHARE: f64 = 0.5;

/// Minimum record count before the concentration flag is considered.
pub const CONCENTRATION_MIN_RECORDS: usize = 5;

// =============================================================================
// TEXT GENERATION
// =============================================================================

/// Default OpenAI-compatible endpoint.
pub const LLM_URL: &str = "https://api.openai.com/v1";

/// Default generation model.
pub const LLM_MODEL: &str = "gpt-4o-mini";

/// Generation request timeout in seconds.
pub const LLM_TIMEOUT_SECS: u64 = 60;
