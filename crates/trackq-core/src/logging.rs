//! Structured logging conventions for trackq.
//!
//! Instrumented entry points carry `subsystem`, `component` and `op` fields
//! so log queries can filter on the same keys across crates. The values
//! live here; the keys are written inline because `tracing` field names
//! must be identifiers.
//!
//! Other recurring keys: `filter`, `endpoint`, `status`, `attempt`,
//! `mention`, `entity`, `template_id`, `intent`, `error`.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Request failed after every fallback, or upstream rejected it |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, completed queries |
//! | DEBUG | Decision points (template chosen, tier hit, endpoint used) |
//! | TRACE | Per-rule and per-record detail |

/// Values of the `subsystem` field.
pub mod subsystem {
    pub const CLIENT: &str = "client";
    pub const ENGINE: &str = "engine";
}

/// Values of the `component` field.
pub mod component {
    pub const TRACKER: &str = "tracker";
    pub const EXECUTION: &str = "execution";
    pub const SERVICE: &str = "service";
}
