//! # trackq-nlu
//!
//! Language understanding for trackq: turns a free-text request into typed
//! slots, resolves mentioned names against directory snapshots, and composes
//! a tracker filter from an intent template.
//!
//! Everything here is synchronous and free of I/O apart from loading a
//! template corpus from disk.

pub mod normalize;
pub mod resolver;
pub mod slots;
pub mod templates;

pub use resolver::{Named, Resolution, ResolveTrace, Resolver};
pub use slots::{detect_record_key, ExtractionContext, SlotExtractor, SlotRule};
pub use templates::{
    compose, mask_query, referenced_slots, render_response, TemplateCorpus, TemplateMatch,
    TemplateMatcher,
};
