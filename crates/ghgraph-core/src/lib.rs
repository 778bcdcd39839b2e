//! Core types, event decoding, and shared utilities for the ghgraph pipeline.
//!
//! This crate provides:
//! - [`Interaction`] records and the [`InteractionType`] edge vocabulary
//! - Decoding of raw archive events into interactions
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod interaction;
pub mod metrics;

/// Public archive the original event shards are published under.
pub const DEFAULT_ARCHIVE_URL: &str = "https://opensourcecontributo.rs/archive/events";

pub use error::{Error, Result};
pub use event::{decode_event, repo_id, repo_owner};
pub use interaction::{
    Interaction, InteractionType, OWNERSHIP_VERBS, REPO_LABEL, USER_LABEL, VerbPair,
};
