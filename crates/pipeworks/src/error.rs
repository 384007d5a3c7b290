//! Shared error taxonomy for the pipeline engine.
//!
//! Each component returns `Result<T, PipelineError>` internally; callers at
//! the top level (the CLI, an HTTP handler) are expected to wrap these in
//! `anyhow::Result` with added context, the same layering `shipper-cli` uses
//! over `shipper`'s typed errors.

use thiserror::Error;

/// The error taxonomy of the pipeline engine, one variant per component.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Trigger authentication failed. Carries no payload: the request is
    /// rejected with no side effects.
    #[error("trigger authentication failed")]
    Authentication,

    /// Pipeline definition compiler structural error.
    #[error("definition error: {0}")]
    Definition(String),

    /// Run snapshot failure.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Platform driver `Init` failure. Persisted verbatim as an Outcome's
    /// `result` message.
    #[error("init error: {0}")]
    PlatformInit(String),

    /// Platform driver `Start` failure. Persisted verbatim as an Outcome's
    /// `result` message.
    #[error("start error: {0}")]
    PlatformStart(String),

    /// Data-flow merge error.
    #[error("data merge error: {0}")]
    DataMerge(String),

    /// A failure surfaced by the `Store` trait's backend. The backend itself
    /// is out of scope; this variant is the seam through which its
    /// errors are reported.
    #[error("store error: {0}")]
    Store(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
