//! The Platform Driver interface — component C6.
//!
//! An external capability the engine consumes but does not implement: the
//! workload orchestrator (a container scheduler, in the canonical
//! deployment). Mirrors the trait-as-seam idiom shipper uses for
//! `StorageBackend`: a thin trait here, a real backend plugged in by the
//! embedder, and a reference/test implementation alongside it.

use crate::error::Result;
use crate::types::{Action, EventDefinitions};

/// `Init(action, platformType, platformHost, namespace) → handle | error`.
/// The engine treats the returned handle as opaque and makes no
/// assumptions about retry or idempotence beyond the send loop in
/// [`crate::dataflow`].
pub trait Platform: Send + Sync {
    fn init(
        &self,
        action: &Action,
        platform_type: &str,
        platform_host: &str,
        namespace: &str,
    ) -> Result<Box<dyn Workload>>;
}

/// A running (or about-to-run) workload handle.
pub trait Workload: Send + Sync {
    /// Starts a workload that, during its lifetime, issues the
    /// `REGISTER_URL`/`TASK_RESULT`/etc. callbacks back into the engine.
    fn start(&self, run_id: &str, event_hooks: &EventDefinitions) -> Result<()>;

    fn stop(&self, run_id: &str) -> Result<()>;

    fn get_ip(&self, pod_name: &str) -> Result<String>;
}
