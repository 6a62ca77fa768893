//! HTTP frontend
//!
//! Serves the operator pages and the machine-readable endpoints over the
//! current snapshot. Handlers clone the snapshot `Arc` and never hold the
//! lock while rendering.

pub mod graphdot;
pub mod pages;
pub mod routes;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::SpiderConfig;
use crate::diagnostics::Diagnostics;
use crate::snapshot::CurrentSnapshot;

/// URL prefix all mesh pages live under
pub const SERVE_PREFIX: &str = "/sks-peers";

/// Shared state for all handlers
pub struct ApiState {
    pub config: Arc<SpiderConfig>,
    pub snapshot: CurrentSnapshot,
    pub diagnostics: Diagnostics,
    pub scanning: Arc<AtomicBool>,
}

pub use routes::run_api_server;
