//! GPU admission scheduler extender.
//!
//! Reconstructs per-node GPU usage from pod annotations on every admission
//! request, runs a namespace quota filter followed by a device filter, and
//! writes placement annotations back onto the accepted pod. There is no
//! cross-request persistence: the pod annotation layer is the ledger.

pub mod allocator;
pub mod api;
pub mod cluster;
pub mod config;
pub mod device;
pub mod node_view;
pub mod pipeline;
pub mod quota;
pub mod types;

pub use device::Device;
pub use node_view::NodeView;
pub use pipeline::FilterPipeline;
pub use quota::{QuotaRecord, QuotaStore};

/// Crate version, surfaced over the `/version` route.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the admission pipeline and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Device-level reservation would exceed a core or memory ceiling.
    #[error("overcommit: {0}")]
    Overcommit(String),

    /// No device (or device combination) on the node satisfies the request.
    #[error("unschedulable: {0}")]
    Unschedulable(String),

    /// Quota store has never completed a successful sync.
    #[error("quota store not yet synced, retry later")]
    NotSynced,

    /// Annotation patch exhausted its retry budget.
    #[error("patch failed after retries: {0}")]
    PatchFailed(String),

    /// Request body could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Cluster client (list/get/patch) failure.
    #[error("cluster client error: {0}")]
    Cluster(String),

    /// I/O error, typically reading the quota config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(String),
}
