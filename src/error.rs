use thiserror::Error;

/// Errors surfaced by the model lifecycle and inference pipeline.
///
/// Per-item failures inside batch operations are collected into the batch
/// result rather than propagated; single-item calls return these directly.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model has no local artifact; the download path must run first.
    #[error("no local artifact for model '{0}'")]
    NotFound(String),

    /// Unload was attempted while the entry is still referenced.
    #[error("model '{0}' is in use and cannot be unloaded")]
    InUse(String),

    /// The cache budget cannot admit the entry because everything resident
    /// is pinned by active use.
    #[error("cache cannot admit {requested} bytes within a budget of {budget} bytes")]
    InsufficientCapacity { requested: u64, budget: u64 },

    /// The transport failed or reported an error mid-stream.
    #[error("download failed: {0}")]
    DownloadFailed(String),

    /// Checksum, size, or decode verification of an artifact failed.
    #[error("artifact verification failed for model '{0}'")]
    VerificationFailed(String),

    /// An artifact is present on disk but could not be materialized.
    #[error("failed to load model artifact: {0}")]
    LoadFailed(String),

    /// The backend rejected or aborted an inference call.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The operation was cancelled before it was dispatched.
    #[error("operation cancelled")]
    Cancelled,

    /// A batch precondition was violated (e.g. an empty input list).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
