//! Artifact downloads: transport seam, local store, and the coordinator
//! that streams, verifies, and atomically installs model bytes.

mod coordinator;
mod store;
mod transport;

pub use coordinator::{
    BatchDownloadResult, DownloadCoordinator, DownloadStatus, DownloadTask, ProgressFn,
};
pub use store::ArtifactStore;
pub use transport::{BlobTransport, ByteStream, FetchResponse, HttpTransport};
