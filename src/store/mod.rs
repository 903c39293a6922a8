//! Object storage: the only state the pipeline shares between invocations.
//!
//! Every collaborator here is opaque to the core. The contract is small on
//! purpose (`put`, `get` and `list_by_prefix`), and listing is assumed to be
//! eventually consistent at best, never linearizable.
//!
//! * [`memory::MemoryStore`]: process-local, used by tests and local runs
//! * [`fs::FsStore`]: one directory per container under a root

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors emitted by object storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for crate::error::PipelineError {
    fn from(e: StoreError) -> Self {
        crate::error::PipelineError::collaborator(crate::error::Collaborator::Storage, e)
    }
}

/// Trait abstracting over object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(&self, container: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch the object at `key` or [`StoreError::NotFound`].
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Keys in `container` starting with `prefix`, in lexicographic order.
    async fn list_by_prefix(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}
