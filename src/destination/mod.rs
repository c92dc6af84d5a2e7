//! Destination storage network abstraction
//!
//! The destination is a renterd node: a *bus* holding object metadata and the
//! host allow-list, and a *worker* that erasure-codes uploads across hosts.
//! The mirror talks to it through two narrow traits:
//!
//! - [`Destination`]: object lookup, streaming ingest, and streaming read-back
//! - [`HostAllowlist`]: the bus-side list of hosts uploads may use
//!
//! [`RenterdClient`] implements both over HTTP.

mod error;
mod renterd;

pub use error::{DestinationError, DestinationResult};
pub use renterd::RenterdClient;

use crate::source::ReadStream;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Streaming upload body handed to the destination
pub type UploadBody = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata the destination reports for a stored object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    /// Logical size in bytes
    pub size: u64,

    /// Redundancy margin as a percentage (100.0 = every shard healthy)
    pub health: f64,
}

/// Settings passed through to the destination's ingest call
///
/// The mirror does not interpret these; they are handed to the destination as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Contract set the upload is restricted to
    pub contract_set: String,

    /// Shards needed to reconstruct the object
    pub min_shards: u32,

    /// Shards actually stored
    pub total_shards: u32,
}

/// Object-level access to the destination
#[async_trait]
pub trait Destination: Send + Sync {
    /// Look up an object's metadata
    ///
    /// # Errors
    ///
    /// Returns `DestinationError::NotFound` if no record exists and
    /// `DestinationError::NoData` if a record exists without data.
    async fn object(&self, path: &str) -> DestinationResult<ObjectInfo>;

    /// Consume `body` fully and store it durably at `path`
    async fn upload(
        &self,
        path: &str,
        body: UploadBody,
        options: &UploadOptions,
    ) -> DestinationResult<()>;

    /// Stream a stored object back (used to verify uploads)
    async fn download(&self, path: &str) -> DestinationResult<ReadStream>;
}

/// Bus-side allow-list of storage hosts
#[async_trait]
pub trait HostAllowlist: Send + Sync {
    /// Current allow-list entries (host public keys)
    async fn allowlist(&self) -> DestinationResult<Vec<String>>;

    /// Add and remove entries in one update
    async fn update_allowlist(&self, add: &[String], remove: &[String])
        -> DestinationResult<()>;
}
