//! Source bucket abstraction
//!
//! The mirror only needs two things from the bucket it copies: a paginated
//! listing of `(key, size)` pairs and a streaming read of one object. Both are
//! expressed by the [`ObjectSource`] trait so the pipeline can run against S3
//! in production and an in-memory bucket in tests.
//!
//! # Example
//!
//! ```no_run
//! use renterd_mirror::source::{ObjectSource, S3Source};
//! use renterd_mirror::config::SourceConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SourceConfig {
//!         bucket: "my-bucket".to_string(),
//!         ..Default::default()
//!     };
//!     let source = S3Source::new(&config).await;
//!
//!     let page = source.list_page(None).await?;
//!     for object in &page.objects {
//!         println!("{}: {} bytes", object.key, object.size);
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod s3;

pub use error::{SourceError, SourceResult};
pub use s3::S3Source;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Async read stream for object data
pub type ReadStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// One object in the source bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObjectRef {
    /// Object key within the bucket
    pub key: String,

    /// Size in bytes as reported by the listing
    pub size: u64,
}

impl SourceObjectRef {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in listing order
    pub objects: Vec<SourceObjectRef>,

    /// Opaque cursor for the next page (`None` = last page)
    pub next: Option<String>,
}

/// Read access to the bucket being mirrored
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Name of the bucket, used to derive destination paths
    fn bucket(&self) -> &str;

    /// Fetch one page of the listing
    ///
    /// `continuation` is `None` for the first page and the previous page's
    /// `next` cursor afterwards.
    async fn list_page(&self, continuation: Option<String>) -> SourceResult<ListPage>;

    /// Open a streaming read of one object
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotFound` if the key no longer exists.
    async fn read(&self, key: &str) -> SourceResult<ReadStream>;
}
