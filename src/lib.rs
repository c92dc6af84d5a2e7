/*!
 * renterd-mirror - copy an S3 bucket into a renterd storage network
 *
 * Lists every object in a source bucket, skips the ones already stored (and
 * healthy) at the destination, and streams the rest through a bounded pool of
 * upload workers:
 * - Streaming SHA-256 of every upload, with optional read-back verification
 * - Fixed or exponential-with-jitter retry backoff per object
 * - Bounded work queue so memory stays flat regardless of bucket size
 * - Throttled progress reporting with redundancy-aware byte counts
 * - Optional host allow-list reconciliation
 */

pub mod allowlist;
pub mod config;
pub mod destination;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod size;
pub mod source;
pub mod testing;

// Re-export commonly used types
pub use config::{FailurePolicy, MirrorConfig};
pub use destination::{Destination, RenterdClient};
pub use error::{MirrorError, Result};
pub use pipeline::{destination_path, Mirror, MirrorReport};
pub use source::{ObjectSource, S3Source};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
