//! Single-attempt object transfer
//!
//! One call streams one object from the source into the destination: the
//! source body is read exactly once, hashed with SHA-256 on the way through,
//! and handed to the destination's ingest call as a buffered reader. Retrying
//! is the caller's business.

use crate::destination::{Destination, DestinationError, UploadOptions};
use crate::source::{ObjectSource, SourceError, SourceObjectRef};
use futures::StreamExt;
use pin_project::pin_project;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncRead, BufReader, ReadBuf};
use tokio_util::io::StreamReader;
use tracing::debug;

/// SHA-256 digest of an object's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Digest of `data`
    pub fn of(data: &[u8]) -> Self {
        Checksum(Sha256::digest(data).into())
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Why one transfer attempt failed
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source refused to open the object
    #[error("failed to get object {key}: {source}")]
    Source {
        key: String,
        #[source]
        source: SourceError,
    },

    /// The source stream broke while the upload was consuming it
    #[error("failed to read object {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The destination rejected or aborted the upload
    #[error("failed to upload {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: DestinationError,
    },

    /// The bytes streamed do not match the listed size
    #[error("size mismatch for {key}: listed {expected} bytes, read {actual}")]
    SizeMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The uploaded object could not be read back
    #[error("failed to verify {path}: {source}")]
    Verify {
        path: String,
        #[source]
        source: DestinationError,
    },

    /// The object read back does not hash to what was uploaded
    #[error("checksum mismatch for {path}: uploaded {expected}, stored {actual}")]
    ChecksumMismatch {
        path: String,
        expected: Checksum,
        actual: Checksum,
    },
}

impl TransferError {
    /// Whether another attempt could succeed
    ///
    /// A size mismatch means the object changed after it was listed; re-reading
    /// it yields the same bytes, so it is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransferError::SizeMismatch { .. })
    }
}

/// Outcome of one transfer attempt
pub type TransferResult = Result<Checksum, TransferError>;

/// What the hashing reader saw of the source stream
#[derive(Default)]
struct HashState {
    hasher: Sha256,
    bytes: u64,
    read_error: Option<(io::ErrorKind, String)>,
}

/// Pass-through reader that hashes and counts everything read through it
#[pin_project]
struct HashingReader<R> {
    #[pin]
    inner: R,
    state: Arc<Mutex<HashState>>,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> (Self, Arc<Mutex<HashState>>) {
        let state = Arc::new(Mutex::new(HashState::default()));
        (
            Self {
                inner,
                state: Arc::clone(&state),
            },
            state,
        )
    }
}

impl<R: AsyncRead> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = &buf.filled()[before..];
                let mut state = this.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.hasher.update(read);
                state.bytes += read.len() as u64;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => {
                let mut state = this.state.lock().unwrap_or_else(PoisonError::into_inner);
                state.read_error = Some((err.kind(), err.to_string()));
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Moves one object from the source to the destination per call
pub struct ObjectTransferer {
    source: Arc<dyn ObjectSource>,
    destination: Arc<dyn Destination>,
    options: UploadOptions,
    read_buffer_size: usize,
    verify: bool,
}

impl ObjectTransferer {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        destination: Arc<dyn Destination>,
        options: UploadOptions,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            source,
            destination,
            options,
            read_buffer_size: read_buffer_size.max(1),
            verify: false,
        }
    }

    /// Read every upload back and compare digests
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Stream `object` to `path`, returning the digest of the bytes uploaded
    pub async fn transfer(&self, object: &SourceObjectRef, path: &str) -> TransferResult {
        let stream = self
            .source
            .read(&object.key)
            .await
            .map_err(|source| TransferError::Source {
                key: object.key.clone(),
                source,
            })?;

        let (reader, state) = HashingReader::new(StreamReader::new(stream));
        let body = BufReader::with_capacity(self.read_buffer_size, reader);

        let uploaded = self
            .destination
            .upload(path, Box::new(body), &self.options)
            .await;

        let (checksum, bytes, read_error) = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            let hasher = std::mem::take(&mut state.hasher);
            (Checksum(hasher.finalize().into()), state.bytes, state.read_error.take())
        };

        // A broken source stream surfaces as an upload error; report the cause
        if let Some((kind, message)) = read_error {
            return Err(TransferError::Read {
                key: object.key.clone(),
                source: io::Error::new(kind, message),
            });
        }
        uploaded.map_err(|source| TransferError::Upload {
            path: path.to_string(),
            source,
        })?;

        if bytes != object.size {
            return Err(TransferError::SizeMismatch {
                key: object.key.clone(),
                expected: object.size,
                actual: bytes,
            });
        }

        if self.verify {
            self.verify_upload(path, checksum).await?;
        }

        Ok(checksum)
    }

    async fn verify_upload(&self, path: &str, expected: Checksum) -> Result<(), TransferError> {
        let verify_error = |source| TransferError::Verify {
            path: path.to_string(),
            source,
        };

        let mut stream = self.destination.download(path).await.map_err(verify_error)?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| verify_error(DestinationError::other("download", e.to_string())))?;
            hasher.update(&chunk);
        }

        let actual = Checksum(hasher.finalize().into());
        if actual != expected {
            return Err(TransferError::ChecksumMismatch {
                path: path.to_string(),
                expected,
                actual,
            });
        }

        debug!(path, checksum = %actual, "upload verified");
        Ok(())
    }
}
