//! In-memory collaborators for tests
//!
//! [`MemorySource`] and [`MemoryDestination`] implement the same traits as the
//! S3 and renterd adapters, with knobs for injecting failures, stalling calls
//! and counting what the pipeline did. Clones share state, so a test can keep
//! one handle for assertions and give another to the pipeline.
//!
//! ## Example
//!
//! ```
//! use renterd_mirror::testing::{MemoryDestination, MemorySource};
//!
//! let source = MemorySource::new("bucket");
//! source.insert("a.txt", b"hello".to_vec());
//!
//! let destination = MemoryDestination::new();
//! destination.fail_uploads("bucket/a.txt", 2);
//! assert_eq!(destination.upload_count(), 0);
//! ```

use crate::allowlist::{HostDirectory, HostFilter, HostInfo};
use crate::destination::{
    Destination, DestinationError, DestinationResult, HostAllowlist, ObjectInfo, UploadBody,
    UploadOptions,
};
use crate::source::{ListPage, ObjectSource, ReadStream, SourceError, SourceObjectRef, SourceResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Injected mid-stream read failure
#[derive(Debug, Clone, Copy)]
struct ReadFailure {
    after_bytes: usize,
    remaining: u32,
}

#[derive(Default)]
struct SourceState {
    objects: BTreeMap<String, Vec<u8>>,
    read_failures: HashMap<String, ReadFailure>,
    listed_sizes: HashMap<String, u64>,
    list_failure: Option<SourceError>,
}

/// Bucket held in memory, listed in key order
#[derive(Clone)]
pub struct MemorySource {
    bucket: String,
    page_size: usize,
    chunk_size: usize,
    state: Arc<Mutex<SourceState>>,
    list_calls: Arc<AtomicU64>,
    read_calls: Arc<AtomicU64>,
}

impl MemorySource {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: 1000,
            chunk_size: 64 * 1024,
            state: Arc::new(Mutex::new(SourceState::default())),
            list_calls: Arc::new(AtomicU64::new(0)),
            read_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Objects per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Bytes per chunk of a read stream
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        lock(&self.state).objects.insert(key.into(), data);
    }

    /// Make the next `times` reads of `key` fail after `after_bytes` bytes
    pub fn fail_reads_after(&self, key: impl Into<String>, after_bytes: usize, times: u32) {
        lock(&self.state).read_failures.insert(
            key.into(),
            ReadFailure {
                after_bytes,
                remaining: times,
            },
        );
    }

    /// List `key` with `size` regardless of its stored length
    pub fn set_listed_size(&self, key: impl Into<String>, size: u64) {
        lock(&self.state).listed_sizes.insert(key.into(), size);
    }

    /// Make every listing call fail
    pub fn fail_listing(&self, error: SourceError) {
        lock(&self.state).list_failure = Some(error);
    }

    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, continuation: Option<String>) -> SourceResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        if let Some(err) = &state.list_failure {
            return Err(err.clone());
        }

        let mut remaining = state
            .objects
            .iter()
            .filter(|(key, _)| continuation.as_deref().map_or(true, |after| key.as_str() > after));
        let objects: Vec<SourceObjectRef> = remaining
            .by_ref()
            .take(self.page_size)
            .map(|(key, data)| {
                let size = state
                    .listed_sizes
                    .get(key)
                    .copied()
                    .unwrap_or(data.len() as u64);
                SourceObjectRef::new(key.clone(), size)
            })
            .collect();

        let next = if remaining.next().is_some() {
            objects.last().map(|object| object.key.clone())
        } else {
            None
        };
        Ok(ListPage { objects, next })
    }

    async fn read(&self, key: &str) -> SourceResult<ReadStream> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let data = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })?;

        let failure = match state.read_failures.get_mut(key) {
            Some(failure) if failure.remaining > 0 => {
                failure.remaining -= 1;
                Some(failure.after_bytes)
            }
            _ => None,
        };

        let readable = failure.map_or(data.len(), |after| after.min(data.len()));
        let mut chunks: Vec<io::Result<Bytes>> = data[..readable]
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if failure.is_some() {
            chunks.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }

        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    size: u64,
    health: f64,
    has_data: bool,
}

#[derive(Default)]
struct DestinationState {
    objects: HashMap<String, StoredObject>,
    upload_failures: HashMap<String, u32>,
    lookup_failures: HashMap<String, DestinationError>,
    corrupt_downloads: HashSet<String>,
    stall_lookups: bool,
    upload_gate: Option<Arc<Semaphore>>,
    last_upload_options: Option<UploadOptions>,
    allowlist: Vec<String>,
    allowlist_updates: Vec<(Vec<String>, Vec<String>)>,
}

/// Destination held in memory
#[derive(Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
    lookups: Arc<AtomicU64>,
    uploads: Arc<AtomicU64>,
    downloads: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
    max_in_flight: Arc<AtomicU64>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fully healthy object
    pub fn insert(&self, path: impl Into<String>, data: Vec<u8>) {
        let size = data.len() as u64;
        lock(&self.state).objects.insert(
            path.into(),
            StoredObject {
                data,
                size,
                health: 100.0,
                has_data: true,
            },
        );
    }

    /// Store a record that reports `size` bytes but has no data
    pub fn insert_without_data(&self, path: impl Into<String>, size: u64) {
        lock(&self.state).objects.insert(
            path.into(),
            StoredObject {
                data: Vec::new(),
                size,
                health: 100.0,
                has_data: false,
            },
        );
    }

    /// Override the health (percent) of a stored object
    pub fn set_health(&self, path: &str, health: f64) {
        if let Some(object) = lock(&self.state).objects.get_mut(path) {
            object.health = health;
        }
    }

    /// Fail the next `times` uploads to `path` (after consuming the body)
    pub fn fail_uploads(&self, path: impl Into<String>, times: u32) {
        lock(&self.state).upload_failures.insert(path.into(), times);
    }

    /// Fail every lookup of `path` with `error`
    pub fn fail_lookups(&self, path: impl Into<String>, error: DestinationError) {
        lock(&self.state).lookup_failures.insert(path.into(), error);
    }

    /// Flip a byte in everything read back from `path`
    pub fn corrupt_downloads(&self, path: impl Into<String>) {
        lock(&self.state).corrupt_downloads.insert(path.into());
    }

    /// Make every lookup hang forever
    pub fn stall_lookups(&self) {
        lock(&self.state).stall_lookups = true;
    }

    /// Hold every upload until [`release_uploads`](Self::release_uploads)
    pub fn stall_uploads(&self) {
        lock(&self.state).upload_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_uploads(&self) {
        if let Some(gate) = lock(&self.state).upload_gate.take() {
            gate.close();
        }
    }

    /// Data stored at `path`, if any
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state)
            .objects
            .get(path)
            .filter(|object| object.has_data)
            .map(|object| object.data.clone())
    }

    pub fn object_count(&self) -> usize {
        lock(&self.state).objects.len()
    }

    pub fn last_upload_options(&self) -> Option<UploadOptions> {
        lock(&self.state).last_upload_options.clone()
    }

    /// Existence lookups made
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Upload calls started, including failed ones
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Uploads currently inside the destination
    pub fn uploads_in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous uploads seen
    pub fn max_uploads_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Set the current allow-list
    pub fn set_allowlist(&self, hosts: Vec<String>) {
        lock(&self.state).allowlist = hosts;
    }

    /// Every `(add, remove)` pushed so far
    pub fn allowlist_updates(&self) -> Vec<(Vec<String>, Vec<String>)> {
        lock(&self.state).allowlist_updates.clone()
    }

    async fn store(
        &self,
        path: &str,
        mut body: UploadBody,
        options: &UploadOptions,
    ) -> DestinationResult<()> {
        let gate = lock(&self.state).upload_gate.clone();
        if let Some(gate) = gate {
            // Closing the semaphore releases every waiter
            let _ = gate.acquire().await;
        }

        let mut data = Vec::new();
        body.read_to_end(&mut data)
            .await
            .map_err(|e| DestinationError::other("upload", e.to_string()))?;

        let mut state = lock(&self.state);
        state.last_upload_options = Some(options.clone());
        if let Some(remaining) = state.upload_failures.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DestinationError::other("upload", "502 Bad Gateway"));
            }
        }

        let size = data.len() as u64;
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data,
                size,
                health: 100.0,
                has_data: true,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn object(&self, path: &str) -> DestinationResult<ObjectInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let (stalled, result) = {
            let state = lock(&self.state);
            let result = if let Some(err) = state.lookup_failures.get(path) {
                Err(err.clone())
            } else {
                match state.objects.get(path) {
                    None => Err(DestinationError::NotFound {
                        path: path.to_string(),
                    }),
                    Some(object) if !object.has_data => Err(DestinationError::NoData {
                        path: path.to_string(),
                    }),
                    Some(object) => Ok(ObjectInfo {
                        size: object.size,
                        health: object.health,
                    }),
                }
            };
            (state.stall_lookups, result)
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn upload(
        &self,
        path: &str,
        body: UploadBody,
        options: &UploadOptions,
    ) -> DestinationResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self.store(path, body, options).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download(&self, path: &str) -> DestinationResult<ReadStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let state = lock(&self.state);
        let mut data = state
            .objects
            .get(path)
            .filter(|object| object.has_data)
            .map(|object| object.data.clone())
            .ok_or_else(|| DestinationError::NotFound {
                path: path.to_string(),
            })?;

        if state.corrupt_downloads.contains(path) {
            match data.first_mut() {
                Some(byte) => *byte ^= 0xff,
                None => data.push(0),
            }
        }

        let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from(data))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[async_trait]
impl HostAllowlist for MemoryDestination {
    async fn allowlist(&self) -> DestinationResult<Vec<String>> {
        Ok(lock(&self.state).allowlist.clone())
    }

    async fn update_allowlist(&self, add: &[String], remove: &[String]) -> DestinationResult<()> {
        let mut state = lock(&self.state);
        state
            .allowlist_updates
            .push((add.to_vec(), remove.to_vec()));
        state.allowlist.retain(|host| !remove.contains(host));
        for host in add {
            if !state.allowlist.contains(host) {
                state.allowlist.push(host.clone());
            }
        }
        Ok(())
    }
}

/// Host directory held in memory
#[derive(Clone, Default)]
pub struct MemoryHostDirectory {
    hosts: Arc<Mutex<Vec<HostInfo>>>,
}

impl MemoryHostDirectory {
    pub fn new(hosts: Vec<HostInfo>) -> Self {
        Self {
            hosts: Arc::new(Mutex::new(hosts)),
        }
    }

    pub fn set_hosts(&self, hosts: Vec<HostInfo>) {
        *lock(&self.hosts) = hosts;
    }
}

#[async_trait]
impl HostDirectory for MemoryHostDirectory {
    async fn qualifying_hosts(&self, filter: &HostFilter) -> DestinationResult<Vec<String>> {
        Ok(filter.apply(lock(&self.hosts).iter()))
    }
}
