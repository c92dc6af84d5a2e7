//! renterd destination implementation
//!
//! Talks to the bus (`/objects`, `/hosts/allowlist`) and the worker
//! (`/objects`) HTTP APIs. Both use basic auth with an empty user name and the
//! API password.

use super::error::{DestinationError, DestinationResult};
use super::{Destination, HostAllowlist, ObjectInfo, UploadBody, UploadOptions};
use crate::config::DestinationConfig;
use crate::error::{MirrorError, Result};
use crate::source::ReadStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::io::ReaderStream;
use url::Url;

/// renterd reports an object without slabs only as message text
const NO_SLABS_MESSAGE: &str = "no slabs found";

/// HTTP client for a renterd node
#[derive(Clone)]
pub struct RenterdClient {
    http: reqwest::Client,
    bus: Url,
    bus_password: SecretString,
    worker: Url,
    worker_password: SecretString,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    #[serde(default)]
    object: Option<RenterdObject>,
}

#[derive(Debug, Deserialize)]
struct RenterdObject {
    #[serde(default)]
    size: u64,

    /// Fraction of redundancy remaining (1.0 = fully healthy); absent means healthy
    #[serde(default)]
    health: Option<f64>,

    #[serde(default)]
    slabs: Option<Vec<serde_json::Value>>,

    #[serde(default, rename = "partialSlabs")]
    partial_slabs: Option<Vec<serde_json::Value>>,
}

impl RenterdObject {
    fn has_data(&self) -> bool {
        let slabs = self.slabs.as_ref().map_or(0, Vec::len);
        let partial = self.partial_slabs.as_ref().map_or(0, Vec::len);
        self.size == 0 || slabs + partial > 0
    }

    fn health_percent(&self) -> f64 {
        self.health.unwrap_or(1.0) * 100.0
    }
}

#[derive(Debug, Serialize)]
struct AllowlistUpdate<'a> {
    add: &'a [String],
    remove: &'a [String],
    clear: bool,
}

impl RenterdClient {
    /// Create a client from the destination configuration
    pub fn new(config: &DestinationConfig) -> Result<Self> {
        let bus = Url::parse(&config.bus_address)
            .map_err(|e| MirrorError::Config(format!("invalid bus address: {}", e)))?;
        let worker = Url::parse(&config.worker_address)
            .map_err(|e| MirrorError::Config(format!("invalid worker address: {}", e)))?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| MirrorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            bus,
            bus_password: config.bus_password.clone(),
            worker,
            worker_password: config.worker_password.clone(),
        })
    }

    fn bus_object_url(&self, path: &str) -> DestinationResult<Url> {
        join_segments(&self.bus, std::iter::once("objects").chain(path.split('/')))
    }

    fn worker_object_url(&self, path: &str) -> DestinationResult<Url> {
        join_segments(&self.worker, std::iter::once("objects").chain(path.split('/')))
    }

    fn allowlist_url(&self) -> DestinationResult<Url> {
        join_segments(&self.bus, ["hosts", "allowlist"])
    }
}

/// Append path segments to a base URL, percent-encoding each one
fn join_segments<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> DestinationResult<Url> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            DestinationError::other("build url", format!("{} cannot be a base URL", base))
        })?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

/// Turn a non-success response into a destination error
async fn check_status(operation: &str, path: &str, response: Response) -> DestinationResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DestinationError::NotFound {
            path: path.to_string(),
        });
    }

    let text = response.text().await.unwrap_or_default();
    if text.contains(NO_SLABS_MESSAGE) {
        return Err(DestinationError::NoData {
            path: path.to_string(),
        });
    }
    Err(DestinationError::other(
        operation,
        format!("{}: {}", status, text.trim()),
    ))
}

fn request_error(operation: &str, err: reqwest::Error) -> DestinationError {
    DestinationError::other(operation, err.to_string())
}

#[async_trait]
impl Destination for RenterdClient {
    async fn object(&self, path: &str) -> DestinationResult<ObjectInfo> {
        let url = self.bus_object_url(path)?;
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(self.bus_password.expose_secret()))
            .send()
            .await
            .map_err(|e| request_error("object", e))?;
        let response = check_status("object", path, response).await?;

        let body: ObjectResponse = response
            .json()
            .await
            .map_err(|e| request_error("object", e))?;

        // A path that only names a directory has no object record
        let object = body.object.ok_or_else(|| DestinationError::NotFound {
            path: path.to_string(),
        })?;

        if !object.has_data() {
            return Err(DestinationError::NoData {
                path: path.to_string(),
            });
        }

        Ok(ObjectInfo {
            size: object.size,
            health: object.health_percent(),
        })
    }

    async fn upload(
        &self,
        path: &str,
        body: UploadBody,
        options: &UploadOptions,
    ) -> DestinationResult<()> {
        let mut url = self.worker_object_url(path)?;
        url.query_pairs_mut()
            .append_pair("contractset", &options.contract_set)
            .append_pair("minshards", &options.min_shards.to_string())
            .append_pair("totalshards", &options.total_shards.to_string());

        let response = self
            .http
            .put(url)
            .basic_auth("", Some(self.worker_password.expose_secret()))
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await
            .map_err(|e| request_error("upload", e))?;
        check_status("upload", path, response).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> DestinationResult<ReadStream> {
        let url = self.worker_object_url(path)?;
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(self.worker_password.expose_secret()))
            .send()
            .await
            .map_err(|e| request_error("download", e))?;
        let response = check_status("download", path, response).await?;

        Ok(Box::pin(response.bytes_stream().map_err(std::io::Error::other)))
    }
}

#[async_trait]
impl HostAllowlist for RenterdClient {
    async fn allowlist(&self) -> DestinationResult<Vec<String>> {
        let url = self.allowlist_url()?;
        let response = self
            .http
            .get(url)
            .basic_auth("", Some(self.bus_password.expose_secret()))
            .send()
            .await
            .map_err(|e| request_error("allowlist", e))?;
        let response = check_status("allowlist", "hosts/allowlist", response).await?;

        let entries: Option<Vec<String>> = response
            .json()
            .await
            .map_err(|e| request_error("allowlist", e))?;
        Ok(entries.unwrap_or_default())
    }

    async fn update_allowlist(&self, add: &[String], remove: &[String]) -> DestinationResult<()> {
        let url = self.allowlist_url()?;
        let response = self
            .http
            .put(url)
            .basic_auth("", Some(self.bus_password.expose_secret()))
            .json(&AllowlistUpdate {
                add,
                remove,
                clear: false,
            })
            .send()
            .await
            .map_err(|e| request_error("update allowlist", e))?;
        check_status("update allowlist", "hosts/allowlist", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_segments_encodes_each_segment() {
        let base = Url::parse("http://localhost:9980/api/bus").unwrap();
        let url = join_segments(&base, ["objects", "my bucket", "a?b#c.bin"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9980/api/bus/objects/my%20bucket/a%3Fb%23c.bin"
        );
    }

    #[test]
    fn test_join_segments_trailing_slash_base() {
        let base = Url::parse("http://localhost:9980/api/worker/").unwrap();
        let url = join_segments(&base, ["objects", "bucket", "key"]).unwrap();
        assert_eq!(url.path(), "/api/worker/objects/bucket/key");
    }

    #[test]
    fn test_object_without_slabs_has_no_data() {
        let object: RenterdObject =
            serde_json::from_str(r#"{"size": 10, "health": 1.0, "slabs": []}"#).unwrap();
        assert!(!object.has_data());

        let object: RenterdObject =
            serde_json::from_str(r#"{"size": 10, "health": 1.0, "slabs": [{}]}"#).unwrap();
        assert!(object.has_data());

        let object: RenterdObject =
            serde_json::from_str(r#"{"size": 0, "health": 1.0}"#).unwrap();
        assert!(object.has_data());
    }

    #[test]
    fn test_missing_health_counts_as_healthy() {
        let object: RenterdObject =
            serde_json::from_str(r#"{"size": 10, "slabs": [{}]}"#).unwrap();
        assert_eq!(object.health_percent(), 100.0);

        let object: RenterdObject =
            serde_json::from_str(r#"{"size": 10, "health": 0.2, "slabs": [{}]}"#).unwrap();
        assert!((object.health_percent() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_object_response_without_record() {
        let body: ObjectResponse = serde_json::from_str(r#"{"entries": []}"#).unwrap();
        assert!(body.object.is_none());
    }
}
