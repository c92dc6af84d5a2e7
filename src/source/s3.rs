//! S3 source implementation

use super::error::{SourceError, SourceResult};
use super::{ListPage, ObjectSource, ReadStream, SourceObjectRef};
use crate::config::SourceConfig;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as AwsS3Client;
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// Source bucket backed by AWS S3 or an S3-compatible service
#[derive(Clone)]
pub struct S3Source {
    client: AwsS3Client,
    bucket: String,
}

impl S3Source {
    /// Build an S3 client from the source configuration
    ///
    /// Public buckets are read with anonymous credentials unless
    /// `anonymous` is turned off, in which case the default AWS credential
    /// chain (environment, profile, instance metadata) is used.
    pub async fn new(config: &SourceConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(
            RegionProviderChain::first_try(Region::new(config.region.clone()))
                .or_default_provider(),
        );

        if config.anonymous {
            loader = loader.no_credentials();
        }

        let aws_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&aws_config);

        // Custom endpoint for S3-compatible services (MinIO, R2, ...)
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build();
        builder = builder.timeout_config(timeout_config);

        Self {
            client: AwsS3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectSource for S3Source {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, continuation: Option<String>) -> SourceResult<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| SourceError::other("list_objects_v2", DisplayErrorContext(&e).to_string()))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = object.size().unwrap_or(0).max(0) as u64;
                Some(SourceObjectRef::new(key, size))
            })
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { objects, next })
    }

    async fn read(&self, key: &str) -> SourceResult<ReadStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    SourceError::NotFound {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    }
                } else {
                    SourceError::other("get_object", DisplayErrorContext(&e).to_string())
                }
            })?;

        let reader = output.body.into_async_read();
        Ok(Box::pin(ReaderStream::new(reader)))
    }
}
