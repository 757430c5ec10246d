//! S3/R2 backend using object_store for data I/O and aws-sdk-s3 for bucket
//! operations.

use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client as S3Client,
};
use object_store::{
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as ObjectPath,
};
use opentelemetry::metrics::Meter;
use tracing::{debug, info};

use crate::{
    metrics::{Operation, OperationTimer},
    BlobError,
    BlobMetrics,
    BlobResult,
    BodyStream,
    ObjectDestination,
    ObjectStorageClient,
    PutResult,
    S3StorageConfig,
    StreamingWriter,
};

/// Storage client for Cloudflare R2 or any other S3-compatible endpoint.
pub struct S3Storage {
    config: S3StorageConfig,

    /// AWS SDK client for bucket HEAD/CREATE.
    s3_client: S3Client,

    metrics: Option<BlobMetrics>,
}

impl S3Storage {
    /// Create a client from static credentials and the account endpoint.
    pub async fn new(config: S3StorageConfig) -> BlobResult<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            config.credentials.access_key_id.clone(),
            config.credentials.secret_access_key.clone(),
            None,
            None,
            "r2-stream-static",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint())
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        debug!(
            endpoint = %config.endpoint(),
            region = %config.region,
            "created S3 storage client"
        );

        Ok(Self {
            config,
            s3_client: S3Client::from_conf(s3_config),
            metrics: None,
        })
    }

    pub async fn new_with_metrics(config: S3StorageConfig, meter: &Meter) -> BlobResult<Self> {
        let mut storage = Self::new(config).await?;
        storage.metrics = Some(BlobMetrics::new(meter));
        Ok(storage)
    }

    pub fn config(&self) -> &S3StorageConfig {
        &self.config
    }

    /// object_store client scoped to one bucket.
    fn object_store(&self, bucket: &str) -> BlobResult<AmazonS3> {
        let endpoint = self.config.endpoint();
        AmazonS3Builder::new()
            .with_allow_http(endpoint.starts_with("http://"))
            .with_endpoint(endpoint)
            .with_region(self.config.region.clone())
            .with_bucket_name(bucket)
            .with_access_key_id(self.config.credentials.access_key_id.clone())
            .with_secret_access_key(self.config.credentials.secret_access_key.clone())
            .build()
            .map_err(|e| BlobError::InvalidConfig {
                reason: format!("failed to build S3 client for bucket {}: {}", bucket, e),
            })
    }

    fn timer(&self, op: Operation, bucket: &str) -> Option<OperationTimer> {
        self.metrics.as_ref().map(|m| m.start(op, bucket))
    }

    fn record_failure(&self, op: Operation, bucket: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(op, bucket);
        }
    }
}

fn network_error<E>(context: &str, err: E) -> BlobError
where
    E: std::error::Error,
{
    BlobError::NetworkError {
        source: anyhow::anyhow!("{}: {}", context, DisplayErrorContext(err)),
    }
}

#[async_trait]
impl ObjectStorageClient for S3Storage {
    async fn put_stream(
        &self,
        destination: &ObjectDestination,
        body: BodyStream,
        size_hint: Option<u64>,
    ) -> BlobResult<PutResult> {
        let object_store = self.object_store(&destination.bucket)?;
        debug!(
            destination = %destination,
            size_hint = ?size_hint,
            part_size = self.config.part_size,
            "starting streaming upload"
        );

        StreamingWriter::new(Arc::new(object_store), self.config.upload_options())
            .with_metrics(self.metrics.clone(), &destination.bucket)
            .put(
                &ObjectPath::from(destination.key.as_str()),
                format!("s3://{}", destination),
                body,
            )
            .await
    }

    async fn bucket_exists(&self, bucket: &str) -> BlobResult<bool> {
        let _timer = self.timer(Operation::HeadBucket, bucket);
        match self.s3_client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                    || err.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if not_found {
                    return Ok(false);
                }
                self.record_failure(Operation::HeadBucket, bucket);
                Err(network_error("head bucket failed", err))
            }
        }
    }

    async fn create_bucket(&self, bucket: &str) -> BlobResult<()> {
        let _timer = self.timer(Operation::CreateBucket, bucket);
        let mut request = self.s3_client.create_bucket().bucket(bucket);
        if let Some(hint) = &self.config.location_hint {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(hint.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %bucket, "bucket created");
                Ok(())
            }
            Err(err) => {
                let exists = err
                    .as_service_error()
                    .map(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists())
                    .unwrap_or(false);
                if exists {
                    return Err(BlobError::BucketAlreadyExists {
                        bucket: bucket.to_string(),
                    });
                }
                self.record_failure(Operation::CreateBucket, bucket);
                Err(network_error("create bucket failed", err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::R2Credentials;

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = S3StorageConfig::new(R2Credentials::new("", "", ""));
        assert!(matches!(
            S3Storage::new(config).await,
            Err(BlobError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_object_store_for_bucket() {
        let config = S3StorageConfig::new(R2Credentials::new("acct", "AKID", "SECRET"));
        let storage = S3Storage::new(config).await.unwrap();

        assert_eq!(
            storage.config().endpoint(),
            "https://acct.r2.cloudflarestorage.com"
        );
        assert!(storage.object_store("media").is_ok());
    }
}
