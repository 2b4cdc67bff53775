use crate::config::StorageConfig;
use crate::util::split_filename;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Object store client for uploaded file storage
pub struct ObjectStore {
    client: S3Client,
    bucket: String,
    config: StorageConfig,
}

impl ObjectStore {
    /// Create a new object store client
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "catalog-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder =
            S3ConfigBuilder::from(&aws_config).endpoint_url(config.endpoint_url());

        // Path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            endpoint = %config.endpoint_url(),
            bucket = %config.bucket,
            "Object store client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Create the default bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        let exists = match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    false
                } else {
                    return Err(e).context("Failed to check bucket existence");
                }
            }
        };

        if exists {
            debug!(bucket = %self.bucket, "Bucket already exists");
        } else {
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .context("Failed to create bucket")?;
            info!(bucket = %self.bucket, "Bucket created");
        }

        Ok(())
    }

    /// Check if an object exists
    pub async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    /// Find an unused object key for a filename under the given prefix.
    #[instrument(skip(self))]
    pub async fn resolve_object_key(&self, prefix: &str, filename: &str) -> Result<String> {
        let key = resolve_key(prefix, filename, |candidate| async move {
            self.object_exists(&candidate).await
        })
        .await?;

        if key != format!("{}{}", prefix, filename) {
            debug!(key = %key, "Resolved object key collision");
        }

        Ok(key)
    }

    /// Upload an object body under the given key
    #[instrument(skip(self, data), fields(key = %key, size_bytes = data.len()))]
    pub async fn put_object(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        if data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, content_type, data).await?;
        } else {
            self.simple_upload(key, content_type, data).await?;
        }

        info!(key = %key, "Object uploaded");
        Ok(())
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object")?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let mut completed_parts = Vec::new();
        let part_size = self.config.part_size_bytes;
        let mut part_number = 1;

        for chunk in data.chunks(part_size) {
            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            let completed_part = aws_sdk_s3::types::CompletedPart::builder()
                .part_number(part_number)
                .e_tag(upload_part_response.e_tag().unwrap_or_default())
                .build();

            completed_parts.push(completed_part);
            part_number += 1;
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    /// Fetch an object for streaming. Returns `None` when the key does not
    /// exist (catalog row without backing data).
    #[instrument(skip(self))]
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<GetObjectOutput>> {
        match self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(e).context("Failed to fetch object")
                }
            }
        }
    }

    /// Generate a presigned GET URL for an object
    pub async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<(String, DateTime<Utc>)> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        let expires_at =
            Utc::now() + chrono::Duration::from_std(expires_in).context("Invalid expiry")?;

        Ok((presigned.uri().to_string(), expires_at))
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Probe candidate keys until one is free. On collision a counter is
/// inserted before the extension: `run.mat`, `run(1).mat`, `run(2).mat`, ...
async fn resolve_key<F, Fut>(prefix: &str, filename: &str, exists: F) -> Result<String>
where
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let mut candidate = format!("{}{}", prefix, filename);
    let mut counter = 0u32;

    while exists(candidate.clone()).await? {
        counter += 1;
        candidate = format!("{}{}", prefix, numbered_filename(filename, counter));
    }

    Ok(candidate)
}

/// Insert a collision counter before the filename extension
fn numbered_filename(filename: &str, counter: u32) -> String {
    let (base, ext) = split_filename(filename);
    format!("{}({}){}", base, counter, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_filename() {
        assert_eq!(numbered_filename("run.mat", 1), "run(1).mat");
        assert_eq!(numbered_filename("run.mat", 12), "run(12).mat");
        assert_eq!(numbered_filename("notes", 2), "notes(2)");
        assert_eq!(numbered_filename("a.b.c", 1), "a.b(1).c");
    }

    #[tokio::test]
    async fn test_resolve_key_keeps_free_key() {
        let key = resolve_key("PROJ-042/", "run.mat", |_| async { Ok(false) })
            .await
            .unwrap();
        assert_eq!(key, "PROJ-042/run.mat");
    }

    #[tokio::test]
    async fn test_resolve_key_counts_past_taken_keys() {
        let taken: std::collections::HashSet<String> =
            ["PROJ-042/run.mat", "PROJ-042/run(1).mat"]
                .iter()
                .map(|s| s.to_string())
                .collect();

        let key = resolve_key("PROJ-042/", "run.mat", |candidate| {
            let exists = taken.contains(&candidate);
            async move { Ok(exists) }
        })
        .await
        .unwrap();

        assert_eq!(key, "PROJ-042/run(2).mat");
    }

    #[tokio::test]
    async fn test_resolve_key_propagates_probe_error() {
        let result = resolve_key("p/", "run.mat", |_| async {
            Err(anyhow::anyhow!("head failed"))
        })
        .await;
        assert!(result.is_err());
    }
}
