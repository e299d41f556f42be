// crates/datapilot-gateway/src/objectstore.rs
// ============================================================================
// Module: Gateway Object Store Backends
// Description: S3-compatible and local-directory object store backends.
// Purpose: Implement the core byte-stream interface with signed transfers.
// Dependencies: aws-config, aws-sdk-s3, async-trait, bytes, datapilot-core, tokio
// ============================================================================

//! ## Overview
//! Two durable backends for the core [`ObjectStore`] interface: an
//! S3-compatible client with presigned PUT/GET (endpoint configured without
//! a scheme; TLS selected by flag) and a local-directory backend for
//! single-node deployments. The local backend returns `file://` URLs in
//! place of presigned ones; clients on the same host read them directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use datapilot_core::ObjectBucket;
use datapilot_core::ObjectKey;
use datapilot_core::ObjectStore;
use datapilot_core::ObjectStoreError;
use datapilot_core::PresignedUrl;
use datapilot_config::ObjectStoreConfig;

// ============================================================================
// SECTION: S3 Backend
// ============================================================================

/// S3-compatible object store with signed PUT/GET.
#[derive(Clone)]
pub struct S3ObjectStore {
    /// S3 client.
    client: Client,
    /// Bucket for dataset version content.
    bucket_datasets: String,
    /// Bucket for artifact content.
    bucket_artifacts: String,
}

impl S3ObjectStore {
    /// Builds the client from the object-store configuration.
    ///
    /// Static credentials are used when configured; otherwise the ambient
    /// AWS environment (profile, IMDS) is loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the endpoint is missing.
    pub async fn from_config(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            ObjectStoreError::Backend("s3 backend requires an endpoint".to_string())
        })?;
        let scheme = if config.tls { "https" } else { "http" };
        let endpoint_url = format!("{scheme}://{endpoint}");
        let region = Region::new(config.region.clone().unwrap_or_else(|| "us-east-1".to_string()));

        let sdk_config =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(region)
            .endpoint_url(endpoint_url)
            .force_path_style(true);
        if let (Some(access_key), Some(secret_key)) =
            (config.access_key.as_deref(), config.secret_key.as_deref())
        {
            builder = builder.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "datapilot",
            ));
        }
        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket_datasets: config.bucket_datasets.clone(),
            bucket_artifacts: config.bucket_artifacts.clone(),
        })
    }

    /// Maps the logical bucket onto its configured name.
    fn bucket_name(&self, bucket: ObjectBucket) -> &str {
        match bucket {
            ObjectBucket::Datasets => &self.bucket_datasets,
            ObjectBucket::Artifacts => &self.bucket_artifacts,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        bytes: Bytes,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(self.bucket_name(bucket))
            .key(key.as_str())
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<Bytes, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(self.bucket_name(bucket))
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| ObjectStoreError::NotFound(format!("{key}: {err}")))?;
        let data = output
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        Ok(data.into_bytes())
    }

    async fn delete(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(self.bucket_name(bucket))
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(expires_in_seconds))
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        let presigned = self
            .client
            .put_object()
            .bucket(self.bucket_name(bucket))
            .key(key.as_str())
            .presigned(presigning)
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: "PUT".to_string(),
            expires_in_seconds,
        })
    }

    async fn presign_get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(expires_in_seconds))
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(self.bucket_name(bucket))
            .key(key.as_str())
            .presigned(presigning)
            .await
            .map_err(|err| ObjectStoreError::Backend(err.to_string()))?;
        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            method: "GET".to_string(),
            expires_in_seconds,
        })
    }
}

// ============================================================================
// SECTION: Local Directory Backend
// ============================================================================

/// Local-directory object store for single-node deployments and tests.
#[derive(Debug, Clone)]
pub struct LocalDirObjectStore {
    /// Root directory holding one subdirectory per bucket.
    root: PathBuf,
}

impl LocalDirObjectStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub const fn new(root: PathBuf) -> Self {
        Self {
            root,
        }
    }

    /// Resolves the on-disk path for a key, rejecting traversal.
    fn object_path(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<PathBuf, ObjectStoreError> {
        if key.as_str().split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(ObjectStoreError::Backend(format!("unsafe object key: {key}")));
        }
        Ok(self.root.join(bucket.as_str()).join(key.as_str()))
    }
}

#[async_trait]
impl ObjectStore for LocalDirObjectStore {
    async fn put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        bytes: Bytes,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| ObjectStoreError::Io(err.to_string()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| ObjectStoreError::Io(err.to_string()))
    }

    async fn get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(ObjectStoreError::Io(err.to_string())),
        }
    }

    async fn delete(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ObjectStoreError::Io(err.to_string())),
        }
    }

    async fn presign_put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        Ok(PresignedUrl {
            url: format!("file://{}", path.display()),
            method: "PUT".to_string(),
            expires_in_seconds,
        })
    }

    async fn presign_get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        Ok(PresignedUrl {
            url: format!("file://{}", path.display()),
            method: "GET".to_string(),
            expires_in_seconds,
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
