//! Blob storage for closed buffer files.
//!
//! [`BlobStore`] is the contract the handoff producer uploads through and the
//! consumer downloads from. [`ObjectBlobStore`] implements it on top of
//! `object_store`, so the same code runs against S3, GCS, Azure, the local
//! filesystem, or an in-memory store.

mod url_parser;

pub use url_parser::BackendConfig;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::gcp::{GoogleCloudStorageBuilder, GoogleConfigKey};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::BlobStoreConfig;
use crate::emit;
use crate::error::{
    AzureConfigSnafu, GcsConfigSnafu, IoSnafu, ObjectStoreSnafu, S3ConfigSnafu, StorageError,
};
use crate::metrics::events::{StorageOperation, StorageRequest};

/// Durable object storage addressed by slash-separated keys.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// Store `data` under `path`, replacing any existing blob.
    async fn upload(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// Fetch the blob at `path`. Fails with [`StorageError::NotFound`] if absent.
    async fn download(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Download the blob at `path` into a local file.
    async fn download_to(
        &self,
        path: &str,
        dst: &std::path::Path,
    ) -> Result<u64, StorageError> {
        let bytes = self.download(path).await?;
        tokio::fs::write(dst, &bytes).await.context(IoSnafu)?;
        Ok(bytes.len() as u64)
    }
}

/// A reference-counted blob store.
pub type BlobStoreRef = Arc<dyn BlobStore>;

/// [`BlobStore`] backed by an `object_store` implementation.
#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: Option<Path>,
    url: String,
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectBlobStore<{}>", self.url)
    }
}

impl ObjectBlobStore {
    /// Build a store from configuration, choosing the backend from the URL.
    pub async fn from_config(config: &BlobStoreConfig) -> Result<Self, StorageError> {
        Self::for_url_with_options(&config.url, &config.options).await
    }

    pub async fn for_url_with_options(
        url: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let backend = BackendConfig::parse_url(url)?;
        let prefix = backend.key().cloned();

        let store: Arc<dyn ObjectStore> = match backend {
            BackendConfig::Memory { .. } => Arc::new(InMemory::new()),
            BackendConfig::Local { path } => {
                tokio::fs::create_dir_all(&path).await.context(IoSnafu)?;
                Arc::new(LocalFileSystem::new_with_prefix(&path).context(ObjectStoreSnafu)?)
            }
            BackendConfig::S3 {
                bucket,
                region,
                endpoint,
                ..
            } => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&bucket)
                    .with_retry(RetryConfig::default());
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_allow_http(endpoint.starts_with("http://"))
                        .with_endpoint(endpoint);
                }
                for (key, value) in options {
                    match key.parse::<AmazonS3ConfigKey>() {
                        Ok(config_key) => builder = builder.with_config(config_key, value),
                        Err(_) => warn!(option = %key, "Ignoring unknown S3 option"),
                    }
                }
                Arc::new(builder.build().context(S3ConfigSnafu)?)
            }
            BackendConfig::Gcs { bucket, .. } => {
                let mut builder = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(&bucket)
                    .with_retry(RetryConfig::default());
                if let Ok(service_account_key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
                    debug!("Constructing GCS builder with service account key");
                    builder = builder.with_service_account_key(&service_account_key);
                }
                for (key, value) in options {
                    match key.parse::<GoogleConfigKey>() {
                        Ok(config_key) => builder = builder.with_config(config_key, value),
                        Err(_) => warn!(option = %key, "Ignoring unknown GCS option"),
                    }
                }
                Arc::new(builder.build().context(GcsConfigSnafu)?)
            }
            BackendConfig::Azure {
                account, container, ..
            } => {
                let mut builder = MicrosoftAzureBuilder::from_env()
                    .with_account(&account)
                    .with_container_name(&container)
                    .with_retry(RetryConfig::default());
                for (key, value) in options {
                    match key.parse::<AzureConfigKey>() {
                        Ok(config_key) => builder = builder.with_config(config_key, value),
                        Err(_) => warn!(option = %key, "Ignoring unknown Azure option"),
                    }
                }
                Arc::new(builder.build().context(AzureConfigSnafu)?)
            }
        };

        Ok(Self {
            store,
            prefix,
            url: url.to_string(),
        })
    }

    /// In-memory store, mostly for tests and single-process deployments.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            prefix: None,
            url: "memory://".to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn upload(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let location = Path::from(path);
        let location = self.qualify_path(&location);
        let start = Instant::now();

        let result = self.store.put(&location, PutPayload::from(data)).await;

        emit!(StorageRequest {
            operation: StorageOperation::Upload,
            success: result.is_ok(),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Bytes, StorageError> {
        let location = Path::from(path);
        let location = self.qualify_path(&location);
        let start = Instant::now();

        let result = match self.store.get(&location).await {
            Ok(get) => get.bytes().await,
            Err(e) => Err(e),
        };

        emit!(StorageRequest {
            operation: StorageOperation::Download,
            success: result.is_ok(),
            duration: start.elapsed(),
        });

        match result {
            Ok(bytes) => Ok(bytes),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound {
                    path: path.to_string(),
                })
            }
            Err(source) => Err(StorageError::ObjectStore { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_upload_download() {
        let store = ObjectBlobStore::memory();
        store
            .upload("acme/events/0001.ndjson", Bytes::from_static(b"{\"a\":1}\n"))
            .await
            .unwrap();

        let bytes = store.download("acme/events/0001.ndjson").await.unwrap();
        assert_eq!(&bytes[..], b"{\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let store = ObjectBlobStore::memory();
        let err = store.download("acme/events/missing.ndjson").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_local_store_with_prefix_dirs() {
        let dir = TempDir::new().unwrap();
        let url = dir.path().to_str().unwrap().to_string();
        let store = ObjectBlobStore::for_url_with_options(&url, &HashMap::new())
            .await
            .unwrap();

        store
            .upload("acme/events/0001.ndjson", Bytes::from_static(b"line\n"))
            .await
            .unwrap();

        assert!(dir.path().join("acme/events/0001.ndjson").exists());
        assert_eq!(
            &store.download("acme/events/0001.ndjson").await.unwrap()[..],
            b"line\n"
        );
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let store = ObjectBlobStore::memory();
        store.upload("k", Bytes::from_static(b"one")).await.unwrap();
        store.upload("k", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(&store.download("k").await.unwrap()[..], b"two");
    }

    #[tokio::test]
    async fn test_download_to_file() {
        let dir = TempDir::new().unwrap();
        let store = ObjectBlobStore::memory();
        store.upload("k", Bytes::from_static(b"abc")).await.unwrap();

        let dst = dir.path().join("k.ndjson");
        let written = store.download_to("k", &dst).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(std::fs::read(&dst).unwrap(), b"abc");
    }
}
