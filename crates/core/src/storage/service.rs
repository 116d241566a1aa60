//! Storage service implementation using Apache OpenDAL.

use std::future::Future;

use bytes::Bytes;
use opendal::{Operator, services};

use super::error::StorageError;
use postvault_shared::StorageProvider;

/// Headers stored alongside an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// MIME type served as `Content-Type`.
    pub content_type: String,
    /// `Content-Disposition` value, e.g. `attachment;filename=report.pdf`.
    pub content_disposition: String,
    /// Optional `Cache-Control` value.
    pub cache_control: Option<String>,
}

/// Key/value blob store consumed by the attachment lifecycle.
///
/// Implemented by [`StorageService`]; tests substitute stores that fail on
/// demand.
pub trait ObjectStore: Send + Sync {
    /// Whether a backend is configured. An unconfigured store turns every
    /// deletion into a no-op.
    fn is_configured(&self) -> bool;

    /// Write an object with its headers.
    fn put(
        &self,
        key: &str,
        content: Bytes,
        metadata: &ObjectMetadata,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Delete one object. Deleting a missing object succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Delete a batch of objects in one store call.
    fn delete_many(&self, keys: &[String])
    -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Storage service for attachment objects.
pub struct StorageService {
    operator: Option<Operator>,
    provider_name: &'static str,
}

impl StorageService {
    /// Create a new storage service for a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage provider cannot be initialized.
    pub fn from_provider(provider: &StorageProvider) -> Result<Self, StorageError> {
        let operator = Self::create_operator(provider)?;
        Ok(Self {
            operator: Some(operator),
            provider_name: provider.name(),
        })
    }

    /// A service with no backend. Writes fail with
    /// [`StorageError::NotConfigured`] and callers skip deletions.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            operator: None,
            provider_name: "none",
        }
    }

    /// Create OpenDAL operator from provider config.
    fn create_operator(provider: &StorageProvider) -> Result<Operator, StorageError> {
        let operator = match provider {
            StorageProvider::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
            } => {
                let builder = services::S3::default()
                    .endpoint(endpoint)
                    .bucket(bucket)
                    .access_key_id(access_key_id)
                    .secret_access_key(secret_access_key)
                    .region(region);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::AzureBlob {
                account,
                access_key,
                container,
            } => {
                let builder = services::Azblob::default()
                    .account_name(account)
                    .account_key(access_key)
                    .container(container);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::LocalFs { root } => {
                let builder = services::Fs::default().root(
                    root.to_str()
                        .ok_or_else(|| StorageError::configuration("invalid path"))?,
                );

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::Memory => Operator::new(services::Memory::default())
                .map_err(|e| StorageError::configuration(e.to_string()))?
                .finish(),
        };

        Ok(operator)
    }

    fn operator(&self) -> Result<&Operator, StorageError> {
        self.operator.as_ref().ok_or(StorageError::NotConfigured)
    }

    /// Check if an object exists in storage.
    pub async fn exists(&self, key: &str) -> bool {
        let Ok(operator) = self.operator() else {
            return false;
        };
        operator.stat(key).await.is_ok()
    }

    /// Get the storage provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }
}

impl ObjectStore for StorageService {
    fn is_configured(&self) -> bool {
        self.operator.is_some()
    }

    async fn put(
        &self,
        key: &str,
        content: Bytes,
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        let operator = self.operator()?;

        // Backends reject write options they cannot honour, so only pass the
        // headers the provider supports.
        let capability = operator.info().full_capability();
        let mut write = operator.write_with(key, content);
        if capability.write_with_content_type {
            write = write.content_type(&metadata.content_type);
        }
        if capability.write_with_content_disposition {
            write = write.content_disposition(&metadata.content_disposition);
        }
        if let Some(cache_control) = &metadata.cache_control {
            if capability.write_with_cache_control {
                write = write.cache_control(cache_control);
            }
        }

        write.await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.operator()?.delete(key).await.map_err(StorageError::from)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.operator()?
            .delete_iter(keys.to_vec())
            .await
            .map_err(StorageError::from)
    }
}
