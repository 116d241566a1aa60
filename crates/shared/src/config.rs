//! Application configuration management.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Object store provider. `None` means the store is not configured and
    /// every deletion becomes a logged no-op.
    #[serde(default)]
    pub storage: Option<StorageProvider>,
    /// Quota, retention and domain settings for attachments.
    #[serde(default)]
    pub attachments: AttachmentSettings,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Object store provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageProvider {
    /// S3-compatible storage: Cloudflare R2, Supabase, AWS S3, DigitalOcean Spaces
    S3 {
        /// S3 endpoint URL.
        endpoint: String,
        /// S3 bucket name.
        bucket: String,
        /// AWS access key ID.
        access_key_id: String,
        /// AWS secret access key.
        secret_access_key: String,
        /// AWS region.
        region: String,
    },
    /// Azure Blob Storage
    AzureBlob {
        /// Azure storage account name.
        account: String,
        /// Azure storage access key.
        access_key: String,
        /// Azure container name.
        container: String,
    },
    /// Local filesystem (development only)
    LocalFs {
        /// Root directory path.
        root: PathBuf,
    },
    /// In-process memory store (tests and throwaway runs)
    Memory,
}

impl StorageProvider {
    /// Create S3-compatible provider (Cloudflare R2, Supabase, AWS S3).
    #[must_use]
    pub fn s3(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self::S3 {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
        }
    }

    /// Create local filesystem provider (development only).
    #[must_use]
    pub fn local_fs(root: impl Into<PathBuf>) -> Self {
        Self::LocalFs { root: root.into() }
    }

    /// Get the provider name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::AzureBlob { .. } => "azure_blob",
            Self::LocalFs { .. } => "local",
            Self::Memory => "memory",
        }
    }
}

/// Settings consumed by quota enforcement, the expiration sweep and the
/// embedded image extractor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentSettings {
    /// Quota ceiling: maximum aggregate size of all catalog rows.
    #[serde(default = "default_storage_max_size")]
    pub storage_max_size_bytes: u64,
    /// Retention window in days. `0` disables the expiration sweep.
    #[serde(default)]
    pub file_expire_days: u32,
    /// Public domain the object store is served from, e.g.
    /// `https://files.example.com`. Images pointing there are treated as
    /// already-stored objects.
    #[serde(default)]
    pub public_object_domain: Option<String>,
}

fn default_storage_max_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            storage_max_size_bytes: default_storage_max_size(),
            file_expire_days: 0,
            public_object_domain: None,
        }
    }
}

impl AttachmentSettings {
    /// Settings with the given quota ceiling and everything else defaulted.
    #[must_use]
    pub fn with_ceiling(storage_max_size_bytes: u64) -> Self {
        Self {
            storage_max_size_bytes,
            ..Self::default()
        }
    }

    /// Set the retention window in days.
    #[must_use]
    pub fn with_expire_days(mut self, days: u32) -> Self {
        self.file_expire_days = days;
        self
    }

    /// Set the public object domain.
    #[must_use]
    pub fn with_public_domain(mut self, domain: impl Into<String>) -> Self {
        self.public_object_domain = Some(domain.into());
        self
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("POSTVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
