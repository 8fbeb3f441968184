//! Layered pipeline configuration.
//!
//! Sources, lowest priority first: built-in defaults, an optional TOML
//! file, then environment variables prefixed `RETAIL_ETL_` with `__`
//! separating sections (`RETAIL_ETL_WAREHOUSE__HOST`).

use crate::core::{normalize_prefix, RawObject, Relation};
use crate::errors::ConfigError;
use crate::pipeline::RetryConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "RETAIL_ETL_";

const REDACTED: &str = "***";

/// Blob store implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    /// Process memory.
    Memory,
    /// Local directory, one subdirectory per container.
    #[default]
    Local,
    /// S3 through `object_store`.
    S3,
}

impl BlobBackend {
    /// URI scheme of objects in this backend.
    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

/// Catalog crawler implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    /// Scripted crawler that finishes after a few polls.
    Memory,
    /// Header-inferring crawler over the configured blob store.
    #[default]
    Local,
}

/// Warehouse implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// In-process engine.
    #[default]
    Memory,
    /// Postgres wire protocol (Redshift).
    Postgres,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend.
    pub backend: BlobBackend,
    /// Container (bucket) holding raw and processed zones.
    pub container: String,
    /// Raw zone prefix.
    pub raw_prefix: String,
    /// Processed zone prefix.
    pub processed_prefix: String,
    /// Root directory for the local backend.
    pub local_root: PathBuf,
    /// Region for the S3 backend.
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            container: "retail-data".to_string(),
            raw_prefix: "raw/".to_string(),
            processed_prefix: "processed/".to_string(),
            local_root: PathBuf::from("./data"),
            region: None,
            endpoint: None,
        }
    }
}

impl StorageConfig {
    /// Key of a raw object.
    #[must_use]
    pub fn raw_key(&self, object: RawObject) -> String {
        object.key(&self.raw_prefix)
    }

    /// URI of a raw object.
    #[must_use]
    pub fn raw_uri(&self, object: RawObject) -> String {
        format!(
            "{}://{}/{}",
            self.backend.scheme(),
            self.container,
            self.raw_key(object)
        )
    }

    /// Unload destination prefix of a published relation.
    #[must_use]
    pub fn processed_uri(&self, relation: Relation) -> String {
        format!(
            "{}://{}/{}{}/data",
            self.backend.scheme(),
            self.container,
            normalize_prefix(&self.processed_prefix),
            relation
        )
    }
}

/// `[catalog]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Backend.
    pub backend: CatalogBackend,
    /// Crawler name.
    pub crawler_name: String,
    /// Catalog database receiving the tables.
    pub database: String,
    /// Role the crawler assumes.
    pub role: String,
    /// Seconds between state polls.
    pub poll_interval_secs: u64,
    /// Polls after starting before giving up.
    pub max_poll_attempts: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: CatalogBackend::default(),
            crawler_name: "retail_data_crawler".to_string(),
            database: "retail_db".to_string(),
            role: "retail-crawler-role".to_string(),
            poll_interval_secs: 30,
            max_poll_attempts: 120,
        }
    }
}

impl CatalogConfig {
    /// Poll interval as a duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// `[warehouse]`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Backend.
    pub backend: WarehouseBackend,
    /// Cluster endpoint.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Database.
    pub database: String,
    /// User.
    pub user: String,
    /// Password. Redacted in `Debug` and [`EtlConfig::redacted`].
    pub password: String,
    /// Role the warehouse assumes for bulk loads and unloads.
    pub iam_role: String,
    /// Require TLS on the connection.
    pub require_tls: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            host: "localhost".to_string(),
            port: 5439,
            database: "dev".to_string(),
            user: "awsuser".to_string(),
            password: String::new(),
            iam_role: "arn:aws:iam::000000000000:role/retail-redshift-role".to_string(),
            require_tls: false,
        }
    }
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("iam_role", &self.iam_role)
            .field("require_tls", &self.require_tls)
            .finish()
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// `[notify]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving failure notices; failures are only logged if unset.
    pub webhook_url: Option<String>,
    /// Webhook request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// Pipeline name used in logs, events and notices.
    pub pipeline_name: String,
    /// Object storage.
    pub storage: StorageConfig,
    /// Catalog crawler.
    pub catalog: CatalogConfig,
    /// Warehouse.
    pub warehouse: WarehouseConfig,
    /// Whole-run retry.
    pub retry: RetryConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Failure notification.
    pub notify: NotifyConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            pipeline_name: "retail_etl".to_string(),
            storage: StorageConfig::default(),
            catalog: CatalogConfig::default(),
            warehouse: WarehouseConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl EtlConfig {
    /// Builds the figment for defaults, an optional file and the environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates the configuration.
    ///
    /// A missing `file` is an error; with no file only defaults and the
    /// environment apply.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::invalid(
                    "config",
                    format!("file not found: {}", path.display()),
                ));
            }
        }
        Self::from_figment(&Self::figment(file))
    }

    /// Extracts and validates from a prepared figment.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
            Ok(())
        }

        non_empty("pipeline_name", &self.pipeline_name)?;
        non_empty("storage.container", &self.storage.container)?;
        if self.storage.container.contains('/') {
            return Err(ConfigError::invalid(
                "storage.container",
                "must not contain '/'",
            ));
        }
        non_empty("storage.raw_prefix", &self.storage.raw_prefix)?;
        non_empty("storage.processed_prefix", &self.storage.processed_prefix)?;
        if normalize_prefix(&self.storage.raw_prefix)
            == normalize_prefix(&self.storage.processed_prefix)
        {
            return Err(ConfigError::invalid(
                "storage.processed_prefix",
                "must differ from storage.raw_prefix",
            ));
        }
        non_empty("catalog.crawler_name", &self.catalog.crawler_name)?;
        non_empty("catalog.database", &self.catalog.database)?;
        non_empty("catalog.role", &self.catalog.role)?;
        if self.catalog.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "catalog.poll_interval_secs",
                "must be positive",
            ));
        }
        if self.catalog.max_poll_attempts == 0 {
            return Err(ConfigError::invalid(
                "catalog.max_poll_attempts",
                "must be at least 1",
            ));
        }
        non_empty("warehouse.iam_role", &self.warehouse.iam_role)?;
        if self.warehouse.backend == WarehouseBackend::Postgres {
            non_empty("warehouse.host", &self.warehouse.host)?;
            non_empty("warehouse.database", &self.warehouse.database)?;
            non_empty("warehouse.user", &self.warehouse.user)?;
        }
        self.retry.validate()?;
        if self.notify.timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "notify.timeout_secs",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Returns a copy safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.warehouse.password.is_empty() {
            copy.warehouse.password = REDACTED.to_string();
        }
        copy
    }
}
