//! Configuration system for shopsync.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/shopsync/config.toml` and/or an explicit file.
//! The resolved `SyncConfig` is passed by value into each run; nothing is kept in
//! process-wide state.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Shopify Admin API version the fetcher targets.
pub const DEFAULT_API_VERSION: &str = "2024-04";

/// Largest page the source API will return.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Top-level configuration for a sync run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub shop: ShopConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Source shop identity and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShopConfig {
    pub shop_name: String,
    pub access_token: String,
    pub api_version: String,
    /// Overrides `https://{shop}.myshopify.com/admin/api/{version}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            shop_name: String::new(),
            access_token: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url: None,
        }
    }
}

impl ShopConfig {
    /// Base URL every resource path is resolved against.
    pub fn api_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.myshopify.com/admin/api/{}",
                self.shop_name, self.api_version
            ),
        }
    }
}

/// Which warehouse implementation a run writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    #[default]
    Bigquery,
    Sqlite,
}

/// Target warehouse identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    pub project_id: String,
    pub dataset_id: String,
    /// Dataset location used when the dataset has to be created.
    pub location: String,
    /// Service-account JSON key file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    /// Pre-resolved OAuth access token, used instead of a key file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Directory holding one `{dataset}.sqlite` file per dataset; in-memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
    /// Overrides `https://bigquery.googleapis.com`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            project_id: String::new(),
            dataset_id: "shopify_data".to_string(),
            location: "US".to_string(),
            credentials_path: None,
            access_token: None,
            sqlite_path: None,
            api_base_url: None,
        }
    }
}

/// Timeouts and paging for outbound requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub page_size: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl HttpConfig {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Run-shape settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Row cap for the post-load read-back of each main table.
    pub sample_limit: usize,
    /// Run the customers and products pipelines on separate tasks.
    pub concurrent_entities: bool,
    /// Rows per entity type handed to the analysis collaborator.
    pub analysis_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_limit: 1000,
            concurrent_entities: false,
            analysis_sample: 10,
        }
    }
}

impl SyncConfig {
    /// Check that every value a run needs has been resolved.
    ///
    /// Reports all missing fields at once rather than the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.shop.shop_name.trim().is_empty() && self.shop.base_url.is_none() {
            missing.push("shop.shop_name");
        }
        if self.shop.access_token.trim().is_empty() {
            missing.push("shop.access_token");
        }
        if self.warehouse.dataset_id.trim().is_empty() {
            missing.push("warehouse.dataset_id");
        }
        if self.warehouse.backend == WarehouseBackend::Bigquery {
            if self.warehouse.project_id.trim().is_empty() {
                missing.push("warehouse.project_id");
            }
            if self.warehouse.credentials_path.is_none() && self.warehouse.access_token.is_none()
            {
                missing.push("warehouse.credentials_path");
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields {
                fields: missing.into_iter().map(String::from).collect(),
            });
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "http.timeout_secs must be greater than zero".into(),
            });
        }
        if self.pipeline.sample_limit == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.sample_limit must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Copy of this config with secrets replaced, for display.
    pub fn redacted(&self) -> SyncConfig {
        let mut copy = self.clone();
        if !copy.shop.access_token.is_empty() {
            copy.shop.access_token = "***".into();
        }
        if copy.warehouse.access_token.is_some() {
            copy.warehouse.access_token = Some("***".into());
        }
        copy
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SHOPSYNC_`)
/// 3. Explicit config file
/// 4. User config (`~/.config/shopsync/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&figment::value::Dict>,
) -> Result<SyncConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "shopsync", "shopsync") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // Environment variables (SHOPSYNC_SHOP__ACCESS_TOKEN, SHOPSYNC_WAREHOUSE__PROJECT_ID, etc.)
    figment = figment.merge(Env::prefixed("SHOPSYNC_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
