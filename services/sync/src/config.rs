//! Configuration for the signage sync service.
//!
//! Settings are layered: built-in defaults, optional config files,
//! `SIGNAGE__SECTION__KEY` environment overrides, and finally the flat
//! variable names used by existing deployments (`ONEDRIVE_ACCESS_TOKEN`,
//! `AZURE_STORAGE_KEY`, ...), which take precedence over everything else.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Flat environment variables recognized for backwards compatibility,
/// mapped onto their configuration keys.
pub const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("ONEDRIVE_BASE_URL", "onedrive.base_url"),
    ("ONEDRIVE_ACCESS_TOKEN", "onedrive.access_token"),
    ("AZURE_STORAGE_ACCOUNT", "azure.account"),
    ("AZURE_STORAGE_KEY", "azure.key"),
    ("AZURE_CONTAINER_NAME", "azure.container"),
    ("VUSION_SUBSCRIPTION_KEY", "vusion.subscription_key"),
    ("VUSION_STORE_ID", "vusion.store_id"),
    ("KORONA_ACCOUNT_ID", "korona.account_id"),
    ("KORONA_USERNAME", "korona.username"),
    ("KORONA_PASSWORD", "korona.password"),
];

/// Comma-separated device group overrides
const GROUP_ENV_KEYS: &[(&str, &str)] = &[
    ("SIGNAGE_LEFT_GROUP", "targeting.left_group"),
    ("SIGNAGE_RIGHT_GROUP", "targeting.right_group"),
];

/// Errors found while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the sync service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub onedrive: OneDriveConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub vusion: VusionConfig,
    #[serde(default)]
    pub korona: KoronaConfig,
    #[serde(default)]
    pub targeting: TargetingConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// OneDrive (Microsoft Graph) source folder
#[derive(Debug, Clone, Deserialize)]
pub struct OneDriveConfig {
    /// Graph URL listing the children of the asset folder
    pub base_url: Option<String>,
    /// Bearer token, provided out of band
    pub access_token: Option<String>,
    /// Local directory downloads are written to
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
}

/// Azure Blob Storage destination
#[derive(Debug, Clone, Deserialize)]
pub struct AzureConfig {
    /// Storage account name
    pub account: Option<String>,
    /// Base64 account key used for SharedKey signing
    pub key: Option<String>,
    #[serde(default = "default_container")]
    pub container: String,
    /// Custom blob endpoint (Azurite, proxies). Defaults to
    /// `https://{account}.blob.core.windows.net`
    pub endpoint_url: Option<String>,
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
}

/// Vusion Rail device fleet API
#[derive(Debug, Clone, Deserialize)]
pub struct VusionConfig {
    #[serde(default = "default_vusion_base_url")]
    pub base_url: String,
    pub subscription_key: Option<String>,
    pub store_id: Option<String>,
    /// Background layer width in pixels
    #[serde(default = "default_layer_width")]
    pub layer_width: u32,
    /// Background layer height in pixels
    #[serde(default = "default_layer_height")]
    pub layer_height: u32,
}

/// KORONA.cloud tag registration
#[derive(Debug, Clone, Deserialize)]
pub struct KoronaConfig {
    #[serde(default = "default_korona_base_url")]
    pub base_url: String,
    pub account_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub tag_format: TagFormat,
}

/// Payload layout used when sending tags to KORONA
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFormat {
    /// `{"name": "{\"deviceId\":..,\"cacheId\":..}"}`
    #[default]
    JsonName,
    /// `{"name": cacheId, "number": deviceId}`
    NameNumber,
}

/// Static device groups addressed by filename markers
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TargetingConfig {
    /// Devices receiving `left_line_` assets
    #[serde(default)]
    pub left_group: Vec<String>,
    /// Devices receiving `right_line_` assets
    #[serde(default)]
    pub right_group: Vec<String>,
}

/// Background publishing cadence
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Minimum spacing between two background updates, in seconds
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

/// Shared HTTP client settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds; unset keeps the client default
    pub timeout_secs: Option<u64>,
}

impl HttpConfig {
    /// Request timeout as Duration, if configured
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// Default value functions
fn default_service_name() -> String {
    "signage-sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_download_dir() -> String {
    "./downloads".to_string()
}

fn default_container() -> String {
    "default-container".to_string()
}

fn default_azure_api_version() -> String {
    "2021-08-06".to_string()
}

fn default_vusion_base_url() -> String {
    "https://eu-api.vusionrail.com".to_string()
}

fn default_layer_width() -> u32 {
    1920
}

fn default_layer_height() -> u32 {
    158
}

fn default_korona_base_url() -> String {
    "https://196.koronacloud.com".to_string()
}

fn default_min_interval_secs() -> u64 {
    5
}

impl Config {
    /// Load configuration from config files and the process environment
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/signage").required(false))
            .add_source(config::File::with_name("/etc/signage/sync").required(false))
            // SIGNAGE__VUSION__LAYER_HEIGHT -> vusion.layer_height
            .add_source(config::Environment::with_prefix("SIGNAGE").separator("__"));

        Self::from_builder(builder, |key| std::env::var(key).ok())
    }

    /// Finish loading from `builder`, applying the flat legacy variables
    /// read through `lookup` on top
    pub fn from_builder<F>(
        mut builder: config::ConfigBuilder<config::builder::DefaultState>,
        lookup: F,
    ) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (var, key) in LEGACY_ENV_KEYS {
            builder = builder.set_override_option(*key, non_empty(lookup(var)))?;
        }

        for (var, key) in GROUP_ENV_KEYS {
            let group = non_empty(lookup(var)).map(|value| parse_device_list(&value));
            builder = builder.set_override_option(*key, group)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make every run fail in the same way
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.vusion.layer_width == 0 || self.vusion.layer_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "vusion.layer_width/height".to_string(),
                message: "Dimensions must be greater than 0".to_string(),
            });
        }

        let urls = [
            ("onedrive.base_url", self.onedrive.base_url.as_deref()),
            ("azure.endpoint_url", self.azure.endpoint_url.as_deref()),
            ("vusion.base_url", Some(self.vusion.base_url.as_str())),
            ("korona.base_url", Some(self.korona.base_url.as_str())),
        ];
        for (field, url) in urls {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigValidationError::InvalidValue {
                        field: field.to_string(),
                        message: "URL must start with http:// or https://".to_string(),
                    });
                }
            }
        }

        if self.azure.container.trim().is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "azure.container".to_string(),
                message: "Container name must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Names of credentials that are not set. Missing credentials are only
    /// warned about at startup; the step that needs them fails later.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let checks = [
            ("ONEDRIVE_BASE_URL", self.onedrive.base_url.is_some()),
            ("ONEDRIVE_ACCESS_TOKEN", self.onedrive.access_token.is_some()),
            ("AZURE_STORAGE_ACCOUNT", self.azure.account.is_some()),
            ("AZURE_STORAGE_KEY", self.azure.key.is_some()),
            ("VUSION_SUBSCRIPTION_KEY", self.vusion.subscription_key.is_some()),
            ("VUSION_STORE_ID", self.vusion.store_id.is_some()),
            ("KORONA_ACCOUNT_ID", self.korona.account_id.is_some()),
            ("KORONA_USERNAME", self.korona.username.is_some()),
            ("KORONA_PASSWORD", self.korona.password.is_some()),
        ];

        checks
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name)
            .collect()
    }

    /// Get the background publish spacing as Duration
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish.min_interval_secs)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Split a comma-separated device list, dropping blanks
pub fn parse_device_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(String::from)
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            download_dir: default_download_dir(),
        }
    }
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            account: None,
            key: None,
            container: default_container(),
            endpoint_url: None,
            api_version: default_azure_api_version(),
        }
    }
}

impl Default for VusionConfig {
    fn default() -> Self {
        Self {
            base_url: default_vusion_base_url(),
            subscription_key: None,
            store_id: None,
            layer_width: default_layer_width(),
            layer_height: default_layer_height(),
        }
    }
}

impl Default for KoronaConfig {
    fn default() -> Self {
        Self {
            base_url: default_korona_base_url(),
            account_id: None,
            username: None,
            password: None,
            tag_format: TagFormat::default(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load_with(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_builder(config::Config::builder(), |key| env.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load_with(&[]).unwrap();

        assert_eq!(config.azure.container, "default-container");
        assert_eq!(config.vusion.layer_width, 1920);
        assert_eq!(config.vusion.layer_height, 158);
        assert_eq!(config.publish_interval(), Duration::from_secs(5));
        assert_eq!(config.korona.tag_format, TagFormat::JsonName);
        assert!(config.http.timeout().is_none());
        assert!(config.targeting.left_group.is_empty());
    }

    #[test]
    fn test_legacy_variables_are_mapped() {
        let config = load_with(&[
            ("ONEDRIVE_ACCESS_TOKEN", "token-123"),
            ("AZURE_STORAGE_ACCOUNT", "signage"),
            ("AZURE_CONTAINER_NAME", "videos"),
            ("VUSION_STORE_ID", "store-1"),
            ("KORONA_USERNAME", "operator"),
        ])
        .unwrap();

        assert_eq!(config.onedrive.access_token.as_deref(), Some("token-123"));
        assert_eq!(config.azure.account.as_deref(), Some("signage"));
        assert_eq!(config.azure.container, "videos");
        assert_eq!(config.vusion.store_id.as_deref(), Some("store-1"));
        assert_eq!(config.korona.username.as_deref(), Some("operator"));
    }

    #[test]
    fn test_empty_legacy_variable_counts_as_missing() {
        let config = load_with(&[("ONEDRIVE_ACCESS_TOKEN", "  ")]).unwrap();

        assert!(config.onedrive.access_token.is_none());
        assert!(config.missing_credentials().contains(&"ONEDRIVE_ACCESS_TOKEN"));
    }

    #[test]
    fn test_group_variables_keep_leading_zeros() {
        let config = load_with(&[
            ("SIGNAGE_LEFT_GROUP", "00001, 00002,00003"),
            ("SIGNAGE_RIGHT_GROUP", "00005,,00006"),
        ])
        .unwrap();

        assert_eq!(config.targeting.left_group, vec!["00001", "00002", "00003"]);
        assert_eq!(config.targeting.right_group, vec!["00005", "00006"]);
    }

    #[test]
    fn test_missing_credentials_lists_all_unset() {
        let config = Config::default();
        let missing = config.missing_credentials();

        assert_eq!(missing.len(), 9);
        assert!(missing.contains(&"AZURE_STORAGE_KEY"));
        assert!(missing.contains(&"KORONA_PASSWORD"));
    }

    #[test]
    fn test_validate_rejects_zero_layer() {
        let mut config = Config::default();
        config.vusion.layer_height = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = Config::default();
        config.onedrive.base_url = Some("ftp://graph.example".to_string());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_timeout_conversion() {
        let http = HttpConfig {
            timeout_secs: Some(45),
        };
        assert_eq!(http.timeout(), Some(Duration::from_secs(45)));
        assert_eq!(HttpConfig::default().timeout(), None);
    }

    #[test]
    fn test_parse_device_list() {
        assert_eq!(parse_device_list(" a ,b,, c"), vec!["a", "b", "c"]);
        assert!(parse_device_list("").is_empty());
    }
}
