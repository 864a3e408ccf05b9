use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Log filter settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Location acquisition settings
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// Location backends that can be enabled from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderChoice {
    /// Network-assisted lookup over an MLS-compatible geolocate API
    Geolocate,
    /// GeoClue2 over the system D-Bus (Linux only)
    GeoClue,
}

impl FromStr for ProviderChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geolocate" => Ok(Self::Geolocate),
            "geoclue" => Ok(Self::GeoClue),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Which location permissions the user has granted to the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub coarse: bool,
    pub fine: bool,
    pub network: bool,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            coarse: true,
            fine: true,
            network: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocateConfig {
    pub enabled: bool,
    /// Full URL of the `geolocate` endpoint
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for GeolocateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.beacondb.net/v1/geolocate".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoClueConfig {
    pub enabled: bool,
    /// Desktop id GeoClue uses to authorize the client
    pub desktop_id: String,
    /// One of `country`, `city`, `neighborhood`, `street`, `exact`
    pub accuracy: String,
}

impl Default for GeoClueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop_id: "breezy".to_string(),
            accuracy: "exact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Nominatim-compatible `reverse` endpoint
    pub url: String,
    /// Preferred language for administrative names
    pub language: String,
    pub timeout_secs: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            language: "en".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// How often the last-known fix is polled while a request is in flight
    pub poll_interval_ms: u64,

    /// Budget for network-assisted positioning
    pub network_timeout_secs: u64,

    /// Budget for satellite-only positioning
    pub satellite_timeout_secs: u64,

    /// Reverse-geocode resolved fixes by default
    pub geocode: bool,

    /// Cached fixes older than this are not reused
    pub cache_max_age_secs: u64,

    /// Enabled providers, most preferred first
    pub providers: Vec<String>,

    /// Country codes that count as "inside the region"
    pub region_codes: Vec<String>,

    /// Country names used when the geocoder returns no code
    pub region_names: Vec<String>,

    pub permissions: PermissionsConfig,
    pub geolocate: GeolocateConfig,
    pub geoclue: GeoClueConfig,
    pub geocoder: GeocoderConfig,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 300,
            network_timeout_secs: 10,
            satellite_timeout_secs: 60,
            geocode: true,
            cache_max_age_secs: 300,
            providers: vec!["geolocate".to_string(), "geoclue".to_string()],
            region_codes: vec!["CN".to_string()],
            region_names: vec!["中国".to_string(), "中國".to_string(), "China".to_string()],
            permissions: PermissionsConfig::default(),
            geolocate: GeolocateConfig::default(),
            geoclue: GeoClueConfig::default(),
            geocoder: GeocoderConfig::default(),
        }
    }
}

impl LocationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn satellite_timeout(&self) -> Duration {
        Duration::from_secs(self.satellite_timeout_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    /// Parse the configured provider list, keeping its order.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownProvider`] for the first name that is not recognised.
    pub fn provider_choices(&self) -> Result<Vec<ProviderChoice>, ConfigError> {
        let mut choices = Vec::with_capacity(self.providers.len());
        for name in &self.providers {
            let choice = name.parse::<ProviderChoice>()?;
            if !choices.contains(&choice) {
                choices.push(choice);
            }
        }
        Ok(choices)
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("breezy");

        Self {
            config_dir,
            logging: LoggingConfig::default(),
            location: LocationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Self::default();
            if let Some(parent) = path.parent() {
                config.config_dir = parent.to_path_buf();
            }
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns an error if validation fails with critical errors. Warnings are
    /// returned for the caller to log once logging is initialized.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config_path = Self::config_path()?;
        Self::load_validated_from(&config_path)
    }

    /// [`Config::load_validated`] against an explicit path
    pub fn load_validated_from(path: &Path) -> Result<(Self, ValidationResult)> {
        let config = Self::load_from(path)?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let location = &self.location;

        if location.poll_interval_ms == 0 {
            result.add_error("location.poll_interval_ms", "Poll interval must be greater than 0");
        }
        if location.network_timeout_secs == 0 {
            result.add_error(
                "location.network_timeout_secs",
                "Network timeout must be greater than 0",
            );
        }
        if location.satellite_timeout_secs == 0 {
            result.add_error(
                "location.satellite_timeout_secs",
                "Satellite timeout must be greater than 0",
            );
        } else if location.satellite_timeout_secs < location.network_timeout_secs {
            result.add_warning(
                "location.satellite_timeout_secs",
                "Satellite timeout is shorter than the network timeout",
            );
        }
        if location.poll_interval() >= location.network_timeout() && location.network_timeout_secs > 0 {
            result.add_warning(
                "location.poll_interval_ms",
                "Poll interval is not shorter than the network timeout; polling will never run",
            );
        }

        match location.provider_choices() {
            Ok(choices) if choices.is_empty() => {
                result.add_warning("location.providers", "No location providers enabled");
            }
            Ok(_) => {}
            Err(e) => result.add_error("location.providers", e.to_string()),
        }

        let permissions = location.permissions;
        if !permissions.coarse && !permissions.fine {
            result.add_warning(
                "location.permissions",
                "Location permission not granted - every request will fall back to manual selection",
            );
        }

        if location.geolocate.enabled {
            self.validate_url(&location.geolocate.url, "location.geolocate.url", &mut result);
        }
        if location.geocode {
            self.validate_url(&location.geocoder.url, "location.geocoder.url", &mut result);
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("breezy");

        Ok(config_dir.join("config.toml"))
    }
}
