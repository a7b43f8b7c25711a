//! Run configuration
//!
//! Everything a run needs is collected once into an immutable [`Config`] and
//! passed by reference to the components. Nothing is read from the process
//! environment after startup.

use crate::error::{Result, ZoneflowError};
use crate::zone::{DEFAULT_ZONE_FILTER, ZoneSelector};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory beneath the installation home holding one directory per zone
pub const ZONES_DIR: &str = "vpcs";

/// Inventory file name for the default variant
pub const INVENTORY_FILE: &str = "output.json";

/// Inventory file name when login credentials are provisioned
pub const CREDENTIAL_INVENTORY_FILE: &str = "zone-resources.json";

/// Default `IMAGE_MATCH` pattern
pub const DEFAULT_IMAGE_MATCH: &str = "^[a-zA-Z]";

/// Default per-zone timeout for a single tool invocation
pub const DEFAULT_ZONE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct Config {
    home: PathBuf,
    api_key: Option<String>,
    zones: ZoneSelector,
    image_match: String,
    provision_credentials: bool,
    inventory_path: PathBuf,
    parallelism: usize,
    zone_timeout: Duration,
}

impl Config {
    pub fn builder(home: impl Into<PathBuf>) -> ConfigBuilder {
        ConfigBuilder::new(home)
    }

    /// Installation home: the directory containing the running executable
    pub fn default_home() -> Result<PathBuf> {
        let exe = std::env::current_exe()?;
        let exe = exe.canonicalize().unwrap_or(exe);
        exe.parent().map(Path::to_path_buf).ok_or_else(|| {
            ZoneflowError::Configuration(format!(
                "cannot determine installation directory of {}",
                exe.display()
            ))
        })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn zones_root(&self) -> PathBuf {
        self.home.join(ZONES_DIR)
    }

    /// API key, if one is configured and non-blank
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn zones(&self) -> &ZoneSelector {
        &self.zones
    }

    pub fn image_match(&self) -> &str {
        &self.image_match
    }

    pub fn provision_credentials(&self) -> bool {
        self.provision_credentials
    }

    pub fn inventory_path(&self) -> &Path {
        &self.inventory_path
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn zone_timeout(&self) -> Duration {
        self.zone_timeout
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("home", &self.home)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("zones", &self.zones)
            .field("image_match", &self.image_match)
            .field("provision_credentials", &self.provision_credentials)
            .field("inventory_path", &self.inventory_path)
            .field("parallelism", &self.parallelism)
            .field("zone_timeout", &self.zone_timeout)
            .finish()
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    home: PathBuf,
    api_key: Option<String>,
    zones: Option<String>,
    image_match: Option<String>,
    provision_credentials: bool,
    inventory_file: Option<PathBuf>,
    parallelism: usize,
    zone_timeout: Duration,
}

impl ConfigBuilder {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            api_key: None,
            zones: None,
            image_match: None,
            provision_credentials: false,
            inventory_file: None,
            parallelism: 1,
            zone_timeout: DEFAULT_ZONE_TIMEOUT,
        }
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn zones(mut self, filter: Option<String>) -> Self {
        self.zones = filter;
        self
    }

    pub fn image_match(mut self, pattern: Option<String>) -> Self {
        self.image_match = pattern;
        self
    }

    pub fn provision_credentials(mut self, enabled: bool) -> Self {
        self.provision_credentials = enabled;
        self
    }

    /// Override the inventory location. Relative paths resolve against home.
    pub fn inventory_file(mut self, path: Option<PathBuf>) -> Self {
        self.inventory_file = path;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn zone_timeout(mut self, timeout: Duration) -> Self {
        self.zone_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.parallelism == 0 {
            return Err(ZoneflowError::Configuration(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.zone_timeout.is_zero() {
            return Err(ZoneflowError::Configuration(
                "zone timeout must be greater than zero".to_string(),
            ));
        }

        let image_match = self
            .image_match
            .unwrap_or_else(|| DEFAULT_IMAGE_MATCH.to_string());
        regex::Regex::new(&image_match).map_err(|e| {
            ZoneflowError::Configuration(format!("IMAGE_MATCH is not a valid pattern: {}", e))
        })?;

        let zones = self
            .zones
            .filter(|z| !z.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ZONE_FILTER.to_string());

        let inventory_path = match self.inventory_file {
            Some(path) if path.is_absolute() => path,
            Some(path) => self.home.join(path),
            None if self.provision_credentials => self.home.join(CREDENTIAL_INVENTORY_FILE),
            None => self.home.join(INVENTORY_FILE),
        };

        Ok(Config {
            home: self.home,
            api_key: self.api_key,
            zones: ZoneSelector::parse(&zones),
            image_match,
            provision_credentials: self.provision_credentials,
            inventory_path,
            parallelism: self.parallelism,
            zone_timeout: self.zone_timeout,
        })
    }
}
