use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acquisition::AcquisitionConfig;
use crate::filter::FilterConfig;
use crate::geocode::{build_http_client, HttpAddressProvider, QueryStyle};
use crate::poi::{NearbyPoiEnricher, OverpassClient};
use crate::resolver::{ResolverConfig, ReverseGeocodeResolver};
use crate::store::{FileStore, DEFAULT_LAST_GOOD_KEY};

pub const DEFAULT_CONFIG_FILE: &str = "locator.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub filter: FilterConfig,
    pub acquisition: AcquisitionConfig,
    pub geocoding: GeocodingConfig,
    pub poi: PoiConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Nominatim instance queried first
    pub primary_url: String,
    /// Nominatim-compatible fallback; leave empty to disable
    pub secondary_url: String,
    pub timeout_ms: u64,
    pub debounce_ms: u64,
    pub min_move_meters: f64,
    pub accept_language: String,
    pub user_agent: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            primary_url: "https://nominatim.openstreetmap.org".to_string(),
            secondary_url: "https://geocode.maps.co".to_string(),
            timeout_ms: 12_000,
            debounce_ms: 250,
            min_move_meters: 10.0,
            accept_language: "en-IN".to_string(),
            user_agent: format!("complaint-locator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GeocodingConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            min_move_meters: self.min_move_meters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoiConfig {
    pub enabled: bool,
    pub overpass_url: String,
    pub radius_meters: f64,
    pub timeout_ms: u64,
}

impl Default for PoiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overpass_url: "https://overpass-api.de".to_string(),
            radius_meters: 450.0,
            timeout_ms: 12_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding persisted key-value state
    pub path: String,
    pub last_good_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/locator-store.json".to_string(),
            last_good_key: DEFAULT_LAST_GOOD_KEY.to_string(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    pub fn open_store(&self) -> FileStore {
        FileStore::new(&self.storage.path)
    }

    /// Wire the configured providers into a resolver
    pub fn build_resolver(&self) -> Result<ReverseGeocodeResolver> {
        let geocoding = &self.geocoding;
        let client = build_http_client(&geocoding.user_agent)?;

        let primary = HttpAddressProvider::new(
            "primary geocoder",
            client.clone(),
            &geocoding.primary_url,
            QueryStyle::Nominatim,
            geocoding.accept_language.as_str(),
        )?;
        let mut resolver = ReverseGeocodeResolver::new(Arc::new(primary))
            .with_config(geocoding.resolver_config());

        if !geocoding.secondary_url.trim().is_empty() {
            let secondary = HttpAddressProvider::new(
                "secondary geocoder",
                client.clone(),
                &geocoding.secondary_url,
                QueryStyle::Minimal,
                geocoding.accept_language.as_str(),
            )?;
            resolver = resolver.with_secondary(Arc::new(secondary));
        }

        if self.poi.enabled {
            let overpass = OverpassClient::new(client, &self.poi.overpass_url)?;
            resolver = resolver.with_enricher(NearbyPoiEnricher::new(
                Arc::new(overpass),
                self.poi.radius_meters,
                Duration::from_millis(self.poi.timeout_ms),
            ));
        }

        Ok(resolver)
    }
}
