use serde::Deserialize;
use std::path::Path;

/// Base URL used when the config file and environment leave it unset.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Analytics backend connection
    #[serde(default)]
    pub api: ApiConfig,
    /// Query answer cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Map viewport and tiles
    #[serde(default)]
    pub map: MapConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the analytics API, without a trailing slash.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overall request deadline in seconds (default: 30)
    #[serde(default = "ApiConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// TCP connect deadline in seconds (default: 10)
    #[serde(default = "ApiConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// File holding the bearer token. A missing or empty file means
    /// requests are sent unauthenticated, which is fine against dev servers.
    #[serde(default = "ApiConfig::default_token_file")]
    pub token_file: String,
    /// Serve deterministic fixture data instead of calling the API
    /// (default: false)
    #[serde(default)]
    pub use_mock: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: Self::default_timeout_secs(),
            connect_timeout_secs: Self::default_connect_timeout_secs(),
            token_file: Self::default_token_file(),
            use_mock: false,
        }
    }
}

impl ApiConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_connect_timeout_secs() -> u64 {
        10
    }
    fn default_token_file() -> String {
        ".auth_token".to_string()
    }

    pub fn effective_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached query answer stays valid (default: 300)
    #[serde(default = "CacheConfig::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: Self::default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    fn default_ttl_secs() -> u64 {
        300
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// Tile provider key; layers that need one stay disabled without it.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Initial viewport center as [latitude, longitude] (default: Chengdu)
    #[serde(default = "MapConfig::default_center")]
    pub default_center: [f64; 2],
    /// Initial zoom level (default: 12)
    #[serde(default = "MapConfig::default_zoom")]
    pub default_zoom: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_center: Self::default_center(),
            default_zoom: Self::default_zoom(),
        }
    }
}

impl MapConfig {
    fn default_center() -> [f64; 2] {
        [30.6595, 104.0659]
    }
    fn default_zoom() -> u8 {
        12
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Environment variables override the file so a deployment can retarget
    /// the backend without editing it.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("RAILFLOW_API_BASE_URL").ok(),
            std::env::var("RAILFLOW_USE_MOCK").ok(),
            std::env::var("RAILFLOW_MAP_KEY").ok(),
        );
    }

    fn apply_overrides(
        &mut self,
        base_url: Option<String>,
        use_mock: Option<String>,
        map_key: Option<String>,
    ) {
        if let Some(base_url) = base_url.filter(|s| !s.is_empty()) {
            self.api.base_url = Some(base_url);
        }
        if let Some(use_mock) = use_mock {
            self.api.use_mock = matches!(
                use_mock.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        if let Some(map_key) = map_key.filter(|s| !s.is_empty()) {
            self.map.api_key = Some(map_key);
        }
    }

    /// Advisory warnings for settings that commonly bite. None of these are
    /// fatal.
    pub fn warn_missing(&self) {
        if !self.api.use_mock && self.api.base_url.is_none() {
            tracing::warn!(default = %DEFAULT_BASE_URL, "api.base_url not set, using the default");
        }
        if self.map.api_key.is_none() {
            tracing::warn!("map.api_key not set, keyed tile layers stay disabled");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
