//! Modelcast configuration

use modelcast_core::KeyLayout;
use modelcast_protocol::LoaderConfig;
use serde::{Deserialize, Serialize};

/// Environment variable prefix; nested keys are separated by `__`
const ENV_PREFIX: &str = "MODELCAST";

/// Modelcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelcastConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Store key and channel names
    #[serde(default)]
    pub keys: KeyLayout,

    /// Subscriber/loader settings
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Health endpoint configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Health endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Listen address for /live, /ready and /metrics; disabled when unset
    #[serde(default)]
    pub listen: Option<String>,
}

impl ModelcastConfig {
    /// Load configuration from the file at `config_path` (if it exists),
    /// then `MODELCAST__*` environment variables, then CLI overrides
    pub fn load(config_path: &str, redis_url: Option<&str>) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = settings.try_deserialize()?;

        if let Some(url) = redis_url {
            config.redis_url = url.to_string();
        }

        Ok(config)
    }
}

impl Default for ModelcastConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            keys: KeyLayout::default(),
            loader: LoaderConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
