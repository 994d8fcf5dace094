use std::env;
use std::path::PathBuf;

const STATE_CACHE_ENV: &str = "RAXA_STATE_CACHE";
const STATE_CACHE_PATH_ENV: &str = "RAXA_STATE_CACHE_PATH";
const VALIDATION_ENV: &str = "RAXA_VALIDATION";

/// Contains configuration options for the renderer
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub enable_validation: bool,
    pub pipeline_cache: PipelineCacheConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            pipeline_cache: PipelineCacheConfig::default(),
        }
    }
}

impl RenderConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            enable_validation: var(VALIDATION_ENV)
                .map_or(defaults.enable_validation, |value| is_truthy(&value)),
            pipeline_cache: PipelineCacheConfig::from_vars(var),
        }
    }
}

/// Controls persistence of compiled pipeline state across runs
#[derive(Debug, Clone)]
pub struct PipelineCacheConfig {
    pub state_cache_enabled: bool,
    /// Defaults to `<cache dir>/raxa/pipelines`
    pub state_cache_path: Option<PathBuf>,
    pub async_state_writes: bool,
    /// First specialization constant id reserved for binding slots
    pub spec_constant_base: u32,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            state_cache_enabled: true,
            state_cache_path: None,
            async_state_writes: true,
            spec_constant_base: 0,
        }
    }
}

impl PipelineCacheConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            state_cache_enabled: var(STATE_CACHE_ENV)
                .map_or(defaults.state_cache_enabled, |value| is_truthy(&value)),
            state_cache_path: var(STATE_CACHE_PATH_ENV)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            async_state_writes: defaults.async_state_writes,
            spec_constant_base: defaults.spec_constant_base,
        }
    }

    /// Directory the state cache lives in, `None` when disabled
    pub fn resolve_state_cache_dir(&self) -> Option<PathBuf> {
        if !self.state_cache_enabled {
            return None;
        }
        self.state_cache_path
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("raxa").join("pipelines")))
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim(), "0" | "false" | "off" | "no" | "")
}
