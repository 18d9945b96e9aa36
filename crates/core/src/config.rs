//! Feed engine configuration
//!
//! Loaded from a TOML file and then overridden by environment variables:
//!
//! ```toml
//! buffer_size = 1
//! far_prefetch_delay_ms = 1000
//! visibility_margin = 0.5
//! prefetch_media_limit = 5
//! cancellation = "advisory"
//!
//! [cache]
//! capacity = 512
//! ```

use panofeed_cache::{CacheConfig, ConfigError};
use panofeed_scheduler::{
    CancellationMode, PrefetchConfig, DEFAULT_FAR_PREFETCH_DELAY, DEFAULT_PREFETCH_MEDIA_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const BUFFER_SIZE_ENV: &str = "PANOFEED_BUFFER_SIZE";
pub const FAR_PREFETCH_DELAY_ENV: &str = "PANOFEED_FAR_PREFETCH_DELAY_MS";
pub const CANCELLATION_ENV: &str = "PANOFEED_CANCELLATION";

/// Configuration for [`crate::FeedEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items mounted on each side of the focused one
    pub buffer_size: usize,

    /// Debounce before the item two ahead of focus is prefetched
    pub far_prefetch_delay_ms: u64,

    /// Pre-trigger margin for lazy images, as a fraction of the viewport height
    pub visibility_margin: f32,

    /// Media entries warmed per prefetched post
    pub prefetch_media_limit: usize,

    pub cancellation: CancellationMode,

    pub cache: CacheConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1,
            far_prefetch_delay_ms: DEFAULT_FAR_PREFETCH_DELAY.as_millis() as u64,
            visibility_margin: 0.5,
            prefetch_media_limit: DEFAULT_PREFETCH_MEDIA_LIMIT,
            cancellation: CancellationMode::Advisory,
            cache: CacheConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_far_prefetch_delay(mut self, delay: Duration) -> Self {
        self.far_prefetch_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationMode) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    /// Defaults with environment overrides applied
    ///
    /// Environment variables:
    /// - `PANOFEED_BUFFER_SIZE`: items mounted each side of focus (default: 1)
    /// - `PANOFEED_FAR_PREFETCH_DELAY_MS`: far prefetch debounce (default: 1000)
    /// - `PANOFEED_CANCELLATION`: `advisory` or `abort` (default: advisory)
    /// - `PANOFEED_IMAGE_CACHE_CAPACITY`: image cache entries (default: 512)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Applies environment overrides on top of `self`, then validates
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(val) = std::env::var(BUFFER_SIZE_ENV) {
            self.buffer_size = parse_env(BUFFER_SIZE_ENV, &val)?;
        }
        if let Ok(val) = std::env::var(FAR_PREFETCH_DELAY_ENV) {
            self.far_prefetch_delay_ms = parse_env(FAR_PREFETCH_DELAY_ENV, &val)?;
        }
        if let Ok(val) = std::env::var(CANCELLATION_ENV) {
            self.cancellation = parse_env(CANCELLATION_ENV, &val)?;
        }
        self.cache = self.cache.apply_env()?;
        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file at `path` if one exists, then applies environment
    /// overrides
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) if path.as_ref().exists() => {
                let config = Self::from_file(path.as_ref())?;
                log::info!("loaded feed config from {}", path.as_ref().display());
                config
            }
            _ => Self::default(),
        };
        base.apply_env()
    }

    /// Saves configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = toml::to_string(self)?;
        fs::write(path.as_ref(), toml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size".to_string()));
        }
        if !self.visibility_margin.is_finite() || self.visibility_margin < 0.0 {
            return Err(ConfigError::InvalidValue("visibility_margin".to_string()));
        }
        self.cache.validate()
    }

    pub fn far_prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.far_prefetch_delay_ms)
    }

    /// Upper bound on simultaneously mounted items
    pub fn max_mounted(&self) -> usize {
        2 * self.buffer_size + 1
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            far_delay: self.far_prefetch_delay(),
            media_limit: self.prefetch_media_limit,
            cancellation: self.cancellation,
            ..PrefetchConfig::default()
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use panofeed_cache::config::CAPACITY_ENV;
    use serial_test::serial;
    use std::env;

    const ALL_ENV: [&str; 4] = [
        BUFFER_SIZE_ENV,
        FAR_PREFETCH_DELAY_ENV,
        CANCELLATION_ENV,
        CAPACITY_ENV,
    ];

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.far_prefetch_delay(), Duration::from_millis(1000));
        assert_eq!(config.visibility_margin, 0.5);
        assert_eq!(config.prefetch_media_limit, 5);
        assert_eq!(config.cancellation, CancellationMode::Advisory);
        assert_eq!(config.cache.capacity, 512);
        assert_eq!(config.max_mounted(), 3);
    }

    #[test]
    fn test_prefetch_config() {
        let config = FeedConfig::default()
            .with_far_prefetch_delay(Duration::from_millis(250))
            .with_cancellation(CancellationMode::Abort);
        let prefetch = config.prefetch_config();

        assert_eq!(prefetch.far_delay, Duration::from_millis(250));
        assert_eq!(prefetch.media_limit, 5);
        assert_eq!(prefetch.cancellation, CancellationMode::Abort);
    }

    #[test]
    fn test_from_toml() {
        let config = FeedConfig::from_toml(
            r#"
            buffer_size = 2
            cancellation = "abort"

            [cache]
            capacity = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_size, 2);
        assert_eq!(config.cancellation, CancellationMode::Abort);
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(config.far_prefetch_delay_ms, 1000);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            FeedConfig::from_toml("buffer_size = 0"),
            Err(ConfigError::InvalidValue(key)) if key == "buffer_size"
        ));
        assert!(matches!(
            FeedConfig::from_toml("visibility_margin = -1.0"),
            Err(ConfigError::InvalidValue(key)) if key == "visibility_margin"
        ));
        assert!(matches!(
            FeedConfig::from_toml("cancellation = \"sometimes\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(FeedConfig::default().with_cache_capacity(0).validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let _guard = EnvGuard::new(&ALL_ENV);
        env::set_var(BUFFER_SIZE_ENV, "3");
        env::set_var(FAR_PREFETCH_DELAY_ENV, "400");
        env::set_var(CANCELLATION_ENV, "abort");
        env::set_var(CAPACITY_ENV, "32");

        let config = FeedConfig::from_env().unwrap();
        assert_eq!(config.buffer_size, 3);
        assert_eq!(config.far_prefetch_delay_ms, 400);
        assert_eq!(config.cancellation, CancellationMode::Abort);
        assert_eq!(config.cache.capacity, 32);
    }

    #[test]
    #[serial]
    fn test_env_invalid_values() {
        let _guard = EnvGuard::new(&ALL_ENV);
        for var in ALL_ENV {
            env::remove_var(var);
        }

        env::set_var(BUFFER_SIZE_ENV, "zero");
        assert!(FeedConfig::from_env().is_err());

        env::set_var(BUFFER_SIZE_ENV, "0");
        assert!(FeedConfig::from_env().is_err());

        env::remove_var(BUFFER_SIZE_ENV);
        env::set_var(CANCELLATION_ENV, "eventually");
        assert!(matches!(
            FeedConfig::from_env(),
            Err(ConfigError::InvalidValue(key)) if key == CANCELLATION_ENV
        ));
    }

    #[test]
    #[serial]
    fn test_load_prefers_file_then_env() {
        let _guard = EnvGuard::new(&ALL_ENV);
        for var in ALL_ENV {
            env::remove_var(var);
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.toml");
        FeedConfig::default()
            .with_buffer_size(2)
            .with_cache_capacity(100)
            .save_to_file(&path)
            .unwrap();

        env::set_var(CAPACITY_ENV, "200");
        let config = FeedConfig::load(Some(&path)).unwrap();
        assert_eq!(config.buffer_size, 2);
        assert_eq!(config.cache.capacity, 200);

        let missing = FeedConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(missing.buffer_size, 1);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.toml");

        let config = FeedConfig::default()
            .with_buffer_size(4)
            .with_cancellation(CancellationMode::Abort);
        config.save_to_file(&path).unwrap();

        assert_eq!(FeedConfig::from_file(&path).unwrap(), config);
    }

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }
}
