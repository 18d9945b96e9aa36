//! Error types for the feed engine

use panofeed_cache::ConfigError;

/// Errors surfaced by the feed engine
///
/// Load and prefetch failures are recovered where they happen: the loader
/// shows a fallback tile, the prefetcher logs and moves on. They are
/// reported through this type for logging and inspection, never returned
/// to the render path.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A mounted image failed to load
    #[error("failed to load {url}: {reason}")]
    LoadFailure { url: String, reason: String },

    /// A speculative fetch failed
    #[error("prefetch of {key} failed: {reason}")]
    PrefetchFailure { key: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for feed engine operations
pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FeedError::LoadFailure {
            url: "https://cdn.example/a.jpg".into(),
            reason: "HTTP status 404".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load https://cdn.example/a.jpg: HTTP status 404"
        );

        let err = FeedError::PrefetchFailure {
            key: "https://cdn.example/b.jpg".into(),
            reason: "timeout".into(),
        };
        assert!(err.to_string().starts_with("prefetch of https://cdn.example/b.jpg"));
    }

    #[test]
    fn test_config_error_converts() {
        fn load() -> FeedResult<()> {
            let parsed: Result<(), ConfigError> =
                Err(ConfigError::InvalidValue("buffer_size".into()));
            parsed?;
            Ok(())
        }
        assert!(matches!(load(), Err(FeedError::Config(_))));
    }
}
