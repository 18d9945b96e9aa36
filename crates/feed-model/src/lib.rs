//! Feed data model shared by the cache, scheduler and window crates.
//!
//! Feed items are owned by the caller and never mutated here; the engine only
//! indexes into the list it was handed.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedItemId(pub String);

impl FeedItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw media source as stored on a post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub preview: Option<String>,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            preview: None,
        }
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }
}

/// What a caller needs to draw a slot before any image has arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Width divided by height.
    pub aspect_ratio: f32,
    pub dominant_color: Option<[u8; 3]>,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self {
            aspect_ratio: 1.0,
            dominant_color: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: FeedItemId,
    pub media: Vec<MediaRef>,
    pub author_avatar: Option<String>,
    #[serde(default)]
    pub placeholder: Placeholder,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, media: Vec<MediaRef>) -> Self {
        Self {
            id: FeedItemId::new(id),
            media,
            author_avatar: None,
            placeholder: Placeholder::default(),
        }
    }

    pub fn with_author_avatar(mut self, url: impl Into<String>) -> Self {
        self.author_avatar = Some(url.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: Placeholder) -> Self {
        self.placeholder = placeholder;
        self
    }

    pub fn primary_media(&self) -> Option<&MediaRef> {
        self.media.first()
    }

    /// Resolved URLs worth warming for this post: the full-size variant of
    /// the first `media_limit` entries (plus their low-res variant when one
    /// exists), then the author avatar. Media are skipped entirely when
    /// `context` does not preload. Non-http URLs are dropped and duplicates
    /// collapse to their first occurrence.
    pub fn prefetch_urls(
        &self,
        context: ImageContext,
        media_limit: usize,
        resolver: &dyn VariantResolver,
    ) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        let mut push = |url: String| {
            if is_http_url(&url) && !urls.contains(&url) {
                urls.push(url);
            }
        };

        let media_limit = if context.config().should_preload {
            media_limit
        } else {
            0
        };
        for media in self.media.iter().take(media_limit) {
            let pair = resolver.resolve(media, context);
            let distinct = pair.has_distinct_low_res();
            push(pair.high_res);
            if distinct {
                push(pair.low_res);
            }
        }

        if let Some(avatar) = &self.author_avatar {
            let avatar = MediaRef::new(avatar.clone());
            push(resolver.resolve(&avatar, ImageContext::Avatar).high_res);
        }

        urls
    }
}

pub fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Where an image is shown. Each context carries its own loading policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageContext {
    FeedThumbnail,
    GridThumbnail,
    FeedFull,
    Fullscreen,
    Avatar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Load priority, 0 (background) to 4 (critical).
    pub priority: u8,
    pub use_blur_preview: bool,
    pub should_preload: bool,
}

/// Contexts at or above this priority load without waiting for visibility.
pub const EAGER_PRIORITY: u8 = 3;

impl ImageContext {
    pub fn config(self) -> ContextConfig {
        match self {
            Self::FeedThumbnail => ContextConfig {
                priority: 1,
                use_blur_preview: true,
                should_preload: false,
            },
            Self::GridThumbnail => ContextConfig {
                priority: 1,
                use_blur_preview: false,
                should_preload: false,
            },
            Self::FeedFull => ContextConfig {
                priority: 2,
                use_blur_preview: true,
                should_preload: true,
            },
            Self::Fullscreen => ContextConfig {
                priority: 4,
                use_blur_preview: true,
                should_preload: true,
            },
            Self::Avatar => ContextConfig {
                priority: 3,
                use_blur_preview: false,
                should_preload: false,
            },
        }
    }

    pub fn is_eager(self) -> bool {
        self.config().priority >= EAGER_PRIORITY
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantPair {
    pub low_res: String,
    pub high_res: String,
}

impl VariantPair {
    pub fn new(low_res: impl Into<String>, high_res: impl Into<String>) -> Self {
        Self {
            low_res: low_res.into(),
            high_res: high_res.into(),
        }
    }

    pub fn single(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            low_res: url.clone(),
            high_res: url,
        }
    }

    pub fn has_distinct_low_res(&self) -> bool {
        !self.low_res.is_empty() && self.low_res != self.high_res
    }
}

/// Maps a raw source to the URLs actually fetched for a context.
///
/// Implementations must be pure: the same input always resolves to the same
/// pair, because cache identity is the resolved URL.
pub trait VariantResolver {
    fn resolve(&self, source: &MediaRef, context: ImageContext) -> VariantPair;
}

impl<F> VariantResolver for F
where
    F: Fn(&MediaRef, ImageContext) -> VariantPair,
{
    fn resolve(&self, source: &MediaRef, context: ImageContext) -> VariantPair {
        self(source, context)
    }
}

/// Uses the stored preview as the low-res variant for blur-up contexts and
/// the original URL everywhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewVariantResolver;

impl VariantResolver for PreviewVariantResolver {
    fn resolve(&self, source: &MediaRef, context: ImageContext) -> VariantPair {
        match (&source.preview, context.config().use_blur_preview) {
            (Some(preview), true) => VariantPair::new(preview.clone(), source.url.clone()),
            _ => VariantPair::single(source.url.clone()),
        }
    }
}
