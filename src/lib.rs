use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "cache")]
mod cache;
mod classifier;
mod error;
mod extractor;
mod fetcher;
pub mod hosts;
#[cfg(feature = "logging")]
mod logging;
pub mod policy;
pub mod proxy;
pub mod render;
mod resolver;
pub mod rules;
pub mod tracker;
mod utils;

#[cfg(feature = "cache")]
pub use cache::Cache;
pub use classifier::{ClassifierConfig, UrlClassifier};
pub use error::PreviewError;
pub use extractor::MetadataExtractor;
pub use fetcher::{FetchedPage, Fetcher, FetcherConfig};
#[cfg(feature = "logging")]
pub use logging::{log_classification_card, log_error_card, setup_logging, LogConfig, LogLevelGuard};
pub use policy::{CompiledRuleSet, DomainPolicy, PolicyConfig};
pub use proxy::{HttpProxy, ImageProvider, NetworkProxy, OfflineProxy};
pub use resolver::{ResolverConfig, ShortLinkResolver};

/// What a link should be shown as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Classification {
    Image {
        url: String,
    },
    /// Only produced by the renderer when an image fails to decode.
    Video {
        url: String,
    },
    /// Always holds more than one address.
    MultiImage {
        urls: Vec<String>,
    },
    Frame {
        url: String,
        #[serde(default, rename = "heightHint", skip_serializing_if = "Option::is_none")]
        height_hint: Option<u32>,
    },
    /// The link must be removed from the page.
    Blocked,
}

impl Classification {
    pub fn image(url: impl Into<String>) -> Self {
        Classification::Image { url: url.into() }
    }

    pub fn frame(url: impl Into<String>) -> Self {
        Classification::Frame {
            url: url.into(),
            height_hint: None,
        }
    }

    /// `Image` for one address, `MultiImage` for several, `None` for none.
    pub fn from_images(mut urls: Vec<String>) -> Option<Self> {
        match urls.len() {
            0 => None,
            1 => urls.pop().map(Classification::image),
            _ => Some(Classification::MultiImage { urls }),
        }
    }

    pub fn urls(&self) -> Vec<&str> {
        match self {
            Classification::Image { url }
            | Classification::Video { url }
            | Classification::Frame { url, .. } => vec![url.as_str()],
            Classification::MultiImage { urls } => urls.iter().map(String::as_str).collect(),
            Classification::Blocked => Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classification::Image { .. } => "image",
            Classification::Video { .. } => "video",
            Classification::MultiImage { .. } => "multi-image",
            Classification::Frame { .. } => "frame",
            Classification::Blocked => "blocked",
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Classification::Blocked)
    }
}

#[async_trait]
pub trait Classify {
    /// Never fails: every input, however malformed, maps to some classification.
    async fn classify(&self, url: &str) -> Classification;
}
