use std::collections::HashSet;

use tracing::{debug, instrument, warn};
use url::Url;

use crate::utils::normalize_host;
use crate::{Fetcher, MetadataExtractor};

pub const DEFAULT_SHORT_LINK_DOMAINS: &[&str] =
    &["naver.me", "bit.ly", "tinyurl.com", "goo.gl", "kutt.it"];

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub short_link_domains: HashSet<String>,
    /// Number of expansions attempted per call. A result that is still short-link
    /// shaped after the last hop is returned as-is.
    pub max_hops: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            short_link_domains: DEFAULT_SHORT_LINK_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            max_hops: 1,
        }
    }
}

impl ResolverConfig {
    pub fn with_short_link_domain(mut self, domain: impl Into<String>) -> Self {
        self.short_link_domains
            .insert(normalize_host(&domain.into()));
        self
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }
}

/// Expands short links to the address they ultimately point at.
#[derive(Clone)]
pub struct ShortLinkResolver {
    fetcher: Fetcher,
    extractor: MetadataExtractor,
    config: ResolverConfig,
}

impl ShortLinkResolver {
    pub fn new(fetcher: Fetcher, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            extractor: MetadataExtractor::new(),
            config,
        }
    }

    pub fn is_short_link(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        parsed
            .host_str()
            .map(|host| self.config.short_link_domains.contains(&normalize_host(host)))
            .unwrap_or(false)
    }

    /// Returns the expanded address of `url`, or `url` itself when it is not a short link
    /// or the expansion fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, url: &str) -> String {
        let mut current = url.to_string();

        for hop in 0..self.config.max_hops {
            if !self.is_short_link(&current) {
                break;
            }
            match self.expand_once(&current).await {
                Some(next) if next != current => {
                    debug!(hop, from = %current, to = %next, "Expanded short link");
                    current = next;
                }
                _ => break,
            }
        }

        current
    }

    async fn expand_once(&self, url: &str) -> Option<String> {
        let page = match self.fetcher.fetch_page(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %url, error = %e, "Short link expansion failed, keeping original");
                return None;
            }
        };

        if page.was_redirected() {
            return Some(page.final_url);
        }

        self.extractor
            .extract_meta_refresh(&page.body, &page.final_url)
            .or_else(|| {
                self.extractor
                    .extract_script_navigation(&page.body, &page.final_url)
            })
    }
}
