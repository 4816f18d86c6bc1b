#[cfg(feature = "cache")]
use crate::Cache;
use crate::proxy::NetworkProxy;
use crate::rules::{self, Lookup, RuleContext, Target, Verdict, PRE_RESOLUTION_RULES, RULES};
use crate::utils::{decode_once, host_within};
use crate::{Classification, Classify, HttpProxy, OfflineProxy, PreviewError};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Maps observed links to [`Classification`]s, delegating network work to a proxy.
#[derive(Clone)]
pub struct UrlClassifier {
    proxy: Arc<dyn NetworkProxy>,
    ctx: RuleContext,
    lookup_timeout: Duration,
    #[cfg(feature = "cache")]
    cache: Cache,
}

impl Default for UrlClassifier {
    fn default() -> Self {
        Self::new(Arc::new(HttpProxy::default()))
    }
}

impl UrlClassifier {
    pub fn new(proxy: Arc<dyn NetworkProxy>) -> Self {
        Self::new_with_config(proxy, ClassifierConfig::default())
    }

    /// A classifier that never touches the network.
    pub fn offline() -> Self {
        Self::new(Arc::new(OfflineProxy))
    }

    pub fn new_with_config(proxy: Arc<dyn NetworkProxy>, config: ClassifierConfig) -> Self {
        debug!(?config, "Initializing UrlClassifier");
        let youtube_embed_host = if config.privacy_enhanced_embeds {
            "www.youtube-nocookie.com"
        } else {
            "www.youtube.com"
        };

        Self {
            proxy,
            ctx: RuleContext {
                primary_domain: config.primary_domain,
                youtube_embed_host: youtube_embed_host.to_string(),
            },
            lookup_timeout: config.lookup_timeout,
            #[cfg(feature = "cache")]
            cache: Cache::new(config.cache_capacity),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn classify(&self, raw: &str) -> Classification {
        let raw = raw.trim();

        #[cfg(feature = "cache")]
        if let Some(cached) = self.cache.get(raw) {
            return cached;
        }

        let outcome = self.classify_uncached(raw).await;
        debug!(
            kind = outcome.classification.kind(),
            degraded = outcome.degraded,
            "Classified link"
        );

        // Fallbacks from a failed proxy call are retried on the next sighting.
        #[cfg(feature = "cache")]
        if !outcome.degraded {
            self.cache.set(raw.to_string(), outcome.classification.clone());
        }

        outcome.classification
    }

    /// Classifies every link concurrently, preserving input order.
    pub async fn classify_all(&self, urls: &[&str]) -> Vec<Classification> {
        let futures = urls.iter().map(|url| self.classify(url));
        futures::future::join_all(futures).await
    }

    async fn classify_uncached(&self, raw: &str) -> Outcome {
        let input = match Target::parse(raw) {
            Ok(target) => target,
            Err(e) => {
                debug!(error = %e, "Unparseable link, showing as frame");
                return Outcome::settled(Classification::frame(raw));
            }
        };

        if let Some((rule, Verdict::Final(classification))) =
            rules::evaluate(PRE_RESOLUTION_RULES, &input, &self.ctx)
        {
            debug!(rule, "Matched before resolution");
            return Outcome::settled(classification);
        }

        let (resolved, resolution_failed) = match self.resolve(raw).await {
            Ok(resolved) => (resolved, false),
            Err(e) => {
                e.log();
                (raw.to_string(), true)
            }
        };
        let resolved = self.upgrade_primary_scheme(&resolved);
        let decoded = decode_once(&resolved).into_owned();

        let target = match Target::parse(&decoded) {
            Ok(target) => target,
            Err(e) => {
                debug!(error = %e, decoded = %decoded, "Decoded link no longer parses");
                return Outcome::new(Classification::frame(decoded), resolution_failed);
            }
        };

        match rules::evaluate(RULES, &target, &self.ctx) {
            Some((rule, Verdict::Final(classification))) => {
                debug!(rule, "Matched rule");
                Outcome::new(classification, resolution_failed)
            }
            Some((rule, Verdict::Lookup { request, fallback })) => {
                let op = request.op();
                debug!(rule, op, "Matched rule, delegating lookup");
                match self.lookup(request).await {
                    Ok(classification) => Outcome::new(classification, resolution_failed),
                    Err(e) => {
                        e.log();
                        warn!(op, "Lookup failed, using fallback");
                        Outcome::new(fallback, true)
                    }
                }
            }
            None => Outcome::new(Classification::frame(target.text), resolution_failed),
        }
    }

    /// Final address of `url` per the proxy; an empty answer means "unchanged".
    async fn resolve(&self, url: &str) -> Result<String, PreviewError> {
        let resolved = self
            .with_timeout("resolveRedirect", self.proxy.resolve_redirect(url))
            .await?;
        if resolved.trim().is_empty() {
            return Ok(url.to_string());
        }
        Ok(resolved)
    }

    async fn lookup(&self, request: Lookup) -> Result<Classification, PreviewError> {
        let op = request.op();
        match request {
            Lookup::OgImage { provider, code } => self
                .with_timeout(op, self.proxy.fetch_og_image(provider, &code))
                .await
                .map(Classification::image),
            Lookup::Gallery { code } => self
                .with_timeout(op, self.proxy.fetch_gallery_images(&code))
                .await
                .and_then(|urls| {
                    Classification::from_images(urls)
                        .ok_or_else(|| PreviewError::proxy(op, "gallery is empty"))
                }),
        }
    }

    async fn with_timeout<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, PreviewError>>,
    ) -> Result<T, PreviewError> {
        tokio::time::timeout(self.lookup_timeout, fut)
            .await
            .map_err(|_| {
                PreviewError::TimeoutError(format!("{op} exceeded {:?}", self.lookup_timeout))
            })?
    }

    /// Mixed content is refused on the primary site, so its own links are forced to https.
    fn upgrade_primary_scheme(&self, url: &str) -> String {
        let Ok(mut parsed) = Url::parse(url) else {
            return url.to_string();
        };
        let on_primary = parsed
            .host_str()
            .map(|host| host_within(host, &self.ctx.primary_domain))
            .unwrap_or(false);
        if parsed.scheme() == "http" && on_primary && parsed.set_scheme("https").is_ok() {
            return parsed.to_string();
        }
        url.to_string()
    }
}

/// A classification, and whether it is a fallback taken because the proxy failed.
struct Outcome {
    classification: Classification,
    degraded: bool,
}

impl Outcome {
    fn new(classification: Classification, degraded: bool) -> Self {
        Self {
            classification,
            degraded,
        }
    }

    fn settled(classification: Classification) -> Self {
        Self::new(classification, false)
    }
}

#[async_trait]
impl Classify for UrlClassifier {
    async fn classify(&self, url: &str) -> Classification {
        UrlClassifier::classify(self, url).await
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub primary_domain: String,
    /// Embed YouTube through its no-cookie domain.
    pub privacy_enhanced_embeds: bool,
    /// Upper bound on every proxy call.
    pub lookup_timeout: Duration,
    pub cache_capacity: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            primary_domain: "playentry.org".to_string(),
            privacy_enhanced_embeds: false,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            cache_capacity: 1000,
        }
    }
}

impl ClassifierConfig {
    pub fn with_primary_domain(mut self, domain: impl Into<String>) -> Self {
        self.primary_domain = domain.into();
        self
    }

    pub fn with_privacy_enhanced_embeds(mut self, enabled: bool) -> Self {
        self.privacy_enhanced_embeds = enabled;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
