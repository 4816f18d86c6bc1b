//! Privileged network operations the classifier delegates to.
//!
//! The classifier never fetches anything itself. Redirect expansion and page scraping go
//! through a [`NetworkProxy`], which in the extension runs in the background context and
//! is reached with [`ProxyRequest`] / [`ProxyResponse`] messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::resolver::{ResolverConfig, ShortLinkResolver};
use crate::{Fetcher, MetadataExtractor, PreviewError};

pub const POSTIMG_CDN_PREFIX: &str = "https://i.postimg.cc/";

/// Image hosts whose share links carry an opaque code instead of an image address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    Ibb,
    Postimg,
}

impl ImageProvider {
    pub fn page_url(&self, code: &str) -> String {
        match self {
            ImageProvider::Ibb => format!("https://ibb.co/{code}"),
            ImageProvider::Postimg => format!("https://postimg.cc/{code}"),
        }
    }

    pub fn gallery_url(code: &str) -> String {
        format!("https://postimg.cc/gallery/{code}")
    }
}

#[async_trait]
pub trait NetworkProxy: Send + Sync {
    /// Final address of `url` after redirects; `url` itself when nothing redirects.
    async fn resolve_redirect(&self, url: &str) -> Result<String, PreviewError>;

    /// The `og:image` of the provider's page for `code`.
    async fn fetch_og_image(
        &self,
        provider: ImageProvider,
        code: &str,
    ) -> Result<String, PreviewError>;

    /// CDN image addresses listed on a gallery page. Never empty on success.
    async fn fetch_gallery_images(&self, code: &str) -> Result<Vec<String>, PreviewError>;
}

/// Proxy backed by real HTTP requests.
#[derive(Clone)]
pub struct HttpProxy {
    fetcher: Fetcher,
    resolver: ShortLinkResolver,
    extractor: MetadataExtractor,
}

impl Default for HttpProxy {
    fn default() -> Self {
        Self::new(Fetcher::new(), ResolverConfig::default())
    }
}

impl HttpProxy {
    pub fn new(fetcher: Fetcher, resolver_config: ResolverConfig) -> Self {
        Self {
            resolver: ShortLinkResolver::new(fetcher.clone(), resolver_config),
            fetcher,
            extractor: MetadataExtractor::new(),
        }
    }

    /// `og:image` of an arbitrary page.
    pub async fn og_image_at(&self, page_url: &str) -> Result<String, PreviewError> {
        let html = self
            .fetcher
            .fetch_html(page_url)
            .await
            .map_err(|e| PreviewError::proxy("fetchOgImage", e.to_string()))?;
        self.extractor
            .extract_og_image(&html, page_url)
            .ok_or_else(|| PreviewError::proxy("fetchOgImage", format!("no og:image on {page_url}")))
    }

    pub async fn gallery_at(&self, gallery_url: &str) -> Result<Vec<String>, PreviewError> {
        let html = self
            .fetcher
            .fetch_html(gallery_url)
            .await
            .map_err(|e| PreviewError::proxy("fetchGalleryImages", e.to_string()))?;
        let images = self
            .extractor
            .extract_background_images(&html, POSTIMG_CDN_PREFIX);
        if images.is_empty() {
            return Err(PreviewError::proxy(
                "fetchGalleryImages",
                format!("no gallery images on {gallery_url}"),
            ));
        }
        Ok(images)
    }
}

#[async_trait]
impl NetworkProxy for HttpProxy {
    #[instrument(level = "debug", skip(self))]
    async fn resolve_redirect(&self, url: &str) -> Result<String, PreviewError> {
        Ok(self.resolver.resolve(url).await)
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_og_image(
        &self,
        provider: ImageProvider,
        code: &str,
    ) -> Result<String, PreviewError> {
        self.og_image_at(&provider.page_url(code)).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_gallery_images(&self, code: &str) -> Result<Vec<String>, PreviewError> {
        self.gallery_at(&ImageProvider::gallery_url(code)).await
    }
}

/// Proxy that never touches the network: redirects resolve to themselves and every
/// lookup fails, so classification degrades to frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProxy;

#[async_trait]
impl NetworkProxy for OfflineProxy {
    async fn resolve_redirect(&self, url: &str) -> Result<String, PreviewError> {
        Ok(url.to_string())
    }

    async fn fetch_og_image(
        &self,
        _provider: ImageProvider,
        _code: &str,
    ) -> Result<String, PreviewError> {
        Err(PreviewError::proxy("fetchOgImage", "offline"))
    }

    async fn fetch_gallery_images(&self, _code: &str) -> Result<Vec<String>, PreviewError> {
        Err(PreviewError::proxy("fetchGalleryImages", "offline"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ProxyRequest {
    ResolveRedirect { url: String },
    FetchOgImage { provider: ImageProvider, code: String },
    FetchGalleryImages { code: String },
}

impl ProxyRequest {
    pub fn op(&self) -> &'static str {
        match self {
            ProxyRequest::ResolveRedirect { .. } => "resolveRedirect",
            ProxyRequest::FetchOgImage { .. } => "fetchOgImage",
            ProxyRequest::FetchGalleryImages { .. } => "fetchGalleryImages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProxyValue {
    Url(String),
    Urls(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ProxyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    pub fn ok(value: ProxyValue) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Answers one proxy message. Failures are reported in the response, never raised.
pub async fn dispatch(proxy: &dyn NetworkProxy, request: ProxyRequest) -> ProxyResponse {
    debug!(op = request.op(), "Dispatching proxy request");
    let result = match request {
        ProxyRequest::ResolveRedirect { url } => {
            proxy.resolve_redirect(&url).await.map(ProxyValue::Url)
        }
        ProxyRequest::FetchOgImage { provider, code } => proxy
            .fetch_og_image(provider, &code)
            .await
            .map(ProxyValue::Url),
        ProxyRequest::FetchGalleryImages { code } => proxy
            .fetch_gallery_images(&code)
            .await
            .map(ProxyValue::Urls),
    };

    match result {
        Ok(value) => ProxyResponse::ok(value),
        Err(e) => {
            e.log();
            ProxyResponse::failed(e.to_string())
        }
    }
}

/// Parses a JSON message and answers it as JSON.
pub async fn dispatch_json(proxy: &dyn NetworkProxy, message: &str) -> Result<String, PreviewError> {
    let request: ProxyRequest = serde_json::from_str(message)?;
    let response = dispatch(proxy, request).await;
    Ok(serde_json::to_string(&response)?)
}
