use crate::PreviewError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// A fetched document together with the address it was finally served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    /// Compares parsed addresses, so a request that only normalizes differently (case,
    /// implicit root path, dot segments) does not count as a redirect.
    pub fn was_redirected(&self) -> bool {
        match (Url::parse(&self.requested_url), Url::parse(&self.final_url)) {
            (Ok(requested), Ok(served)) => requested != served,
            _ => self.final_url != self.requested_url,
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        debug!("Fetcher initialized with default configuration");
        Self::new_with_config(FetcherConfig::default()).unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to a plain HTTP client");
            Self::with_client(Client::default())
        })
    }

    pub fn new_with_custom_config(timeout: Duration, user_agent: &str) -> Result<Self, PreviewError> {
        Self::new_with_config(FetcherConfig {
            user_agent: user_agent.to_string(),
            timeout,
            ..FetcherConfig::default()
        })
    }

    /// Creates a Fetcher with custom configuration
    pub fn new_with_config(config: FetcherConfig) -> Result<Self, PreviewError> {
        let mut client_builder = Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .pool_max_idle_per_host(4);

        let headers = config.headers.unwrap_or_else(default_headers);
        client_builder = client_builder.default_headers(headers);

        let client = client_builder.build().map_err(|e| {
            error!(error = %e, "Failed to create HTTP client");
            PreviewError::FetchError(format!("Failed to initialize HTTP client: {e}"))
        })?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GETs `url`, following redirects, and returns the final address with the body.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, PreviewError> {
        debug!(url = %url, "Starting fetch request");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                PreviewError::TimeoutError(format!("{url}: {e}"))
            } else {
                PreviewError::FetchError(e.to_string())
            }
        })?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            warn!(error = %e, url = %url, "Failed to read response body");
            PreviewError::FetchError(e.to_string())
        })?;

        debug!(
            url = %url,
            final_url = %final_url,
            status,
            content_length = body.len(),
            "Fetched page"
        );

        Ok(FetchedPage {
            requested_url: url.to_string(),
            final_url,
            status,
            body,
        })
    }

    /// Fetches a page whose markup is scraped; non-success statuses are errors.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn fetch_html(&self, url: &str) -> Result<String, PreviewError> {
        let page = self.fetch_page(url).await?;
        if !(200..300).contains(&page.status) {
            return Err(PreviewError::FetchError(format!(
                "{url} returned status {}",
                page.status
            )));
        }
        Ok(page.body)
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers
}

/// HTTP client options used by the proxy.
///
/// # Examples
/// ```ignore
/// let fetcher = Fetcher::new_with_config(FetcherConfig {
///     timeout: Duration::from_secs(5),
///     ..FetcherConfig::default()
/// })?;
/// ```
pub struct FetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub headers: Option<HeaderMap>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            max_redirects: 10,
            headers: None,
        }
    }
}

impl FetcherConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(requested: &str, served: &str) -> FetchedPage {
        FetchedPage {
            requested_url: requested.to_string(),
            final_url: served.to_string(),
            status: 200,
            body: String::new(),
        }
    }

    #[test]
    fn test_normalization_is_not_a_redirect() {
        assert!(!page("HTTP://Example.COM", "http://example.com/").was_redirected());
        assert!(!page("https://example.com/a/../b", "https://example.com/b").was_redirected());
        assert!(page("https://bit.ly/x", "https://example.com/x").was_redirected());
    }
}
