use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

static SCRIPT_LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:window\.|document\.|top\.|self\.)?location(?:\.href)?\s*=\s*["']([^"']+)["']|location\.(?:replace|assign)\(\s*["']([^"']+)["']\s*\)"#,
    )
    .expect("script navigation pattern is valid")
});

static BACKGROUND_IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"background-image\s*:\s*url\(\s*['"]?([^'")]+)['"]?\s*\)"#)
        .expect("background-image pattern is valid")
});

static REFRESH_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)url\s*=\s*['"]?([^'"]+)"#).expect("refresh pattern is valid"));

/// Pulls image addresses and navigation hints out of fetched markup.
#[derive(Clone, Default)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Content of the first `og:image` meta tag, made absolute against `base`.
    pub fn extract_og_image(&self, html: &str, base: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector =
            Selector::parse("meta[property='og:image'],meta[name='og:image'],meta[itemprop='image']")
                .ok()?;

        let content = document
            .select(&selector)
            .filter_map(|el| el.value().attr("content"))
            .map(str::trim)
            .find(|s| !s.is_empty())?;

        debug!(image = %content, "Found Open Graph image URL");
        absolutize(content, base)
    }

    /// Target of a `<meta http-equiv="refresh">` directive.
    pub fn extract_meta_refresh(&self, html: &str, base: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("meta[http-equiv]").ok()?;

        let content = document.select(&selector).find_map(|el| {
            let is_refresh = el
                .value()
                .attr("http-equiv")
                .map(|v| v.trim().eq_ignore_ascii_case("refresh"))
                .unwrap_or(false);
            if is_refresh {
                el.value().attr("content")
            } else {
                None
            }
        })?;

        let target = REFRESH_URL_RE.captures(content)?.get(1)?.as_str().trim();
        debug!(target = %target, "Found meta refresh target");
        absolutize(target, base)
    }

    /// First `location = "..."`-style navigation found in inline script.
    pub fn extract_script_navigation(&self, html: &str, base: &str) -> Option<String> {
        let caps = SCRIPT_LOCATION_RE.captures(html)?;
        let target = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
        debug!(target = %target, "Found script navigation target");
        absolutize(target, base)
    }

    /// Every CSS `background-image: url(...)` whose address starts with `allowed_prefix`,
    /// in document order, without duplicates.
    pub fn extract_background_images(&self, html: &str, allowed_prefix: &str) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for caps in BACKGROUND_IMAGE_RE.captures_iter(html) {
            let Some(found) = caps.get(1) else { continue };
            let found = found.as_str().trim();
            if found.starts_with(allowed_prefix) && !images.iter().any(|i| i == found) {
                images.push(found.to_string());
            }
        }
        debug!(count = images.len(), "Extracted gallery images");
        images
    }
}

fn absolutize(target: &str, base: &str) -> Option<String> {
    if let Ok(url) = Url::parse(target) {
        return Some(url.to_string());
    }
    Url::parse(base)
        .and_then(|base| base.join(target))
        .map(|url| url.to_string())
        .ok()
}
