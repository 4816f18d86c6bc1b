//! Per-link state for links discovered on a page.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, instrument};
use url::Url;

use crate::render::{self, RenderPlan};
use crate::Classify;

const PAGE_ORIGIN: &str = "https://playentry.org";

static TEXT_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s]+").expect("text link pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Discovered,
    /// Skipped by later ticks until the classification arrives.
    AwaitingClassification,
    Rendered(RenderPlan),
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewContainer {
    pub original_url: String,
    pub state: LinkState,
}

impl PreviewContainer {
    fn is_settled(&self) -> bool {
        matches!(self.state, LinkState::Rendered(_) | LinkState::Blocked)
    }
}

/// The link an anchor actually points at. Site-internal `/redirect?external=` wrappers are
/// unwrapped and anything that is not http(s) is ignored.
pub fn extract_link_target(href: &str) -> Option<String> {
    let href = href.trim();
    let base = Url::parse(PAGE_ORIGIN).ok()?;
    let url = base.join(href).ok()?;

    let target = if url.path() == "/redirect" {
        let external = url
            .query_pairs()
            .find(|(key, _)| key == "external")
            .map(|(_, value)| value.into_owned())?;
        Url::parse(&external).ok()?
    } else {
        url
    };

    match target.scheme() {
        "http" | "https" => Some(target.to_string()),
        _ => None,
    }
}

/// Bare links typed into plain text.
pub fn find_text_links(text: &str) -> Vec<&str> {
    TEXT_LINK_RE.find_iter(text).map(|m| m.as_str()).collect()
}

#[derive(Debug, Default)]
pub struct LinkTracker {
    seen: HashSet<String>,
    containers: Vec<PreviewContainer>,
}

impl LinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers anchors by their `href`. Returns how many new containers were created.
    pub fn discover<'a>(&mut self, hrefs: impl IntoIterator<Item = &'a str>) -> usize {
        hrefs
            .into_iter()
            .filter_map(extract_link_target)
            .filter(|target| self.track(target.clone()))
            .count()
    }

    pub fn discover_text(&mut self, text: &str) -> usize {
        find_text_links(text)
            .into_iter()
            .filter(|link| self.track(link.to_string()))
            .count()
    }

    fn track(&mut self, url: String) -> bool {
        if !self.seen.insert(url.clone()) {
            return false;
        }
        debug!(url = %url, "Discovered link");
        self.containers.push(PreviewContainer {
            original_url: url,
            state: LinkState::Discovered,
        });
        true
    }

    pub fn has_seen(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn containers(&self) -> &[PreviewContainer] {
        &self.containers
    }

    pub fn container(&self, url: &str) -> Option<&PreviewContainer> {
        self.containers.iter().find(|c| c.original_url == url)
    }

    /// One polling tick: classifies visible, unprocessed containers in discovery order.
    /// Returns how many containers were settled.
    #[instrument(level = "debug", skip_all)]
    pub async fn poll<C, F>(&mut self, classifier: &C, is_visible: F) -> usize
    where
        C: Classify + ?Sized,
        F: Fn(&str) -> bool,
    {
        let mut settled = 0;
        for container in self.containers.iter_mut() {
            if container.is_settled() || container.state == LinkState::AwaitingClassification {
                continue;
            }
            if !is_visible(&container.original_url) {
                continue;
            }

            container.state = LinkState::AwaitingClassification;
            let classification = classifier.classify(&container.original_url).await;
            container.state = match render::plan(&container.original_url, &classification) {
                RenderPlan::Remove => LinkState::Blocked,
                plan => LinkState::Rendered(plan),
            };
            settled += 1;
        }
        settled
    }
}
