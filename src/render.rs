//! Turns classifications into the elements a preview container should hold.

use serde::Serialize;
use url::Url;

use crate::hosts::{AliasTable, IBB_HOST, IFH_HOST};
use crate::utils::host_within;
use crate::Classification;

pub const DEFAULT_HEIGHT_PX: u32 = 400;

pub const TRANSPORT_ERROR_MESSAGE: &str = "WebSocket error";
pub const LOAD_ERROR_MESSAGE: &str =
    "Could not load the preview. The site may not allow framing, or there may be a network problem.";

const TRANSPORT_FAULT_SIGNATURE: &str = "WebSocket connection to 'wss://hw.playentry.org:23518/socket.io/";

/// Host suffix to border colour, most specific first.
const BORDER_COLORS: &[(&str, &str)] = &[
    ("bloupla.net", "#0000DD"),
    ("firebasestorage.googleapis.com", "#0000DD"),
    ("playentry.org", "#00DD00"),
    ("i.postimg.cc", "#7777EE"),
    ("postimg.cc", "#7777EE"),
    ("baboboximg.onrender.com", "#FFA500"),
    ("youtube.com", "#FF0000"),
    ("youtu.be", "#FF0000"),
    ("naver.me", "#00DD00"),
    ("tree.joody.day", "#008800"),
    ("colormytree.me", "#008800"),
    ("snowman.quizby.me", "#D2E4F5"),
    ("quizby.me", "#E9E7E1"),
];

const DEFAULT_BORDER_COLOR: &str = "black";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Image,
    Video,
    Frame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewElement {
    pub kind: ElementKind,
    pub src: String,
    pub height_px: u32,
    pub border_color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RenderPlan {
    /// Remove the link and its container from the page.
    Remove,
    Show(Vec<PreviewElement>),
}

/// What to do after an element failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackAction {
    Replace(PreviewElement),
    ShowError(&'static str),
}

pub fn border_color(url: &str) -> &'static str {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return DEFAULT_BORDER_COLOR;
    };

    match AliasTable::global().canonicalize(&host) {
        Some(IFH_HOST) => return "#DDDDDD",
        Some(IBB_HOST) => return "#50bcdf",
        _ => {}
    }

    BORDER_COLORS
        .iter()
        .find(|(suffix, _)| host_within(&host, suffix))
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_BORDER_COLOR)
}

/// Elements for `classification`; borders are coloured after the link the user posted.
pub fn plan(original_url: &str, classification: &Classification) -> RenderPlan {
    let border_color = border_color(original_url);
    let element = |kind, src: &str, height_px| PreviewElement {
        kind,
        src: src.to_string(),
        height_px,
        border_color,
    };

    match classification {
        Classification::Blocked => RenderPlan::Remove,
        Classification::Image { url } => {
            RenderPlan::Show(vec![element(ElementKind::Image, url, DEFAULT_HEIGHT_PX)])
        }
        Classification::Video { url } => {
            RenderPlan::Show(vec![element(ElementKind::Video, url, DEFAULT_HEIGHT_PX)])
        }
        Classification::MultiImage { urls } => RenderPlan::Show(
            urls.iter()
                .map(|url| element(ElementKind::Image, url, DEFAULT_HEIGHT_PX))
                .collect(),
        ),
        Classification::Frame { url, height_hint } => RenderPlan::Show(vec![element(
            ElementKind::Frame,
            url,
            height_hint.unwrap_or(DEFAULT_HEIGHT_PX),
        )]),
    }
}

/// Images that fail to decode are retried as video; anything else becomes an inline
/// error message.
pub fn on_load_failure(element: &PreviewElement, transport_fault_seen: bool) -> FallbackAction {
    match element.kind {
        ElementKind::Image => FallbackAction::Replace(PreviewElement {
            kind: ElementKind::Video,
            ..element.clone()
        }),
        ElementKind::Video | ElementKind::Frame if transport_fault_seen => {
            FallbackAction::ShowError(TRANSPORT_ERROR_MESSAGE)
        }
        ElementKind::Video | ElementKind::Frame => FallbackAction::ShowError(LOAD_ERROR_MESSAGE),
    }
}

/// An image that "loads" with zero natural size is treated as a failed load.
pub fn is_empty_image(natural_width: u32, natural_height: u32) -> bool {
    natural_width == 0 || natural_height == 0
}

/// Remembers whether the page's realtime transport has failed, which changes the error
/// text shown for broken previews.
#[derive(Debug, Clone, Default)]
pub struct TransportFaultMonitor {
    seen: bool,
}

impl TransportFaultMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, error_message: &str) {
        if error_message.contains(TRANSPORT_FAULT_SIGNATURE) {
            self.seen = true;
        }
    }

    pub fn seen(&self) -> bool {
        self.seen
    }
}
