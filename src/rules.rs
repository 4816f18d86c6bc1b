//! Priority-ordered rewrite rules.
//!
//! Each [`Rule`] inspects a parsed [`Target`] and either claims it with a [`Verdict`] or
//! passes. Tables are evaluated top to bottom and the first claim wins.

use url::Url;

use crate::hosts::{AliasTable, IBB_HOST, IFH_HOST};
use crate::proxy::ImageProvider;
use crate::utils::{decode_layers, host_within, normalize_host};
use crate::Classification;

/// Decoding depth used when looking for sign-out paths.
pub const MAX_DECODE_LAYERS: usize = 3;

pub const PROJECT_PREVIEW_HEIGHT: u32 = 395;

const FIREBASE_IMAGE_TEMPLATE: &str =
    "https://firebasestorage.googleapis.com/v0/b/imgshare-2.appspot.com/o/";

/// A parsed URL with its host normalized and, for aliased image hosts, canonicalized.
#[derive(Debug, Clone)]
pub struct Target {
    pub text: String,
    pub url: Url,
    pub host: String,
    pub canonical: Option<&'static str>,
}

impl Target {
    pub fn parse(text: &str) -> Result<Self, url::ParseError> {
        let text = text.trim();
        let url = Url::parse(text)?;
        let host = url.host_str().map(normalize_host).unwrap_or_default();
        let canonical = AliasTable::global().canonicalize(&host);
        Ok(Self {
            text: text.to_string(),
            url,
            host,
            canonical,
        })
    }

    /// Non-empty path segments, so `/a/` and `/a` look the same.
    pub fn segments(&self) -> Vec<&str> {
        self.url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    }

    fn host_is(&self, hosts: &[&str]) -> bool {
        hosts.contains(&self.host.as_str())
    }
}

/// Settings the rules read.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub primary_domain: String,
    pub youtube_embed_host: String,
}

impl Default for RuleContext {
    fn default() -> Self {
        Self {
            primary_domain: "playentry.org".to_string(),
            youtube_embed_host: "www.youtube.com".to_string(),
        }
    }
}

/// Proxy work a rule can ask for. Redirects are resolved before the table runs, so they
/// never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    OgImage { provider: ImageProvider, code: String },
    Gallery { code: String },
}

impl Lookup {
    /// Name of the proxy operation that answers this lookup.
    pub fn op(&self) -> &'static str {
        match self {
            Lookup::OgImage { .. } => "fetchOgImage",
            Lookup::Gallery { .. } => "fetchGalleryImages",
        }
    }
}

/// Outcome of a matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Final(Classification),
    /// The answer needs a proxy lookup; `fallback` applies when the lookup fails.
    Lookup {
        request: Lookup,
        fallback: Classification,
    },
}

#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    apply: fn(&Target, &RuleContext) -> Option<Verdict>,
}

impl Rule {
    pub fn apply(&self, target: &Target, ctx: &RuleContext) -> Option<Verdict> {
        (self.apply)(target, ctx)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

/// Rules that are safe to run on the raw input before any network traffic.
pub static PRE_RESOLUTION_RULES: &[Rule] = &[
    Rule {
        name: "sign-out-block",
        apply: sign_out_block,
    },
    Rule {
        name: "embed-passthrough",
        apply: embed_passthrough,
    },
];

/// The full table, in evaluation order.
pub static RULES: &[Rule] = &[
    Rule {
        name: "sign-out-block",
        apply: sign_out_block,
    },
    Rule {
        name: "embed-passthrough",
        apply: embed_passthrough,
    },
    Rule {
        name: "multi-image-relay",
        apply: multi_image_relay,
    },
    Rule {
        name: "alias-image-host",
        apply: alias_image_host,
    },
    Rule {
        name: "opaque-short-code",
        apply: opaque_short_code,
    },
    Rule {
        name: "direct-image",
        apply: direct_image,
    },
    Rule {
        name: "video-platform",
        apply: video_platform,
    },
    Rule {
        name: "world-truncation",
        apply: world_truncation,
    },
    Rule {
        name: "project-preview",
        apply: project_preview,
    },
    Rule {
        name: "fallback",
        apply: fallback,
    },
];

/// First claim in `rules`, with the name of the rule that made it.
pub fn evaluate(rules: &[Rule], target: &Target, ctx: &RuleContext) -> Option<(&'static str, Verdict)> {
    rules
        .iter()
        .find_map(|rule| rule.apply(target, ctx).map(|verdict| (rule.name, verdict)))
}

/// True when any decoding of `text` addresses a sign-out path on `primary_domain` or one
/// of its subdomains.
pub fn is_sign_out(text: &str, primary_domain: &str) -> bool {
    decode_layers(text.trim(), MAX_DECODE_LAYERS)
        .iter()
        .any(|layer| {
            let Ok(url) = Url::parse(layer) else {
                return false;
            };
            let Some(host) = url.host_str() else {
                return false;
            };
            host_within(host, primary_domain)
                && url
                    .path()
                    .trim_start_matches('/')
                    .to_ascii_lowercase()
                    .starts_with("signout")
        })
}

fn sign_out_block(target: &Target, ctx: &RuleContext) -> Option<Verdict> {
    is_sign_out(&target.text, &ctx.primary_domain).then_some(Verdict::Final(Classification::Blocked))
}

fn embed_passthrough(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    let segments = target.segments();
    let is_embed = match target.host.as_str() {
        "www.youtube.com" | "youtube.com" | "www.youtube-nocookie.com" | "youtube-nocookie.com" => {
            segments.len() >= 2 && segments[0] == "embed"
        }
        "streamable.com" => segments.len() >= 2 && segments[0] == "e",
        _ => false,
    };
    is_embed.then(|| Verdict::Final(Classification::frame(&target.text)))
}

fn multi_image_relay(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    if target.host != "bloupla.net" || target.segments() != ["img"] {
        return None;
    }
    let codes = target.url.query()?.strip_prefix('=')?;
    let urls = codes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| format!("{FIREBASE_IMAGE_TEMPLATE}{code}?alt=media"))
        .collect();
    Classification::from_images(urls).map(Verdict::Final)
}

fn ifh_image(code: &str) -> String {
    format!("https://{IFH_HOST}/g/{code}")
}

fn alias_image_host(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    if target.canonical != Some(IFH_HOST) {
        return None;
    }
    let is_alias = target.host != IFH_HOST;
    let segments = target.segments();

    match segments.as_slice() {
        [first, ..] if first.starts_with("v-") || first.starts_with("i-") => {
            let urls = first[2..]
                .split('.')
                .filter(|code| !code.is_empty())
                .map(ifh_image)
                .collect();
            Classification::from_images(urls).map(Verdict::Final)
        }
        ["g", code, ..] if is_alias => Some(Verdict::Final(Classification::image(ifh_image(code)))),
        _ if !is_alias => Some(Verdict::Final(Classification::image(&target.text))),
        _ => None,
    }
}

fn opaque_short_code(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    let segments = target.segments();

    if target.canonical == Some(IBB_HOST) {
        let [code] = segments.as_slice() else {
            return None;
        };
        let mut canonical_url = target.url.clone();
        let fallback_url = match canonical_url.set_host(Some(IBB_HOST)) {
            Ok(()) => canonical_url.to_string(),
            Err(_) => target.text.clone(),
        };
        return Some(Verdict::Lookup {
            request: Lookup::OgImage {
                provider: ImageProvider::Ibb,
                code: code.to_string(),
            },
            fallback: Classification::frame(fallback_url),
        });
    }

    if target.host_is(&["postimg.cc", "www.postimg.cc"]) {
        let request = match segments.as_slice() {
            ["gallery", code] => Lookup::Gallery {
                code: code.to_string(),
            },
            [code] => Lookup::OgImage {
                provider: ImageProvider::Postimg,
                code: code.to_string(),
            },
            _ => return None,
        };
        return Some(Verdict::Lookup {
            request,
            fallback: Classification::frame(&target.text),
        });
    }

    None
}

fn direct_image(target: &Target, ctx: &RuleContext) -> Option<Verdict> {
    let path = target.url.path();
    let unchanged = || Some(Verdict::Final(Classification::image(&target.text)));

    if host_within(&target.host, &ctx.primary_domain) && path.contains("/uploads/") {
        return unchanged();
    }
    match target.host.as_str() {
        "i.postimg.cc" | "i.ibb.co" => unchanged(),
        "imgnews.pstatic.net" if path.starts_with("/image/") => unchanged(),
        "lemmy.sdf.org" if path.starts_with("/pictrs/image/") => unchanged(),
        "baboboximg.onrender.com" if path == "/view" => {
            let file = target.query_param("file")?;
            Some(Verdict::Final(Classification::image(format!(
                "https://baboboximg.onrender.com/images/{file}"
            ))))
        }
        "bbbi.onrender.com" if path == "/v" => {
            let file = target.query_param("f")?;
            Some(Verdict::Final(Classification::image(format!(
                "https://bbbi.onrender.com/images/{file}"
            ))))
        }
        _ => None,
    }
}

/// Video id for every supported YouTube link shape.
fn youtube_video_id(target: &Target) -> Option<String> {
    let segments = target.segments();
    match target.host.as_str() {
        "youtu.be" | "www.youtu.be" => segments.first().map(|id| id.to_string()),
        "youtube.com" | "www.youtube.com" | "m.youtube.com" => match segments.as_slice() {
            ["watch"] => target.query_param("v"),
            ["shorts", id, ..] => Some(id.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn video_platform(target: &Target, ctx: &RuleContext) -> Option<Verdict> {
    if let Some(id) = youtube_video_id(target) {
        return Some(Verdict::Final(Classification::frame(format!(
            "https://{}/embed/{id}",
            ctx.youtube_embed_host
        ))));
    }

    if target.host_is(&["streamable.com", "www.streamable.com"]) {
        if let [id] = target.segments().as_slice() {
            return Some(Verdict::Final(Classification::frame(format!(
                "https://streamable.com/e/{id}"
            ))));
        }
    }

    None
}

fn world_truncation(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    if target.host != "space.playentry.org" {
        return None;
    }
    match target.segments().as_slice() {
        ["world", world, _, ..] => Some(Verdict::Final(Classification::frame(format!(
            "https://space.playentry.org/world/{world}"
        )))),
        _ => None,
    }
}

fn project_preview(target: &Target, ctx: &RuleContext) -> Option<Verdict> {
    let primary = normalize_host(&ctx.primary_domain);
    if target.host != primary && target.host != format!("www.{primary}") {
        return None;
    }
    match target.segments().as_slice() {
        ["project", id, ..] => Some(Verdict::Final(Classification::Frame {
            url: format!("https://bloupla.net/project-preview/?=https://{primary}/project/{id}"),
            height_hint: Some(PROJECT_PREVIEW_HEIGHT),
        })),
        _ => None,
    }
}

fn fallback(target: &Target, _ctx: &RuleContext) -> Option<Verdict> {
    Some(Verdict::Final(Classification::frame(&target.text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(url: &str) -> Verdict {
        let target = Target::parse(url).unwrap();
        evaluate(RULES, &target, &RuleContext::default()).unwrap().1
    }

    fn final_of(url: &str) -> Classification {
        match classify(url) {
            Verdict::Final(classification) => classification,
            other => panic!("expected a final verdict for {url}, got {other:?}"),
        }
    }

    #[test]
    fn test_sign_out_variants() {
        for url in [
            "https://playentry.org/signout?x=1",
            "https://playentry.org/signout",
            "https://PLAYENTRY.org/SignOut/",
            "https://ncc.playentry.org/signout",
            "http://playentry.org//signout",
            "https://playentry.org/a/../signout",
            "https://playentry.org/sign%6Fut",
            "https://playentry.org/sign%256Fut",
        ] {
            assert_eq!(final_of(url), Classification::Blocked, "{url}");
        }
        assert_ne!(final_of("https://example.com/signout"), Classification::Blocked);
        assert_ne!(final_of("https://playentry.org/community/signout"), Classification::Blocked);
    }

    #[test]
    fn test_embed_passthrough_is_identity() {
        let url = "https://www.youtube.com/embed/dQw4w9WgXcQ?start=3";
        assert_eq!(final_of(url), Classification::frame(url));
        let url = "https://streamable.com/e/abc12";
        assert_eq!(final_of(url), Classification::frame(url));
    }

    #[test]
    fn test_bloupla_relay() {
        assert_eq!(
            final_of("https://bloupla.net/img/?=abc,def"),
            Classification::MultiImage {
                urls: vec![
                    format!("{FIREBASE_IMAGE_TEMPLATE}abc?alt=media"),
                    format!("{FIREBASE_IMAGE_TEMPLATE}def?alt=media"),
                ]
            }
        );
        assert_eq!(
            final_of("https://bloupla.net/img/?=abc"),
            Classification::image(format!("{FIREBASE_IMAGE_TEMPLATE}abc?alt=media"))
        );
    }

    #[test]
    fn test_ifh_family() {
        assert_eq!(
            final_of("https://ifh.cc/v-abc.def"),
            Classification::MultiImage {
                urls: vec!["https://ifh.cc/g/abc".into(), "https://ifh.cc/g/def".into()]
            }
        );
        assert_eq!(
            final_of("https://i1fh.cc/i-abc?ref=x#frag"),
            Classification::image("https://ifh.cc/g/abc")
        );
        assert_eq!(
            final_of("https://ifh.1cc/g/xyz/"),
            Classification::image("https://ifh.cc/g/xyz")
        );
        assert_eq!(
            final_of("https://ifh.cc/g/xyz.png"),
            Classification::image("https://ifh.cc/g/xyz.png")
        );
        assert_eq!(
            final_of("https://i1fh.cc/v-a.b.c"),
            Classification::MultiImage {
                urls: vec![
                    "https://ifh.cc/g/a".into(),
                    "https://ifh.cc/g/b".into(),
                    "https://ifh.cc/g/c".into()
                ]
            }
        );
        assert_eq!(
            final_of("https://ifh.c1c/i-a.b"),
            Classification::MultiImage {
                urls: vec!["https://ifh.cc/g/a".into(), "https://ifh.cc/g/b".into()]
            }
        );
        assert_eq!(
            final_of("https://ifh1.cc/about"),
            Classification::frame("https://ifh1.cc/about")
        );
    }

    #[test]
    fn test_ibb_lookup_targets_canonical_host() {
        assert_eq!(
            classify("https://ib1b.co/AbC12"),
            Verdict::Lookup {
                request: Lookup::OgImage {
                    provider: ImageProvider::Ibb,
                    code: "AbC12".into()
                },
                fallback: Classification::frame("https://ibb.co/AbC12"),
            }
        );
    }

    #[test]
    fn test_postimg_lookups() {
        assert!(matches!(
            classify("https://postimg.cc/gallery/G1"),
            Verdict::Lookup {
                request: Lookup::Gallery { .. },
                ..
            }
        ));
        assert!(matches!(
            classify("https://postimg.cc/P1"),
            Verdict::Lookup {
                request: Lookup::OgImage {
                    provider: ImageProvider::Postimg,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_direct_images() {
        for url in [
            "https://playentry.org/uploads/ab/cd/image.png",
            "https://i.postimg.cc/abc/pic.jpg",
            "https://imgnews.pstatic.net/image/001/2024/01/01/x.jpg",
            "https://lemmy.sdf.org/pictrs/image/abc.webp",
        ] {
            assert_eq!(final_of(url), Classification::image(url));
        }
        assert_eq!(
            final_of("https://baboboximg.onrender.com/view?file=cat.png"),
            Classification::image("https://baboboximg.onrender.com/images/cat.png")
        );
        assert_eq!(
            final_of("https://bbbi.onrender.com/v?f=dog.png"),
            Classification::image("https://bbbi.onrender.com/images/dog.png")
        );
    }

    #[test]
    fn test_video_shapes_keep_id() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=10",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ/",
        ] {
            assert_eq!(
                final_of(url),
                Classification::frame("https://www.youtube.com/embed/dQw4w9WgXcQ"),
                "{url}"
            );
        }
        assert_eq!(
            final_of("https://streamable.com/abc12"),
            Classification::frame("https://streamable.com/e/abc12")
        );
    }

    #[test]
    fn test_privacy_embed_host() {
        let ctx = RuleContext {
            youtube_embed_host: "www.youtube-nocookie.com".into(),
            ..RuleContext::default()
        };
        let target = Target::parse("https://youtu.be/abc").unwrap();
        assert_eq!(
            evaluate(RULES, &target, &ctx).unwrap().1,
            Verdict::Final(Classification::frame("https://www.youtube-nocookie.com/embed/abc"))
        );
    }

    #[test]
    fn test_world_truncation() {
        assert_eq!(
            final_of("https://space.playentry.org/world/abc/state123"),
            Classification::frame("https://space.playentry.org/world/abc")
        );
        assert_eq!(
            final_of("https://space.playentry.org/world/abc"),
            Classification::frame("https://space.playentry.org/world/abc")
        );
    }

    #[test]
    fn test_project_preview_height() {
        assert_eq!(
            final_of("https://playentry.org/project/65a1b2"),
            Classification::Frame {
                url: "https://bloupla.net/project-preview/?=https://playentry.org/project/65a1b2"
                    .into(),
                height_hint: Some(PROJECT_PREVIEW_HEIGHT),
            }
        );
    }

    #[test]
    fn test_fallback_is_frame() {
        assert_eq!(
            final_of("https://example.com/some/page"),
            Classification::frame("https://example.com/some/page")
        );
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(names.first(), Some(&"sign-out-block"));
        assert_eq!(names.last(), Some(&"fallback"));
        assert_eq!(&names[..2], &PRE_RESOLUTION_RULES.iter().map(|r| r.name).collect::<Vec<_>>()[..]);
    }
}
