use async_trait::async_trait;
use entry_preview::tracker::{LinkState, LinkTracker};
use entry_preview::{
    Classification, ClassifierConfig, ImageProvider, NetworkProxy, PreviewError, UrlClassifier,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scripted proxy: known answers succeed, everything else fails or hangs. Redirect
/// resolution and the first few `og:image` lookups can be made to fail.
#[derive(Default)]
struct MockProxy {
    redirects: HashMap<String, String>,
    og_images: HashMap<String, String>,
    galleries: HashMap<String, Vec<String>>,
    hang: bool,
    fail_resolution: bool,
    og_failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MockProxy {
    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    fn unreachable() -> Self {
        Self {
            fail_resolution: true,
            ..Self::default()
        }
    }

    fn failing_og_lookups(self, times: usize) -> Self {
        self.og_failures_left.store(times, Ordering::SeqCst);
        self
    }

    fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(from.into(), to.into());
        self
    }

    fn with_og_image(mut self, code: &str, image: &str) -> Self {
        self.og_images.insert(code.into(), image.into());
        self
    }

    fn with_gallery(mut self, code: &str, images: &[&str]) -> Self {
        self.galleries
            .insert(code.into(), images.iter().map(|s| s.to_string()).collect());
        self
    }

    async fn maybe_hang(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl NetworkProxy for MockProxy {
    async fn resolve_redirect(&self, url: &str) -> Result<String, PreviewError> {
        self.maybe_hang().await;
        if self.fail_resolution {
            return Err(PreviewError::FetchError("dns lookup failed".into()));
        }
        Ok(self.redirects.get(url).cloned().unwrap_or_else(|| url.to_string()))
    }

    async fn fetch_og_image(
        &self,
        _provider: ImageProvider,
        code: &str,
    ) -> Result<String, PreviewError> {
        self.maybe_hang().await;
        let failing = self
            .og_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PreviewError::FetchError("connection reset".into()));
        }
        self.og_images
            .get(code)
            .cloned()
            .ok_or_else(|| PreviewError::FetchError("connection reset".into()))
    }

    async fn fetch_gallery_images(&self, code: &str) -> Result<Vec<String>, PreviewError> {
        self.maybe_hang().await;
        self.galleries
            .get(code)
            .cloned()
            .ok_or_else(|| PreviewError::FetchError("connection reset".into()))
    }
}

fn classifier(proxy: MockProxy) -> UrlClassifier {
    UrlClassifier::new(Arc::new(proxy))
}

#[tokio::test]
async fn test_og_image_lookup_success() {
    let classifier = classifier(MockProxy::default().with_og_image("XyZ", "https://i.ibb.co/a/b.png"));
    assert_eq!(
        classifier.classify("https://ibb.co/XyZ").await,
        Classification::image("https://i.ibb.co/a/b.png")
    );
}

#[tokio::test]
async fn test_og_image_failure_falls_back_to_frame() {
    let classifier = classifier(MockProxy::default());
    assert_eq!(
        classifier.classify("https://ibb.co/XyZ").await,
        Classification::frame("https://ibb.co/XyZ")
    );
    assert_eq!(
        classifier.classify("https://postimg.cc/AbC").await,
        Classification::frame("https://postimg.cc/AbC")
    );
}

#[tokio::test]
async fn test_gallery_lookup() {
    let classifier = classifier(
        MockProxy::default()
            .with_gallery("Many", &["https://i.postimg.cc/a/1.png", "https://i.postimg.cc/b/2.png"])
            .with_gallery("One", &["https://i.postimg.cc/a/1.png"])
            .with_gallery("None", &[]),
    );

    assert_eq!(
        classifier.classify("https://postimg.cc/gallery/Many").await,
        Classification::MultiImage {
            urls: vec![
                "https://i.postimg.cc/a/1.png".into(),
                "https://i.postimg.cc/b/2.png".into()
            ]
        }
    );
    assert_eq!(
        classifier.classify("https://postimg.cc/gallery/One").await,
        Classification::image("https://i.postimg.cc/a/1.png")
    );
    assert_eq!(
        classifier.classify("https://postimg.cc/gallery/None").await,
        Classification::frame("https://postimg.cc/gallery/None")
    );
}

#[tokio::test]
async fn test_resolved_short_link_is_classified_by_destination() {
    let classifier = classifier(
        MockProxy::default().with_redirect("https://naver.me/abc", "https://ifh.cc/v-abc.def"),
    );
    assert_eq!(
        classifier.classify("https://naver.me/abc").await,
        Classification::MultiImage {
            urls: vec!["https://ifh.cc/g/abc".into(), "https://ifh.cc/g/def".into()]
        }
    );
}

#[tokio::test]
async fn test_resolved_link_to_sign_out_is_blocked() {
    let classifier = classifier(
        MockProxy::default().with_redirect("https://naver.me/out", "https://playentry.org/signout"),
    );
    assert_eq!(
        classifier.classify("https://naver.me/out").await,
        Classification::Blocked
    );
}

#[tokio::test]
async fn test_blocked_and_embeds_never_reach_the_proxy() {
    let proxy = Arc::new(MockProxy::default());
    let classifier = UrlClassifier::new(proxy.clone());

    assert!(classifier
        .classify("https://playentry.org/signout?x=1")
        .await
        .is_blocked());
    assert_eq!(
        classifier
            .classify("https://www.youtube.com/embed/dQw4w9WgXcQ")
            .await,
        Classification::frame("https://www.youtube.com/embed/dQw4w9WgXcQ")
    );
    assert_eq!(proxy.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_proxy_times_out_to_original_link() {
    let classifier = UrlClassifier::new_with_config(
        Arc::new(MockProxy::hanging()),
        ClassifierConfig::default().with_lookup_timeout(Duration::from_secs(2)),
    );

    assert_eq!(
        classifier.classify("https://naver.me/abc").await,
        Classification::frame("https://naver.me/abc")
    );
    assert_eq!(
        classifier.classify("https://youtu.be/dQw4w9WgXcQ").await,
        Classification::frame("https://www.youtube.com/embed/dQw4w9WgXcQ")
    );
}

#[cfg(feature = "cache")]
#[tokio::test]
async fn test_classification_is_cached() {
    let proxy = Arc::new(MockProxy::default().with_og_image("XyZ", "https://i.ibb.co/a/b.png"));
    let classifier = UrlClassifier::new(proxy.clone());

    let first = classifier.classify("https://ibb.co/XyZ").await;
    let calls = proxy.calls.load(Ordering::SeqCst);
    let second = classifier.classify("https://ibb.co/XyZ").await;

    assert_eq!(first, second);
    assert_eq!(proxy.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_resolution_failure_keeps_original_link() {
    let classifier = classifier(MockProxy::unreachable());
    assert_eq!(
        classifier.classify("https://naver.me/abc").await,
        Classification::frame("https://naver.me/abc")
    );
    assert_eq!(
        classifier.classify("https://ifh.cc/v-a.b").await,
        Classification::MultiImage {
            urls: vec!["https://ifh.cc/g/a".into(), "https://ifh.cc/g/b".into()]
        }
    );
}

#[tokio::test]
async fn test_failed_lookup_is_retried_on_next_classify() {
    let proxy = Arc::new(
        MockProxy::default()
            .with_og_image("XyZ", "https://i.ibb.co/a/b.png")
            .failing_og_lookups(1),
    );
    let classifier = UrlClassifier::new(proxy.clone());

    assert_eq!(
        classifier.classify("https://ibb.co/XyZ").await,
        Classification::frame("https://ibb.co/XyZ")
    );
    assert_eq!(
        classifier.classify("https://ibb.co/XyZ").await,
        Classification::image("https://i.ibb.co/a/b.png")
    );
}

#[cfg(feature = "cache")]
#[tokio::test]
async fn test_failed_resolution_is_not_cached() {
    let proxy = Arc::new(MockProxy::unreachable());
    let classifier = UrlClassifier::new(proxy.clone());

    classifier.classify("https://naver.me/abc").await;
    let calls = proxy.calls.load(Ordering::SeqCst);
    classifier.classify("https://naver.me/abc").await;
    assert!(proxy.calls.load(Ordering::SeqCst) > calls);
}

#[tokio::test]
async fn test_tracker_drives_classifier() {
    let classifier = classifier(MockProxy::default());
    let mut tracker = LinkTracker::new();
    tracker.discover([
        "/redirect?external=https%3A%2F%2Fifh.cc%2Fv-abc.def",
        "https://playentry.org/signout",
    ]);

    assert_eq!(tracker.poll(&classifier, |_| true).await, 2);
    assert!(matches!(
        tracker.container("https://ifh.cc/v-abc.def").map(|c| &c.state),
        Some(LinkState::Rendered(_))
    ));
    assert_eq!(
        tracker
            .container("https://playentry.org/signout")
            .map(|c| &c.state),
        Some(&LinkState::Blocked)
    );
    assert_eq!(tracker.poll(&classifier, |_| true).await, 0);
}
