// src/ingest/classify.rs
//! Payload signature classifier.
//!
//! A 200 from the storefront can be a product page, a review modal fragment,
//! a "not found" shell or an access-denied wall. Only the body tells them
//! apart, so this looks at markers rather than status codes.
//!
//! HTML precedence: listing → review fragment → error → block → unknown.
//! JSON (search/lookup envelopes): results with `trackName` → listing,
//! empty results or `errorMessage` → error, anything else → unknown.

use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{Html, Selector};

use crate::ingest::types::{PayloadSignature, RawPayload};

/// Pure function of the payload content.
pub fn classify(raw: &RawPayload) -> PayloadSignature {
    let media = raw.media_type();
    if media.contains("json") || media.contains("javascript") {
        return classify_json(&raw.body);
    }
    if media.contains("html") {
        return classify_html(&raw.body);
    }
    // Missing or lying content-type: sniff.
    let t = raw.body.trim_start();
    if t.starts_with('{') || t.starts_with('[') {
        classify_json(t)
    } else {
        classify_html(&raw.body)
    }
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("classifier regex"))
}

fn matches_any(doc: &Html, css: &str) -> bool {
    let Ok(selector) = Selector::parse(css) else {
        return false;
    };
    let found = doc.select(&selector).next().is_some();
    found
}

/// Product header plus a subtitle or developer line.
fn listing_markup(doc: &Html) -> bool {
    matches_any(doc, ".product-header__title")
        && matches_any(doc, ".product-header__subtitle, .product-header__identity")
}

fn review_markup(doc: &Html) -> bool {
    matches_any(
        doc,
        ".we-customer-review, .we-modal, .reviews-modal, [data-test-customer-review], [class*='customer-review__']",
    )
}

fn error_markers(body: &str) -> bool {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(
        &RE,
        r#"(?i)page you(?:'|&#39;|&#x27;|’)re looking for can(?:'|&#39;|&#x27;|’)t be found|<title>[^<]*(?:404|not found)|\bpage not found\b|this app is (?:currently )?not available|connecting to the app store"#,
    )
    .is_match(body)
}

fn block_markers(body: &str) -> bool {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(
        &RE,
        r#"(?i)\baccess denied\b|you don(?:'|&#39;|’)t have permission to access|\brequest blocked\b|unusual traffic|\bcaptcha\b|are you a robot|errors\.edgesuite\.net"#,
    )
    .is_match(body)
}

pub fn classify_html(body: &str) -> PayloadSignature {
    let doc = Html::parse_document(body);
    if listing_markup(&doc) {
        return PayloadSignature::ListingPage;
    }
    if review_markup(&doc) {
        return PayloadSignature::ReviewFragment;
    }
    if error_markers(body) {
        return PayloadSignature::ErrorPage;
    }
    if block_markers(body) {
        return PayloadSignature::BlockPage;
    }
    PayloadSignature::Unknown
}

pub fn classify_json(body: &str) -> PayloadSignature {
    let Ok(v) = serde_json::from_str::<serde_json::Value>(body) else {
        return PayloadSignature::Unknown;
    };
    let Some(obj) = v.as_object() else {
        return PayloadSignature::Unknown;
    };
    if obj.contains_key("errorMessage") {
        return PayloadSignature::ErrorPage;
    }
    match obj.get("results").and_then(|r| r.as_array()) {
        Some(results) if results.is_empty() => PayloadSignature::ErrorPage,
        Some(results) => {
            let has_listing = results
                .iter()
                .any(|r| r.get("trackName").and_then(|t| t.as_str()).is_some());
            if has_listing {
                PayloadSignature::ListingPage
            } else {
                PayloadSignature::Unknown
            }
        }
        None => PayloadSignature::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn html(body: &str) -> RawPayload {
        RawPayload::new("storefront-html", "1", 200, "text/html", body)
    }

    const LISTING: &str = r#"<h1 class="product-header__title app-header__title">Duolingo</h1>
<h2 class="product-header__subtitle app-header__subtitle">Language Lessons</h2>
<div class="we-customer-review">great</div>"#;

    #[test]
    fn listing_wins_over_review_markers() {
        assert_eq!(classify(&html(LISTING)), PayloadSignature::ListingPage);
    }

    #[test]
    fn single_quoted_header_is_a_listing() {
        let body = "<h1 class='product-header__title'>Notes</h1><h2 class='product-header__subtitle'>Write</h2>";
        assert_eq!(classify_html(body), PayloadSignature::ListingPage);
    }

    #[test]
    fn class_names_in_text_are_not_markup() {
        let body = "<p>product-header__title and product-header__subtitle</p>";
        assert_eq!(classify_html(body), PayloadSignature::Unknown);
    }

    #[test]
    fn review_fragment_alone() {
        let body = r#"<div class="we-modal"><div class="we-customer-review"><h3 class="we-customer-review__title">Love it</h3></div></div>"#;
        assert_eq!(classify(&html(body)), PayloadSignature::ReviewFragment);
    }

    #[test]
    fn header_without_subheader_is_not_listing() {
        let body = r#"<h1 class="product-header__title">X</h1>"#;
        assert_eq!(classify(&html(body)), PayloadSignature::Unknown);
    }

    #[test]
    fn error_and_block_pages() {
        let err = "<html><title>Page Not Found</title><p>The page you're looking for can't be found.</p></html>";
        assert_eq!(classify(&html(err)), PayloadSignature::ErrorPage);
        let block = "<html><h1>Access Denied</h1>You don't have permission to access this server. Reference #18.abc</html>";
        assert_eq!(classify(&html(block)), PayloadSignature::BlockPage);
        assert_eq!(classify(&html("<html><body>hi</body></html>")), PayloadSignature::Unknown);
    }

    #[test]
    fn json_envelopes() {
        let ok = r#"{"resultCount":1,"results":[{"trackId":1,"trackName":"App"}]}"#;
        let none = r#"{"resultCount":0,"results":[]}"#;
        let err = r#"{"errorMessage":"Invalid value(s) for key(s): [id]"}"#;
        let odd = r#"{"results":[{"collectionName":"Album"}]}"#;
        let mk = |b: &str| RawPayload::new("itunes-lookup", "1", 200, "text/javascript; charset=utf-8", b);
        assert_eq!(classify(&mk(ok)), PayloadSignature::ListingPage);
        assert_eq!(classify(&mk(none)), PayloadSignature::ErrorPage);
        assert_eq!(classify(&mk(err)), PayloadSignature::ErrorPage);
        assert_eq!(classify(&mk(odd)), PayloadSignature::Unknown);
        assert_eq!(classify(&mk("not json")), PayloadSignature::Unknown);
    }

    #[test]
    fn sniffs_when_content_type_is_missing() {
        let raw = RawPayload::new("x", "1", 200, "", r#"{"results":[]}"#);
        assert_eq!(classify(&raw), PayloadSignature::ErrorPage);
    }
}
