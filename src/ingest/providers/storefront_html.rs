// src/ingest/providers/storefront_html.rs
//! Public App Store product page (`apps.apple.com/{cc}/app/id{id}`).
//!
//! Structured data comes first: the page embeds a `SoftwareApplication`
//! JSON-LD block. Header markup supplies the subtitle (absent from JSON-LD)
//! and acts as fallback for everything else.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::{http_get, parse_app_id};
use crate::error::FetchError;
use crate::ingest::types::{
    CandidateRecord, CanonicalField, FetchOptions, RawPayload, SourceAdapter,
};

pub const NAME: &str = "storefront-html";
const DEFAULT_BASE: &str = "https://apps.apple.com";
const CONTENT_TYPES: &[&str] = &["text/html"];

/// JSON-LD keys mapped into the candidate.
const LD_MAPPED: &[&str] = &[
    "name",
    "description",
    "author",
    "applicationCategory",
    "aggregateRating",
    "image",
    "screenshot",
];

/// JSON-LD keys known to carry nothing we need.
const LD_IGNORED: &[&str] = &[
    "@context",
    "@type",
    "url",
    "offers",
    "operatingSystem",
    "datePublished",
    "availableOnDevice",
    "contentRating",
    "inLanguage",
    "softwareVersion",
    "releaseNotes",
];

pub struct StorefrontHtmlAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl StorefrontHtmlAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self { client, base_url }
    }

    fn page_url(&self, app_id: &str, country: &str) -> String {
        format!(
            "{}/{}/app/id{}",
            self.base_url,
            country.trim().to_ascii_lowercase(),
            app_id
        )
    }
}

fn count_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)([0-9]{1,3}(?:,[0-9]{3})+|[0-9]+(?:[.,][0-9]+)?)\s*([KM])?\s+Ratings?\b")
            .expect("rating count regex")
    })
}

/// `"1.2K"` → 1200, `"3.4M"` → 3_400_000, `"987"` → 987, `"1,234"` → 1234.
///
/// A comma is a decimal separator ("4,3K") unless it groups thousands in an
/// unsuffixed number.
pub fn parse_abbreviated_count(number: &str, suffix: Option<&str>) -> Option<i64> {
    let number = number.trim();
    let n: f64 = if suffix.is_none() && is_thousands_grouped(number) {
        number.replace(',', "").parse().ok()?
    } else {
        number.replace(',', ".").parse().ok()?
    };
    let mult = match suffix.map(|s| s.to_ascii_uppercase()) {
        Some(s) if s == "K" => 1_000.0,
        Some(s) if s == "M" => 1_000_000.0,
        _ => 1.0,
    };
    Some((n * mult).round() as i64)
}

fn is_thousands_grouped(number: &str) -> bool {
    let mut parts = number.split(',');
    let head = parts.next().unwrap_or_default();
    let mut groups = 0;
    for g in parts {
        if g.len() != 3 || !g.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        groups += 1;
    }
    groups > 0 && (1..=3).contains(&head.len()) && head.bytes().all(|b| b.is_ascii_digit())
}

fn first<'a>(doc: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    let found = doc.select(&selector).next();
    found
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = squash(&el.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Header text minus the age-rating badge nested inside it.
fn title_text(h1: ElementRef<'_>) -> Option<String> {
    let mut text = String::new();
    for node in h1.descendants() {
        let Some(t) = node.value().as_text() else {
            continue;
        };
        let in_badge = node
            .ancestors()
            .take_while(|a| a.id() != h1.id())
            .filter_map(|a| a.value().as_element())
            .any(|e| e.classes().any(|c| c == "badge"));
        if !in_badge {
            text.push_str(t);
        }
    }
    let text = squash(&text);
    (!text.is_empty()).then_some(text)
}

/// First JSON-LD object typed `SoftwareApplication` (top level or in an array/`@graph`).
fn software_application(doc: &Html) -> Option<Map<String, Value>> {
    fn find(v: Value) -> Option<Map<String, Value>> {
        match v {
            Value::Array(items) => items.into_iter().find_map(find),
            Value::Object(mut obj) => {
                let typed = match obj.get("@type") {
                    Some(Value::String(t)) => t == "SoftwareApplication",
                    Some(Value::Array(ts)) => ts.iter().any(|t| t == "SoftwareApplication"),
                    _ => false,
                };
                if typed {
                    return Some(obj);
                }
                obj.remove("@graph").and_then(find)
            }
            _ => None,
        }
    }
    let selector = Selector::parse("script[type='application/ld+json']").ok()?;
    let found = doc
        .select(&selector)
        .filter_map(|script| {
            let json = script.text().collect::<String>();
            serde_json::from_str::<Value>(json.trim()).ok()
        })
        .find_map(find);
    found
}

fn ld_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn ld_num(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn apply_ld(c: &mut CandidateRecord, ld: &Map<String, Value>) {
    c.title = ld_str(ld, "name");
    c.description = ld_str(ld, "description");
    c.developer = match ld.get("author") {
        Some(Value::Object(a)) => ld_str(a, "name"),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    c.category = ld_str(ld, "applicationCategory");
    if let Some(Value::Object(agg)) = ld.get("aggregateRating") {
        c.rating = ld_num(agg.get("ratingValue"));
        c.rating_count = ld_num(agg.get("reviewCount").or_else(|| agg.get("ratingCount")))
            .map(|v| v as i64);
    }
    c.icon_url = match ld.get("image") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(a)) => a.iter().find_map(Value::as_str).map(str::to_string),
        _ => None,
    };
    match ld.get("screenshot") {
        Some(Value::String(s)) => c.screenshot_url = Some(s.clone()),
        Some(Value::Array(a)) => {
            c.screenshot_urls = a
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => ld_str(o, "url").or_else(|| ld_str(o, "contentUrl")),
                    _ => None,
                })
                .collect()
        }
        _ => {}
    }
    c.unrecognized_fields = ld
        .keys()
        .filter(|k| !LD_MAPPED.contains(&k.as_str()) && !LD_IGNORED.contains(&k.as_str()))
        .cloned()
        .collect();
}

fn rating_count_from(text: &str) -> Option<i64> {
    count_re()
        .captures(text)
        .and_then(|cap| parse_abbreviated_count(&cap[1], cap.get(2).map(|m| m.as_str())))
}

fn apply_markup(c: &mut CandidateRecord, doc: &Html) {
    if c.title.is_none() {
        c.title = first(doc, "h1.product-header__title").and_then(title_text);
    }
    c.subtitle = first(doc, ".product-header__subtitle").and_then(element_text);
    if c.developer.is_none() {
        c.developer = first(doc, ".product-header__identity").and_then(element_text);
    }
    if c.rating.is_none() {
        c.rating = first(doc, ".we-customer-ratings__averages__display")
            .and_then(element_text)
            .and_then(|t| t.replace(',', ".").parse().ok());
    }
    if c.rating_count.is_none() {
        c.rating_count = first(doc, ".we-customer-ratings__count")
            .and_then(element_text)
            .and_then(|t| rating_count_from(&t))
            .or_else(|| rating_count_from(&squash(&doc.root_element().text().collect::<String>())));
    }
    if c.screenshot_urls.is_empty() && c.screenshot_url.is_none() {
        if let Ok(selector) = Selector::parse(".we-screenshot-viewer__screenshots img[src]") {
            c.screenshot_urls = doc
                .select(&selector)
                .filter_map(|img| img.value().attr("src"))
                .map(str::to_string)
                .collect();
        }
    }
}

#[async_trait]
impl SourceAdapter for StorefrontHtmlAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(
        &self,
        identifier: &str,
        options: &FetchOptions,
    ) -> Result<RawPayload, FetchError> {
        let app_id = parse_app_id(identifier).ok_or_else(|| super::invalid_identifier(identifier))?;
        let url = self.page_url(app_id, &options.country);
        http_get(&self.client, &url, "text/html", NAME, identifier, options).await
    }

    fn expected_content_types(&self) -> &[&'static str] {
        CONTENT_TYPES
    }

    fn transform(&self, raw: &RawPayload) -> Result<CandidateRecord, String> {
        let doc = Html::parse_document(&raw.body);
        let mut c = CandidateRecord::default();
        if let Some(ld) = software_application(&doc) {
            apply_ld(&mut c, &ld);
        }
        apply_markup(&mut c, &doc);
        if c.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err("no product title in page".to_string());
        }
        Ok(c)
    }

    fn expected_fields(&self) -> BTreeSet<CanonicalField> {
        // Plenty of listings have no subtitle at all.
        CanonicalField::ALL
            .into_iter()
            .filter(|f| *f != CanonicalField::Subtitle)
            .collect()
    }
}
