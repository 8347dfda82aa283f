// src/ingest/normalize.rs
//! Candidate → canonical record.
//!
//! Never fails and never does I/O: a source that can't answer is handled by
//! orchestrator fallback, not by field-level errors. Each step is a separate
//! function so it can be tested on its own.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;

use crate::ingest::types::{CandidateRecord, NormalizedRecord};

/// Bumped whenever normalization output changes for the same input.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// App Store descriptions are capped at 4000 characters upstream.
const DESCRIPTION_CAP: usize = 4_000;
const SHORT_FIELD_CAP: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    schema_version: u32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(CURRENT_SCHEMA_VERSION)
    }
}

impl Normalizer {
    pub fn new(schema_version: u32) -> Self {
        Self { schema_version }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn normalize(
        &self,
        candidate: &CandidateRecord,
        identifier: &str,
        source_name: &str,
    ) -> NormalizedRecord {
        self.normalize_at(candidate, identifier, source_name, Utc::now())
    }

    /// Same as [`Normalizer::normalize`] with an explicit stamp.
    pub fn normalize_at(
        &self,
        candidate: &CandidateRecord,
        identifier: &str,
        source_name: &str,
        now: DateTime<Utc>,
    ) -> NormalizedRecord {
        let title = clean_line(candidate.title.as_deref().unwrap_or_default());
        let subtitle = dedupe_subtitle(
            &title,
            &clean_line(candidate.subtitle.as_deref().unwrap_or_default()),
        );

        NormalizedRecord {
            identifier: identifier.trim().to_string(),
            title,
            subtitle,
            description: clean_block(candidate.description.as_deref().unwrap_or_default()),
            developer: clean_line(candidate.developer.as_deref().unwrap_or_default()),
            category: clean_line(candidate.category.as_deref().unwrap_or_default()),
            rating: clamp_rating(candidate.rating),
            rating_count: clamp_count(candidate.rating_count),
            icon_url: valid_url(candidate.icon_url.as_deref().unwrap_or_default())
                .unwrap_or_default(),
            screenshot_urls: coalesce_screenshots(
                &candidate.screenshot_urls,
                candidate.screenshot_url.as_deref(),
            ),
            source_name: source_name.to_string(),
            schema_version: self.schema_version,
            normalized_at: now,
        }
    }
}

fn tag_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"))
}

fn ws_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("ws regex"))
}

fn truncate_chars(s: String, cap: usize) -> String {
    if s.chars().count() > cap {
        s.chars().take(cap).collect::<String>().trim_end().to_string()
    } else {
        s
    }
}

/// Single-line text: decode entities, drop tags, collapse whitespace.
pub fn clean_line(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = tag_re().replace_all(&decoded, " ");
    let collapsed = ws_re().replace_all(&stripped, " ");
    truncate_chars(collapsed.trim().to_string(), SHORT_FIELD_CAP)
}

/// Multi-line text: like [`clean_line`] but keeps paragraph breaks.
pub fn clean_block(s: &str) -> String {
    static BR: OnceCell<Regex> = OnceCell::new();
    let br = BR.get_or_init(|| Regex::new(r"(?i)<br\s*/?>|</p>").expect("br regex"));

    let decoded = html_escape::decode_html_entities(s);
    let with_breaks = br.replace_all(&decoded, "\n");
    let stripped = tag_re().replace_all(&with_breaks, " ");

    let mut out = String::with_capacity(stripped.len());
    let mut blank_run = 0usize;
    for line in stripped.lines() {
        let line = ws_re().replace_all(line, " ");
        let line = line.trim();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    truncate_chars(out, DESCRIPTION_CAP)
}

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '–' | '—' | ':' | '|' | '·') || c.is_whitespace()
}

/// Empty out a subtitle that repeats the title.
///
/// Collapses when the subtitle equals the title, starts with it, contains it
/// verbatim, or is the `"<head> - <subtitle>"` tail already carried by the title.
pub fn dedupe_subtitle(title: &str, subtitle: &str) -> String {
    let s = subtitle.trim();
    if s.is_empty() {
        return String::new();
    }
    let t = title.trim();
    if t.is_empty() {
        return s.to_string();
    }

    let t_low = t.to_lowercase();
    let s_low = s.to_lowercase();
    if s_low == t_low || s_low.starts_with(&t_low) || s.contains(t) {
        return String::new();
    }

    // Title already ends with "<sep> subtitle".
    if let Some(head) = t_low.strip_suffix(&s_low) {
        if !head.is_empty() && head.ends_with(is_separator) {
            return String::new();
        }
    }
    s.to_string()
}

pub fn clamp_rating(r: Option<f64>) -> f64 {
    match r {
        Some(v) if v.is_finite() => v.clamp(0.0, 5.0),
        _ => 0.0,
    }
}

pub fn clamp_count(c: Option<i64>) -> u64 {
    c.map(|v| v.max(0) as u64).unwrap_or(0)
}

/// Trimmed, entity-decoded http(s) URL in its parsed form.
pub fn valid_url(s: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(s.trim());
    let parsed = url::Url::parse(decoded.trim()).ok()?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Some(parsed.to_string()),
        _ => None,
    }
}

/// Merge the plural list and the legacy singular field: order kept, duplicates
/// and unparseable entries dropped.
pub fn coalesce_screenshots(plural: &[String], singular: Option<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(plural.len() + 1);
    for candidate in plural.iter().map(String::as_str).chain(singular) {
        if let Some(u) = valid_url(candidate) {
            if seen.insert(u.clone()) {
                out.push(u);
            }
        }
    }
    out
}
