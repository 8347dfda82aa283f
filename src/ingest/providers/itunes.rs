// src/ingest/providers/itunes.rs
//! Result mapping shared by the search and lookup APIs (same result schema).

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::ingest::types::{CandidateRecord, CanonicalField};

/// Keys we read.
const MAPPED_FIELDS: &[&str] = &[
    "trackId",
    "trackName",
    "description",
    "artistName",
    "sellerName",
    "primaryGenreName",
    "averageUserRating",
    "userRatingCount",
    "artworkUrl512",
    "artworkUrl100",
    "artworkUrl60",
    "screenshotUrls",
    "screenshotUrl",
];

/// Keys we know about and deliberately drop.
const IGNORED_FIELDS: &[&str] = &[
    "wrapperType",
    "kind",
    "trackViewUrl",
    "trackCensoredName",
    "trackContentRating",
    "artistId",
    "artistViewUrl",
    "sellerUrl",
    "bundleId",
    "price",
    "formattedPrice",
    "currency",
    "version",
    "releaseDate",
    "currentVersionReleaseDate",
    "releaseNotes",
    "minimumOsVersion",
    "fileSizeBytes",
    "contentAdvisoryRating",
    "advisories",
    "genres",
    "genreIds",
    "primaryGenreId",
    "languageCodesISO2A",
    "supportedDevices",
    "features",
    "isGameCenterEnabled",
    "ipadScreenshotUrls",
    "appletvScreenshotUrls",
    "averageUserRatingForCurrentVersion",
    "userRatingCountForCurrentVersion",
    "isVppDeviceBasedLicensingEnabled",
];

/// Canonical fields the JSON APIs reliably fill. Subtitle is never a real field there.
pub fn expected_fields() -> BTreeSet<CanonicalField> {
    CanonicalField::ALL
        .into_iter()
        .filter(|f| *f != CanonicalField::Subtitle)
        .collect()
}

/// Results array of a search/lookup envelope.
pub fn results(body: &str) -> Result<Vec<Map<String, Value>>, String> {
    let v: Value = serde_json::from_str(body).map_err(|e| format!("invalid json: {e}"))?;
    let arr = v
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| "missing results array".to_string())?;
    Ok(arr
        .iter()
        .filter_map(|r| r.as_object().cloned())
        .collect())
}

/// Result whose `trackId` equals `app_id`. Free-text lookups (no app id)
/// take the first result.
pub fn pick_result<'a>(
    results: &'a [Map<String, Value>],
    app_id: Option<&str>,
) -> Option<&'a Map<String, Value>> {
    let Some(id) = app_id else {
        return results.first();
    };
    results.iter().find(|r| match r.get("trackId") {
        Some(Value::Number(n)) => n.to_string() == id,
        Some(Value::String(s)) => s == id,
        _ => false,
    })
}

fn str_field(r: &Map<String, Value>, key: &str) -> Option<String> {
    r.get(key).and_then(Value::as_str).map(str::to_string)
}

fn num_field(r: &Map<String, Value>, key: &str) -> Option<f64> {
    match r.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn candidate_from_result(r: &Map<String, Value>) -> CandidateRecord {
    let screenshot_urls = r
        .get("screenshotUrls")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let unrecognized_fields = r
        .keys()
        .filter(|k| !MAPPED_FIELDS.contains(&k.as_str()) && !IGNORED_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();

    CandidateRecord {
        title: str_field(r, "trackName"),
        subtitle: None,
        description: str_field(r, "description"),
        developer: str_field(r, "artistName").or_else(|| str_field(r, "sellerName")),
        category: str_field(r, "primaryGenreName"),
        rating: num_field(r, "averageUserRating"),
        rating_count: num_field(r, "userRatingCount").map(|v| v as i64),
        icon_url: str_field(r, "artworkUrl512")
            .or_else(|| str_field(r, "artworkUrl100"))
            .or_else(|| str_field(r, "artworkUrl60")),
        screenshot_urls,
        screenshot_url: str_field(r, "screenshotUrl"),
        unrecognized_fields,
    }
}
