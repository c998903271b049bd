//! Page locator handling: canonical keys for loop detection and the URL
//! shapes a job is allowed to start from and paginate through.
//!
//! Normalized keys are only ever compared with each other. The raw locator
//! stays the locator of record.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

const REVIEW_PATH_MARKER: &str = "/product-reviews/";
const PAGE_PARAM: &str = "pageNumber";
const DEFAULT_PAGE: &str = "1";

static RE_CONTENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/product-reviews/([A-Z0-9]{10})").unwrap());
static RE_ORIGIN_PAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dp/|/gp/product/").unwrap());

/// Canonicalize a locator for loop comparison.
///
/// Keeps origin, the content identifier and the page number (default `1`);
/// drops every other query parameter and path decoration. Input that does
/// not parse as an http(s) URL is returned unchanged, so comparison falls
/// back to exact string equality.
pub fn normalize_locator(locator: &str) -> String {
    let Ok(url) = Url::parse(locator) else {
        return locator.to_string();
    };
    if !matches!(url.scheme(), "http" | "https") {
        return locator.to_string();
    }

    let page = url
        .query_pairs()
        .find(|(key, _)| key == PAGE_PARAM)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| DEFAULT_PAGE.to_string());
    let page: String = url::form_urlencoded::byte_serialize(page.as_bytes()).collect();

    let origin = url.origin().ascii_serialization();
    let path = match content_id(&url) {
        Some(id) => format!("{REVIEW_PATH_MARKER}{id}"),
        None => url.path().to_string(),
    };

    format!("{origin}{path}?{PAGE_PARAM}={page}")
}

/// `true` when both locators point at the same page once volatile
/// parameters are ignored.
pub fn same_page(a: &str, b: &str) -> bool {
    normalize_locator(a) == normalize_locator(b)
}

fn content_id(url: &Url) -> Option<String> {
    RE_CONTENT_ID
        .captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether a surface location still looks like the paginated review source.
pub fn is_paginated_source(location: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => url.path().contains(REVIEW_PATH_MARKER),
        Err(_) => false,
    }
}

/// Whether `source_url` is a product page extraction can start from.
pub fn is_origin_page(source_url: &str) -> bool {
    match Url::parse(source_url) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https") && RE_ORIGIN_PAGE.is_match(url.path())
        }
        Err(_) => false,
    }
}
