//! Dedup key policy for opportunity source URLs.
//!
//! Two URLs name the same opportunity when they differ only in scheme/host
//! case, a default port, a fragment, a trailing slash on a non-root path or
//! the order of query parameters.

use url::Url;

pub fn normalize_source_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if url.cannot_be_a_base() {
        return trimmed.to_string();
    }

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.to_string()
}

/// Resolve a possibly relative link against the page it was found on.
pub fn resolve_against(base: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.starts_with("http://") || link.starts_with("https://") {
        return Some(link.to_string());
    }
    Url::parse(base.trim())
        .ok()?
        .join(link)
        .ok()
        .map(|u| u.to_string())
}
