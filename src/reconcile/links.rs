use url::Url;

/// Scheme given to protocol-relative message links (`//host/path`).
const PROTOCOL_RELATIVE_SCHEME: &str = "http:";

/// Extract the origin (`scheme://host[:port]`) of a feed's base URL.
///
/// User info, path, query and fragment are dropped and no trailing slash is
/// kept. Returns `None` for unparseable URLs and for schemes without a
/// network origin (`file:`, `data:`, ...).
pub fn feed_origin(feed_base_url: &str) -> Option<String> {
    let parsed = Url::parse(feed_base_url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Resolve a message link that is relative to its feed.
///
/// - `//host/path` becomes `http://host/path`
/// - `/path` becomes `<origin>/path` when the origin is known
///
/// Returns `None` when the link must be left untouched (already absolute,
/// relative without a leading slash, or no usable origin).
pub fn resolve_relative_url(url: &str, origin: Option<&str>) -> Option<String> {
    if url.starts_with("//") {
        return Some(format!("{PROTOCOL_RELATIVE_SCHEME}{url}"));
    }
    if url.starts_with('/') {
        return origin.map(|origin| format!("{origin}{url}"));
    }
    None
}

/// Convenience wrapper resolving `url` against `feed_base_url` in one call.
pub fn normalize_url(url: &str, feed_base_url: &str) -> String {
    let origin = feed_origin(feed_base_url);
    resolve_relative_url(url, origin.as_deref()).unwrap_or_else(|| url.to_owned())
}
