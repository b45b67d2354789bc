//! URL scoping helpers shared by sitemap expansion and the crawl fallback.

use url::Url;

/// File extensions that never point at an auditable HTML page.
const ASSET_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "svg", "webp", "avif", "ico", "bmp", "css", "js", "mjs",
    "json", "xml", "rss", "atom", "txt", "csv", "zip", "gz", "tgz", "tar", "rar", "7z", "mp3",
    "mp4", "m4a", "webm", "avi", "mov", "wav", "ogg", "woff", "woff2", "ttf", "otf", "eot",
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "exe", "dmg", "apk",
];

/// Whether the URL path ends in an asset extension.
pub fn is_asset(url: &Url) -> bool {
    let last = url.path().rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            ASSET_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Resolve `href` against `base`, require http(s), and drop the fragment.
pub fn normalize(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Parse an absolute URL and drop its fragment.
pub fn parse_absolute(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Same scheme, host, and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// `scheme://host[:port]` of `url`, without a trailing slash.
pub fn origin_string(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Host used to key the per-domain fingerprint cache.
pub fn domain_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}
