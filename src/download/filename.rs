//! Display-name sanitization, media types, and URL normalization.
//!
//! These helpers turn tool-reported titles into safe attachment names,
//! derive cache keys from source URLs, and decide whether a host is on the
//! allow-list.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

/// Longest display name kept, in characters, before the extension.
pub const MAX_DISPLAY_NAME_CHARS: usize = 100;

/// Fallback display name when sanitization leaves nothing.
const FALLBACK_DISPLAY_NAME: &str = "download";

/// Query parameters that never change which media a URL points at.
const TRACKING_PARAMS: &[&str] = &["feature", "si", "fbclid", "gclid", "igshid", "pp"];

#[allow(clippy::expect_used)]
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("non-word regex is valid"));

#[allow(clippy::expect_used)]
static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Strips non-word characters, collapses whitespace, and caps the length.
///
/// Returns `"download"` if nothing survives.
///
/// # Examples
///
/// ```
/// use mediagate_core::download::sanitize_display_name;
///
/// assert_eq!(sanitize_display_name("My  Video: Part 1 / HD!"), "My Video Part 1 HD");
/// assert_eq!(sanitize_display_name("???"), "download");
/// ```
#[must_use]
pub fn sanitize_display_name(title: &str) -> String {
    let stripped = NON_WORD.replace_all(title, "");
    let collapsed = WHITESPACE_RUN.replace_all(stripped.trim(), " ");
    let capped: String = collapsed.chars().take(MAX_DISPLAY_NAME_CHARS).collect();
    let capped = capped.trim();
    if capped.is_empty() {
        FALLBACK_DISPLAY_NAME.to_string()
    } else {
        capped.to_string()
    }
}

/// Builds the attachment file name from a sanitized title and the artifact's
/// extension.
#[must_use]
pub fn attachment_filename(title: &str, artifact: &Path) -> String {
    let name = sanitize_display_name(title);
    match artifact.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{name}.{}", ext.to_lowercase()),
        _ => name,
    }
}

/// Formats a `Content-Disposition` value with an ASCII fallback name and an
/// RFC 5987 encoded name.
///
/// # Examples
///
/// ```
/// use mediagate_core::download::content_disposition;
///
/// assert_eq!(
///     content_disposition("clip.mp4"),
///     "attachment; filename=\"clip.mp4\"; filename*=UTF-8''clip.mp4"
/// );
/// ```
#[must_use]
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && !c.is_ascii_control() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Guesses the media type from the artifact's extension.
#[must_use]
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "flv" => "video/x-flv",
        "3gp" => "video/3gpp",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Parses a client-supplied URL, accepting only absolute http(s) URLs with a
/// host.
#[must_use]
pub fn parse_source_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = Url::parse(trimmed).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().filter(|h| !h.is_empty())?;
    Some(url)
}

/// Returns the URL's host with any `www.` or `m.` prefix removed.
#[must_use]
pub fn canonical_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    host.strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .map_or_else(|| host.clone(), str::to_string)
}

/// True when `host` equals an allowed host or is a subdomain of one.
///
/// # Examples
///
/// ```
/// use mediagate_core::download::host_allowed;
///
/// let allowed = vec!["youtube.com".to_string()];
/// assert!(host_allowed("www.youtube.com", &allowed));
/// assert!(host_allowed("youtube.com", &allowed));
/// assert!(!host_allowed("notyoutube.com", &allowed));
/// ```
#[must_use]
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();
    allowed.iter().any(|entry| {
        let entry = entry.trim().trim_end_matches('.').to_lowercase();
        !entry.is_empty()
            && (host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')))
    })
}

/// Normalizes a source URL so trivially different links share a cache entry.
///
/// Drops the fragment, `www.`/`m.` host prefixes, tracking parameters, and
/// sorts the remaining query parameters.
#[must_use]
pub fn normalize_source_url(url: &Url) -> String {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let mut normalized = format!("{}://{}", url.scheme(), canonical_host(url));
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(url.path().trim_end_matches('/'));
    if !params.is_empty() {
        // Re-encode so a decoded `&` or `=` cannot merge distinct queries.
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&params)
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }
    normalized
}

/// Deterministic cache key for a source URL: hex SHA-256 of the normalized URL.
#[must_use]
pub fn cache_key(url: &Url) -> String {
    let digest = Sha256::digest(normalize_source_url(url).as_bytes());
    format!("{digest:x}")
}

/// Short platform label for history records.
#[must_use]
pub fn platform_for(url: &Url) -> String {
    let host = canonical_host(url);
    let platform = match host.as_str() {
        h if h == "youtu.be" || h.ends_with("youtube.com") => "youtube",
        h if h.ends_with("tiktok.com") => "tiktok",
        h if h.ends_with("instagram.com") => "instagram",
        h if h.ends_with("twitter.com") || h == "x.com" => "twitter",
        h if h.ends_with("facebook.com") || h == "fb.watch" => "facebook",
        h if h.ends_with("vimeo.com") => "vimeo",
        h if h.ends_with("soundcloud.com") => "soundcloud",
        h if h.ends_with("reddit.com") => "reddit",
        h if h.ends_with("twitch.tv") => "twitch",
        h if h.ends_with("dailymotion.com") => "dailymotion",
        other => return other.to_string(),
    };
    platform.to_string()
}
