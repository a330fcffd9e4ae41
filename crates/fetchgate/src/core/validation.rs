//! Request validation
//!
//! Turns an inbound request body into a [`DownloadRequest`]:
//! - strict JSON schema (`url`, optional `quality`, nothing else)
//! - URL allow-list (http/https only, allow-listed host or one of its subdomains)
//! - quality coercion and clamping into the supported range
//!
//! Errors carry details for the server log only; the HTTP layer answers with a
//! generic message.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::core::config::quality;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Body is not JSON, has unknown fields, or misses `url`
    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    /// URL does not parse, has a disallowed scheme or no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL host is not allow-listed
    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    /// `quality` is present but not a number
    #[error("Invalid quality: {0}")]
    InvalidQuality(String),
}

/// A validated download request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: Url,
    quality: u32,
}

impl DownloadRequest {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Requested quality, already clamped into `[quality::MIN, quality::MAX]`.
    pub fn quality(&self) -> u32 {
        self.quality
    }
}

/// Wire shape of the request body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequest {
    url: String,
    #[serde(default)]
    quality: Option<RawQuality>,
}

/// `quality` may arrive as a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuality {
    Number(serde_json::Number),
    Text(String),
}

/// Host allow-list. Each entry admits itself and any subdomain.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Allow-list built from `ALLOWED_HOSTS`.
    pub fn from_config() -> Self {
        Self::new(crate::core::config::ALLOWED_HOSTS.iter())
    }

    pub fn allows(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_lowercase();
        self.hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }
}

/// Parses and validates a raw request body.
///
/// # Examples
/// ```
/// use fetchgate::core::validation::{parse_download_request, HostAllowList};
///
/// let hosts = HostAllowList::new(["youtube.com", "youtu.be"]);
/// let req = parse_download_request(br#"{"url":"https://youtu.be/abc","quality":"9999"}"#, &hosts).unwrap();
/// assert_eq!(req.quality(), 1080);
///
/// assert!(parse_download_request(br#"{"url":"https://evil.com/x"}"#, &hosts).is_err());
/// ```
pub fn parse_download_request(body: &[u8], hosts: &HostAllowList) -> Result<DownloadRequest, ValidationError> {
    let raw: RawRequest = serde_json::from_slice(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;

    let url = validate_url(&raw.url, hosts)?;
    let quality = match raw.quality {
        None => quality::DEFAULT,
        Some(q) => clamp_quality(coerce_quality(q)?),
    };

    Ok(DownloadRequest { url, quality })
}

/// Validates that a URL is absolute http(s) on an allow-listed host.
pub fn validate_url(raw: &str, hosts: &HostAllowList) -> Result<Url, ValidationError> {
    let parsed = Url::parse(raw.trim()).map_err(|_| ValidationError::InvalidUrl(raw.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::InvalidUrl(format!(
            "{} (invalid scheme: {})",
            raw,
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::InvalidUrl(format!("{} (no host)", raw)))?;

    if !hosts.allows(host) {
        return Err(ValidationError::HostNotAllowed(host.to_string()));
    }

    Ok(parsed)
}

/// Turns any numeric quality into an `i64`, saturating values outside its
/// range so that clamping still applies to them.
fn coerce_quality(raw: RawQuality) -> Result<i64, ValidationError> {
    match raw {
        RawQuality::Number(n) => Ok(saturate_number(&n)),
        RawQuality::Text(s) => parse_numeric_text(&s).ok_or(ValidationError::InvalidQuality(s)),
    }
}

fn saturate_number(n: &serde_json::Number) -> i64 {
    if let Some(v) = n.as_i64() {
        v
    } else if n.as_u64().is_some() {
        i64::MAX
    } else {
        // `as` saturates at the i64 bounds
        n.as_f64().map_or(0, |f| f as i64)
    }
}

fn parse_numeric_text(raw: &str) -> Option<i64> {
    let text = raw.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return Some(if negative { i64::MIN } else { i64::MAX });
    }

    text.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64)
}

/// Clamps any integer into the supported quality range.
pub fn clamp_quality(requested: i64) -> u32 {
    // MIN..=MAX fits in u32, so the cast after clamping is lossless
    requested.clamp(i64::from(quality::MIN), i64::from(quality::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> HostAllowList {
        HostAllowList::new(["youtube.com", "youtu.be"])
    }

    fn parse(body: &str) -> Result<DownloadRequest, ValidationError> {
        parse_download_request(body.as_bytes(), &hosts())
    }

    #[test]
    fn test_quality_defaults_to_720() {
        let req = parse(r#"{"url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ"}"#).unwrap();
        assert_eq!(req.quality(), 720);
        assert_eq!(req.url().host_str(), Some("www.youtube.com"));
    }

    #[test]
    fn test_quality_is_clamped() {
        let cases = vec![
            (r#"9999"#, 1080),
            (r#"10"#, 144),
            (r#"-5"#, 144),
            (r#"480"#, 480),
            (r#""9999""#, 1080),
            (r#"" 360 ""#, 360),
            (r#""10""#, 144),
            (r#"99999999999999999999"#, 1080),
            (r#"-99999999999999999999"#, 144),
            (r#"18446744073709551615"#, 1080),
            (r#""99999999999999999999""#, 1080),
            (r#""-99999999999999999999""#, 144),
            (r#"1e30"#, 1080),
            (r#"480.9"#, 480),
            (r#""720.5""#, 720),
        ];

        for (quality, expected) in cases {
            let body = format!(r#"{{"url":"https://youtu.be/abc","quality":{}}}"#, quality);
            assert_eq!(parse(&body).unwrap().quality(), expected, "Failed for: {}", quality);
        }
    }

    #[test]
    fn test_quality_rejects_non_numeric() {
        for quality in [r#""hd""#, r#""""#, r#""-""#, r#""inf""#, r#""NaN""#, "true", "[720]"] {
            let body = format!(r#"{{"url":"https://youtu.be/abc","quality":{}}}"#, quality);
            assert!(parse(&body).is_err(), "Should fail for: {}", quality);
        }
    }

    #[test]
    fn test_explicit_null_quality_uses_default() {
        let req = parse(r#"{"url":"https://youtu.be/abc","quality":null}"#).unwrap();
        assert_eq!(req.quality(), 720);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = parse(r#"{"url":"https://youtu.be/abc","format":"mp3"}"#).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedBody(_)));
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        for body in ["", "not json", "[]", r#"{"quality":720}"#, r#"{"url":42}"#] {
            assert!(
                matches!(parse(body), Err(ValidationError::MalformedBody(_))),
                "Should fail for: {}",
                body
            );
        }
    }

    #[test]
    fn test_allowed_hosts_and_subdomains() {
        let valid_urls = vec![
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtu.be/dQw4w9WgXcQ",
            "https://WWW.YouTube.com/watch?v=dQw4w9WgXcQ",
        ];

        for url in valid_urls {
            assert!(validate_url(url, &hosts()).is_ok(), "Failed for: {}", url);
        }
    }

    #[test]
    fn test_rejects_foreign_hosts() {
        let invalid_urls = vec![
            "https://evil.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.evil.com/watch?v=dQw4w9WgXcQ",
            "https://notyoutube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com.evil.org/watch?v=abc",
        ];

        for url in invalid_urls {
            assert!(
                matches!(validate_url(url, &hosts()), Err(ValidationError::HostNotAllowed(_))),
                "Should fail for: {}",
                url
            );
        }
    }

    #[test]
    fn test_rejects_bad_schemes_and_shapes() {
        let invalid_urls = vec![
            "ftp://youtube.com/watch?v=abc",
            "file:///youtube.com/watch?v=abc",
            "javascript:alert('xss')",
            "youtube.com/watch?v=abc",
            "not a url",
            "",
        ];

        for url in invalid_urls {
            assert!(
                matches!(validate_url(url, &hosts()), Err(ValidationError::InvalidUrl(_))),
                "Should fail for: {}",
                url
            );
        }
    }

    #[test]
    fn test_custom_allow_list() {
        let hosts = HostAllowList::new([" .Vimeo.com ", ""]);
        assert!(hosts.allows("vimeo.com"));
        assert!(hosts.allows("player.vimeo.com"));
        assert!(!hosts.allows(""));
        assert!(!hosts.allows("youtube.com"));
    }
}
