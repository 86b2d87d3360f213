use url::Url;
use uuid::Uuid;

/// Generate a job identifier, e.g. `job_3f2a9c1b8d04`.
pub fn job_id() -> String {
    format!("job_{}", short_uuid())
}

/// Generate an article identifier, e.g. `art_7e1c0b92aa31`.
pub fn article_id() -> String {
    format!("art_{}", short_uuid())
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Normalize a URL for deduplication: lowercase, strip any trailing slash
/// from the path, keep the query string.
///
/// Inputs that do not parse are lowercased and trimmed as-is so callers can
/// still use the result as a lookup key.
pub fn normalize_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.trim().to_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default();
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    let path = parsed.path().trim_end_matches('/');

    let mut normalized = format!("{}://{}{}{}", parsed.scheme(), host, port, path);
    if let Some(query) = parsed.query() {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized.to_lowercase()
}

/// Check that a URL is syntactically valid: http(s) scheme and a host.
pub fn validate_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_prefixes() {
        assert!(job_id().starts_with("job_"));
        assert!(article_id().starts_with("art_"));
        assert_eq!(job_id().len(), "job_".len() + 12);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(job_id(), job_id());
    }

    #[test]
    fn normalize_strips_trailing_slash_and_lowercases() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/News/Today/"),
            "https://example.com/news/today"
        );
    }

    #[test]
    fn normalize_keeps_query() {
        assert_eq!(
            normalize_url("https://example.com/a?page=2"),
            "https://example.com/a?page=2"
        );
    }

    #[test]
    fn normalize_equates_duplicate_spellings() {
        assert_eq!(
            normalize_url("https://example.com/a/"),
            normalize_url("https://EXAMPLE.com/a")
        );
    }

    #[test]
    fn validate_accepts_http_and_https() {
        assert!(validate_url("http://example.com/a"));
        assert!(validate_url("https://example.com"));
    }

    #[test]
    fn validate_rejects_bad_urls() {
        assert!(!validate_url("ftp://example.com/a"));
        assert!(!validate_url("not a url"));
        assert!(!validate_url("https://"));
    }
}
