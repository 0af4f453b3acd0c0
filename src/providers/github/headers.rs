use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};

use super::budget::RateLimitState;

const SECONDARY_RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(30);
const RATE_LIMIT_FALLBACK: Duration = Duration::from_secs(60);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extract the rate-limit window from `X-RateLimit-*` headers.
///
/// Missing headers leave their field empty; a response carrying none of them
/// yields the zero state.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitState {
    let number = |name: &str| header_str(headers, name).and_then(|v| v.parse::<i64>().ok());

    RateLimitState {
        limit: number("x-ratelimit-limit").unwrap_or(0),
        remaining: number("x-ratelimit-remaining").unwrap_or(0),
        reset_at: number("x-ratelimit-reset").and_then(|epoch| DateTime::from_timestamp(epoch, 0)),
        resource: header_str(headers, "x-ratelimit-resource")
            .unwrap_or_default()
            .to_string(),
    }
}

/// True when GitHub reports the primary quota as fully spent.
pub fn quota_exhausted(headers: &HeaderMap) -> bool {
    header_str(headers, "x-ratelimit-remaining") == Some("0")
}

/// Parse the `rel="next"` URL out of a `Link` header.
///
/// GitHub Link headers look like:
/// `<https://api.github.com/repositories/1/issues?page=2>; rel="next", <...&page=9>; rel="last"`
pub fn parse_next_link(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut url = None;
        let mut is_next = false;

        for segment in part.split(';') {
            let segment = segment.trim();
            if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                url = Some(inner);
            } else if let Some(rel) = segment.strip_prefix("rel=") {
                is_next = rel.trim_matches('"').split_whitespace().any(|r| r == "next");
            }
        }

        url.filter(|u| is_next && !u.is_empty()).map(String::from)
    })
}

pub fn next_page(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_next_link)
}

/// How long to wait after a rate-limited response.
///
/// Preference order: `Retry-After` (seconds or HTTP-date), then the observed
/// reset time, then 30s for secondary limits, otherwise one minute.
pub fn retry_after_for_rate_limit(
    headers: &HeaderMap,
    rate_limit: &RateLimitState,
    secondary: bool,
    now: DateTime<Utc>,
) -> Duration {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Duration::from_secs(seconds);
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(value) {
            if let Ok(wait) = (at.with_timezone(&Utc) - now).to_std() {
                return wait;
            }
        }
    }

    if let Some(reset_at) = rate_limit.reset_at {
        if let Ok(wait) = (reset_at - now).to_std() {
            if !wait.is_zero() {
                return wait;
            }
        }
    }

    if secondary {
        SECONDARY_RATE_LIMIT_FALLBACK
    } else {
        RATE_LIMIT_FALLBACK
    }
}
