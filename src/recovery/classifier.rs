//! Error classification
//!
//! Maps a raw error message, HTTP status and optional page content to an
//! [`ErrorPattern`] plus the affected domain. Message sniffing is the
//! primary signal; the status code and content markers refine it.

use serde::{Deserialize, Serialize};

use crate::store::domain_health::extract_domain;

/// Recognised failure shapes, from most to least specific handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    Timeout,
    RateLimited,
    BlockedByCaptcha,
    AuthRequired,
    DnsOrNetwork,
    ServerError5xx,
    NavigationFailure,
    ElementMissing,
    Unknown,
}

impl ErrorPattern {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::BlockedByCaptcha => "blocked_by_captcha",
            Self::AuthRequired => "auth_required",
            Self::DnsOrNetwork => "dns_or_network",
            Self::ServerError5xx => "server_error_5xx",
            Self::NavigationFailure => "navigation_failure",
            Self::ElementMissing => "element_missing",
            Self::Unknown => "unknown",
        }
    }

    /// Patterns that are terminal without a rule granting retries
    #[must_use]
    pub fn is_terminal_by_default(self) -> bool {
        matches!(self, Self::BlockedByCaptcha | Self::AuthRequired)
    }
}

/// A classified failure, ready for the rule engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub pattern: ErrorPattern,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

/// Stateless classifier over message text, status and page content
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure observed while working `url`
    #[must_use]
    pub fn classify(
        &self,
        message: &str,
        url: &str,
        status: Option<u16>,
        page_content: Option<&str>,
    ) -> DetectedError {
        let domain = extract_domain(url).unwrap_or_default();
        let pattern = Self::pattern_of(message, status, page_content);
        DetectedError {
            pattern,
            domain,
            status,
            message: message.to_string(),
        }
    }

    fn pattern_of(message: &str, status: Option<u16>, page_content: Option<&str>) -> ErrorPattern {
        let lower = message.to_lowercase();

        // status codes are the strongest signal when present
        match status {
            Some(429) => return ErrorPattern::RateLimited,
            Some(401 | 403) => return ErrorPattern::AuthRequired,
            Some(s) if s >= 500 => return ErrorPattern::ServerError5xx,
            _ => {}
        }

        if let Some(content) = page_content {
            let content_lower = content.to_lowercase();
            if content_lower.contains("captcha")
                || content_lower.contains("are you a robot")
                || content_lower.contains("cf-challenge")
            {
                return ErrorPattern::BlockedByCaptcha;
            }
            if content_lower.contains("sign in to continue")
                || content_lower.contains("login required")
            {
                return ErrorPattern::AuthRequired;
            }
        }

        if lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("rate limit")
            || lower.contains("retry-after")
        {
            return ErrorPattern::RateLimited;
        }
        if lower.contains("captcha") {
            return ErrorPattern::BlockedByCaptcha;
        }
        if lower.contains("401") || lower.contains("403") || lower.contains("unauthorized")
            || lower.contains("forbidden")
        {
            return ErrorPattern::AuthRequired;
        }
        if lower.contains("timeout") || lower.contains("timed out") {
            return ErrorPattern::Timeout;
        }
        if lower.contains("dns")
            || lower.contains("connection refused")
            || lower.contains("connection reset")
            || lower.contains("unreachable")
            || lower.contains("network")
            || lower.contains("broken pipe")
        {
            return ErrorPattern::DnsOrNetwork;
        }
        if lower.contains("http 5") || lower.contains("500") || lower.contains("502")
            || lower.contains("503") || lower.contains("504")
        {
            return ErrorPattern::ServerError5xx;
        }
        if lower.contains("navigation") || lower.contains("net::err") || lower.contains("goto") {
            return ErrorPattern::NavigationFailure;
        }
        if lower.contains("no element matched") || lower.contains("element not found")
            || lower.contains("selector")
        {
            return ErrorPattern::ElementMissing;
        }

        ErrorPattern::Unknown
    }
}

/// Whether a raw message describes a transient, locally-retryable failure
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        return true;
    }
    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("dns")
        || lower.contains("unreachable")
        || lower.contains("network")
        || lower.contains("broken pipe")
        || lower.contains("eof")
    {
        return true;
    }
    if lower.contains("429") || lower.contains("too many requests") {
        return true;
    }
    // 5xx statuses embedded in messages like "HTTP 503 fetching ..."
    if let Some(idx) = lower.find("http 5")
        && lower[idx + 5..].chars().take(3).all(|c| c.is_ascii_digit())
    {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_takes_precedence_over_message() {
        let classifier = ErrorClassifier::new();
        let detected = classifier.classify("request failed", "https://x.example/a", Some(429), None);
        assert_eq!(detected.pattern, ErrorPattern::RateLimited);
        assert_eq!(detected.domain, "x.example");
        assert_eq!(detected.status, Some(429));
    }

    #[test]
    fn message_sniffing_covers_patterns() {
        let classifier = ErrorClassifier::new();
        let cases = [
            ("navigation timeout after 60s", ErrorPattern::Timeout),
            ("too many requests, slow down", ErrorPattern::RateLimited),
            ("connection reset by peer", ErrorPattern::DnsOrNetwork),
            ("HTTP 502 fetching http://x", ErrorPattern::ServerError5xx),
            ("net::ERR_ABORTED during goto", ErrorPattern::NavigationFailure),
            ("no element matched selector: .price", ErrorPattern::ElementMissing),
            ("something odd happened", ErrorPattern::Unknown),
        ];
        for (message, expected) in cases {
            let detected = classifier.classify(message, "https://shop.example/p", None, None);
            assert_eq!(detected.pattern, expected, "message: {message}");
        }
    }

    #[test]
    fn page_content_reveals_captcha_and_auth_walls() {
        let classifier = ErrorClassifier::new();
        let captcha = classifier.classify(
            "unexpected page state",
            "https://x.example",
            None,
            Some("<div>Please solve this CAPTCHA to continue</div>"),
        );
        assert_eq!(captcha.pattern, ErrorPattern::BlockedByCaptcha);

        let auth = classifier.classify(
            "unexpected page state",
            "https://x.example",
            None,
            Some("<h1>Sign in to continue</h1>"),
        );
        assert_eq!(auth.pattern, ErrorPattern::AuthRequired);
    }
}
