//! Marker-based classification of provider stderr.
//!
//! Agent CLIs do not report failure causes in a machine-readable way, so this
//! is a best-effort scan for well-known substrings. Classification only ever
//! widens retries and diagnostics; it never fails a provider on its own.

const TRANSIENT_MARKERS: &[(&str, &str)] = &[
    ("rate limit", "rate_limited"),
    ("rate-limit", "rate_limited"),
    ("429", "rate_limited"),
    ("overloaded", "rate_limited"),
    ("econnreset", "network_transient"),
    ("etimedout", "network_transient"),
    ("network error", "network_transient"),
    ("connection reset", "network_transient"),
    ("temporarily unavailable", "network_transient"),
];

const WARNING_MARKERS: &[(&str, &str)] = &[
    ("rate limit", "rate_limited"),
    ("mcp", "mcp_startup"),
    ("retrying", "provider_retrying"),
    ("deprecated", "deprecation_notice"),
];

/// Returns a transient-failure label when stderr looks like a retryable error.
pub fn transient_failure(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, label)| *label)
}

/// Diagnostic markers worth surfacing on the provider result.
pub fn stderr_warnings(stderr: &str) -> Vec<String> {
    let lower = stderr.to_lowercase();
    let mut out = Vec::new();
    for (marker, label) in WARNING_MARKERS {
        if lower.contains(marker) && !out.iter().any(|w| w == label) {
            out.push((*label).to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        assert_eq!(
            transient_failure("Error: Rate limit exceeded, try later"),
            Some("rate_limited")
        );
        assert_eq!(transient_failure("HTTP 429 Too Many Requests"), Some("rate_limited"));
    }

    #[test]
    fn ordinary_errors_are_not_transient() {
        assert_eq!(transient_failure("error: unknown flag --frobnicate"), None);
        assert_eq!(transient_failure(""), None);
    }

    #[test]
    fn warnings_deduplicate() {
        let w = stderr_warnings("rate limit hit\nrate limit hit again\nMCP server slow");
        assert_eq!(w, vec!["rate_limited".to_string(), "mcp_startup".to_string()]);
    }
}
