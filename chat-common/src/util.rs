//! String helpers for logging.

use regex::Regex;
use std::sync::OnceLock;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so multi-byte text (emoji, CJK) is never split.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

fn secret_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Gemini passes its key as a query parameter, which reqwest echoes in errors.
            (r"([?&]key=)[^&\s)]+", "${1}***REDACTED***"),
            (r"(?i)(api[_-]?key|apikey)[=:]\s*\S{20,}", "$1=***REDACTED***"),
            (r"(?i)(password|passwd|pwd)[=:]\s*\S+", "$1=***REDACTED***"),
            (r"(?i)(token|secret|bearer)\s*[=:]\s*\S{10,}", "$1=***REDACTED***"),
            (r"AIza[0-9A-Za-z_\-]{35}", "***REDACTED_GOOGLE_KEY***"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Sanitize a string for safe logging (redact API keys and credentials).
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in secret_patterns() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}
