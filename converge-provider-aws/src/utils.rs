//! Utility functions for value normalization

/// Normalize region value (e.g., "aws.Region.ap_northeast_1" -> "ap-northeast-1")
pub fn normalize_region(s: &str) -> String {
    let region_part = if s.contains('.') {
        s.split('.').next_back().unwrap_or(s)
    } else {
        s
    };
    region_part.replace('_', "-")
}

/// Normalize an IP protocol for comparison ("all" and "-1" are the same thing)
pub fn normalize_protocol(s: &str) -> String {
    match s.to_ascii_lowercase().as_str() {
        "all" | "-1" => "-1".to_string(),
        other => other.to_string(),
    }
}
