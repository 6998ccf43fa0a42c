//! Utility functions for timestamps, run ids and text handling.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Maximum characters of the idea text kept in a run id.
pub const RUN_ID_SLUG_CHARS: usize = 15;

/// Returns the current UTC time.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Generates a random UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Builds a human-readable run id: `YYYY-MM-DD_HHMM_<idea slug>_<business type>`.
///
/// The slug keeps only word characters of the idea, truncated to
/// [`RUN_ID_SLUG_CHARS`]. Without usable idea text a short uuid replaces the
/// slug. The result is always safe to use as a file name.
#[must_use]
pub fn generate_run_id(idea: Option<&str>, business_type: Option<&str>, at: DateTime<Utc>) -> String {
    let slug: String = idea
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(RUN_ID_SLUG_CHARS)
        .collect();
    let slug = if slug.is_empty() {
        generate_uuid().simple().to_string()[..8].to_string()
    } else {
        slug
    };

    let mut run_id = format!("{}_{slug}", at.format("%Y-%m-%d_%H%M"));
    if let Some(biz) = business_type.map(str::trim).filter(|b| !b.is_empty()) {
        run_id.push('_');
        run_id.push_str(biz);
    }
    sanitize_file_component(&run_id)
}

/// Replaces characters that are unsafe in file names with `_`.
#[must_use]
pub fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Returns the first `max_chars` characters of `text`, with `...` appended
/// when truncated. Always cuts on a char boundary.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
