use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Class payloads.
pub mod class;
/// Entry payloads.
pub mod entry;
/// Health payloads.
pub mod health;
/// SSE payloads.
pub mod sse;
/// Custom validators.
pub mod validation;

fn format_timestamp(time: Option<OffsetDateTime>) -> Option<String> {
    time.map(|time| {
        time.format(&Rfc3339)
            .unwrap_or_else(|_| "invalid-timestamp".into())
    })
}
