use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse a device-supplied timestamp.
///
/// Accepts a space or `T` between date and time, a trailing `Z`, numeric
/// offsets with or without a colon, and naive values (taken as UTC).
pub fn parse_device_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.len() < 10 {
        return None;
    }

    let mut normalized = trimmed.to_string();
    if normalized.as_bytes().get(10) == Some(&b' ') {
        normalized.replace_range(10..11, "T");
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = normalized
        .strip_suffix('Z')
        .or_else(|| normalized.strip_suffix('z'))
        .unwrap_or(&normalized);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Device timestamp if it parses, otherwise the ingestion time.
pub fn resolve_captured_at(raw: Option<&str>, ingested_at: DateTime<Utc>) -> DateTime<Utc> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => parse_device_timestamp(raw).unwrap_or_else(|| {
            tracing::debug!(raw, "unparseable device timestamp, using ingestion time");
            ingested_at
        }),
        _ => ingested_at,
    }
}
