use chrono::{DateTime, Utc};
use rand::Rng;

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `{label}_{UTC timestamp}_{random hex}`, unique per accepted capture.
pub fn generate_record_id(label: &str, at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!(
        "{}_{}_{suffix:06x}",
        sanitize_label(label),
        at.format("%Y%m%dT%H%M%S%3fZ")
    )
}
