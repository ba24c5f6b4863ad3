//! Perceptual-hash cache that lets near-identical frames reuse the last verdict.

use std::collections::HashMap;

use anyhow::{Context, Result};
use camhive_schema::{Classification, ClassificationState};
use chrono::{DateTime, Duration, Utc};
use image::imageops::FilterType;

/// Distance reported for hashes that cannot be compared.
pub const MAX_DISTANCE: u32 = 64;

/// 64-bit average hash: grayscale, shrink to 8x8, one bit per pixel above the mean.
pub fn average_hash(image: &[u8]) -> Result<u64> {
    let decoded = image::load_from_memory(image).context("failed to decode image for hashing")?;
    let pixels = decoded
        .grayscale()
        .resize_exact(8, 8, FilterType::Lanczos3)
        .to_luma8()
        .into_raw();

    let mean = pixels.iter().map(|&p| u32::from(p)).sum::<u32>() as f64 / pixels.len() as f64;
    let hash = pixels
        .iter()
        .enumerate()
        .filter(|(_, p)| f64::from(**p) > mean)
        .fold(0u64, |acc, (i, _)| acc | (1u64 << (63 - i)));
    Ok(hash)
}

pub fn hash_to_hex(hash: u64) -> String {
    format!("{hash:016x}")
}

fn parse_hash(raw: &str) -> Option<u64> {
    if raw.len() != 16 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(raw, 16).ok()
}

/// Bitwise distance between two hex hashes. Malformed input is as far away as it gets.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    match (parse_hash(a), parse_hash(b)) {
        (Some(a), Some(b)) => (a ^ b).count_ones(),
        _ => MAX_DISTANCE,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEvaluation {
    pub hash: String,
    pub state: ClassificationState,
    pub score: f64,
    pub reason: Option<String>,
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
}

impl CachedEvaluation {
    pub fn classification(&self) -> Classification {
        Classification::new(self.state, self.score, self.reason.clone())
    }
}

/// One evaluation per device key, dropped once older than the expiry window.
#[derive(Debug)]
pub struct SimilarityCache {
    expiry: Duration,
    entries: HashMap<String, CachedEvaluation>,
}

impl SimilarityCache {
    pub fn new(expiry_minutes: u64) -> Self {
        let minutes = i64::try_from(expiry_minutes).unwrap_or(i64::MAX);
        Self {
            expiry: Duration::try_minutes(minutes).unwrap_or(Duration::MAX),
            entries: HashMap::new(),
        }
    }

    pub fn is_expired(&self, entry: &CachedEvaluation, now: DateTime<Utc>) -> bool {
        now - entry.timestamp > self.expiry
    }

    /// The live entry for `device`, if any.
    pub fn get(&self, device: &str, now: DateTime<Utc>) -> Option<&CachedEvaluation> {
        self.entries
            .get(device)
            .filter(|entry| !self.is_expired(entry, now))
    }

    pub fn put(&mut self, device: &str, entry: CachedEvaluation) {
        self.entries.insert(device.to_string(), entry);
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let expiry = self.expiry;
        self.entries
            .retain(|_, entry| now - entry.timestamp <= expiry);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
