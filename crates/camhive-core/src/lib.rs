pub mod config;
pub mod cooldown;
pub mod datalake;
pub mod device_lock;
pub mod error;
pub mod ids;
pub mod inference;
pub mod notify;
pub mod recent;
pub mod similarity;
pub mod stats;
pub mod timestamp;
pub mod tracker;

pub use config::*;
pub use datalake::{Datalake, NewCapture, Notifier};
pub use error::InferenceError;
pub use inference::{CaptureOutcome, CapturePayload, InferenceService};
pub use notify::{LogNotifier, WebhookNotifier};
pub use recent::RecentCapture;
pub use stats::{InferenceStats, InferenceStatsSnapshot};
