pub mod capture;
pub mod command;
pub mod hub;

pub use capture::{CaptureHub, CaptureKey, CaptureSubscription, ALL_DEVICES};
pub use command::{CommandHub, CommandSubscription};
pub use hub::{Delivery, Hub, Subscription};
