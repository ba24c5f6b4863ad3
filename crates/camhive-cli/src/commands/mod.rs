pub mod device;
pub mod trigger;
