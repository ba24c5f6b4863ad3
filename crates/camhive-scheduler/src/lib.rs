pub mod manager;
pub mod sqlite_store;
pub mod state;
pub mod store;

pub use manager::*;
pub use sqlite_store::SqliteStore;
pub use state::*;
pub use store::*;
