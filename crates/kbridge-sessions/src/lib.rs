pub mod db;
pub mod error;
pub mod manager;
pub mod state;
pub mod store;

pub use error::SessionError;
pub use manager::SqliteSessionStore;
pub use state::{OptionKind, PendingSelection, SessionState, StoredOption};
pub use store::{MemorySessionStore, SessionStore};
