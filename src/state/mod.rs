//! Job and row state: the persistence contract, its backends, and the
//! [`StateManager`] that mediates every lifecycle transition.

mod manager;
mod memory;
mod sqlite;
mod store;

pub use manager::{CancelHook, RowUpdate, StateManager};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::Store;
