//! Item history.
//!
//! Two mappings from item uuid to [`ItemHistory`]: the session history,
//! recorded from item changes and optionally persisted, and the server
//! history, rebuilt from revisions on every fetch.

mod entry;
mod flush;
mod item_history;
mod manager;
mod server;
mod session;

pub use entry::{HistoryOperation, ItemHistoryEntry, LARGE_ENTRY_DELTA};
pub use flush::DebouncedFlush;
pub use item_history::ItemHistory;
pub use manager::HistoryManager;
pub use server::ServerHistory;
pub use session::HistorySession;
