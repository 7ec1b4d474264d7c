//! Utility modules for dcr-engine

pub mod db_retry;
pub mod keyed_locks;

pub use db_retry::retry_on_lock;
pub use keyed_locks::KeyedLocks;
