//! Database module for SQLite persistence.

mod pool;
mod store;

pub use pool::*;
pub use store::*;
