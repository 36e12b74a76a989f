//! Key-value store implementations.
//!
//! Available backends:
//! - `MemoryKv` - In-memory storage (always available)
//! - `SqliteKv` - SQLite file-based storage (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryKv;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKv;
