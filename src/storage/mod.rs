mod cached;
mod sqlite;
mod trait_def;

pub use cached::CachedStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};
