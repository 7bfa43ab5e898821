pub mod manager;
pub mod lmdb_storage;

pub use manager::{StorageManager, StoreConfig};
pub use lmdb_storage::LmdbGraph;
