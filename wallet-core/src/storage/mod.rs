pub mod backup;
pub mod kv;
pub mod paths;
pub mod vault;

pub use backup::BackupBundle;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use paths::WalletPaths;
pub use vault::{Vault, VaultRecord};
