//! Record store for the courier delivery pipeline
//!
//! The pipeline only talks to [`MessageStore`]; it assumes read-after-write
//! visibility within the process and nothing stronger.

pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::{MemoryStore, TestStore};
pub use config::MemoryStoreConfig;
pub use error::{Result, StoreError};
pub use r#trait::MessageStore;
pub use types::{MessageUpdate, ProviderStats, ProviderStatsUpdate, SystemStats, SystemStatsUpdate};
