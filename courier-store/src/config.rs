use serde::Deserialize;

/// Configuration for the memory-backed store
///
/// ```ron
/// Courier (
///     store: (
///         log_capacity: 5000,
///     ),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryStoreConfig {
    /// Number of log events retained, oldest are evicted first
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

const fn default_log_capacity() -> usize {
    1000
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
        }
    }
}
