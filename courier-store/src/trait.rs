use async_trait::async_trait;
use courier_common::{LogEvent, Message};

use crate::types::{
    MessageUpdate, ProviderStats, ProviderStatsUpdate, SystemStats, SystemStatsUpdate,
};

/// Durable record of messages, the delivery log, and dashboard counters
///
/// The delivery pipeline reads and writes through this trait only; it never
/// assumes a storage technology.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Store a newly accepted message
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists) if the id is taken
    async fn create_message(&self, message: &Message) -> crate::Result<()>;

    /// Apply a partial update and return the stored result
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::StoreError::NotFound) if the message is unknown
    async fn update_message(&self, id: &str, update: &MessageUpdate) -> crate::Result<Message>;

    /// Fetch a message by id
    async fn get_message(&self, id: &str) -> crate::Result<Option<Message>>;

    /// Most recently created messages first
    async fn list_recent_messages(&self, limit: usize) -> crate::Result<Vec<Message>>;

    /// Append to the delivery log, returning the event with its assigned id
    async fn append_log(&self, event: LogEvent) -> crate::Result<LogEvent>;

    /// Most recent log events first
    async fn list_recent_logs(&self, limit: usize) -> crate::Result<Vec<LogEvent>>;

    async fn get_provider_stats(&self, name: &str) -> crate::Result<Option<ProviderStats>>;

    async fn update_provider_stats(
        &self,
        name: &str,
        update: &ProviderStatsUpdate,
    ) -> crate::Result<ProviderStats>;

    async fn get_system_stats(&self) -> crate::Result<SystemStats>;

    async fn update_system_stats(&self, update: &SystemStatsUpdate) -> crate::Result<SystemStats>;
}
