use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use courier_common::{LogEvent, Message, MessageStatus};

use crate::{
    MemoryStoreConfig, StoreError,
    r#trait::MessageStore,
    types::{MessageUpdate, ProviderStats, ProviderStatsUpdate, SystemStats, SystemStatsUpdate},
};

#[derive(Debug, Default)]
struct Records {
    messages: HashMap<String, Message>,
    logs: VecDeque<LogEvent>,
    next_log_id: u64,
    providers: HashMap<String, ProviderStats>,
    system: SystemStats,
}

impl Records {
    /// Start a fresh daily counter when the UTC day has changed
    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if self.system.day != today {
            self.system.day = today;
            self.system.emails_sent_today = 0;
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn recompute_success_rate(&mut self) {
        let total = self.messages.len();
        if total == 0 {
            return;
        }
        let sent = self
            .messages
            .values()
            .filter(|message| message.status == MessageStatus::Sent)
            .count();
        self.system.success_rate = ((sent as f64 / total as f64) * 100.0).round() as u32;
    }
}

/// In-memory store
///
/// Everything lives behind a single `RwLock`; the log is a ring bounded by
/// `log_capacity`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
    log_capacity: usize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&MemoryStoreConfig::default())
    }

    #[must_use]
    pub fn with_config(config: &MemoryStoreConfig) -> Self {
        Self {
            records: Arc::new(RwLock::new(Records::default())),
            log_capacity: config.log_capacity.max(1),
        }
    }

    /// Number of stored messages
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .messages
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn log_capacity(&self) -> usize {
        self.log_capacity
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: &Message) -> crate::Result<()> {
        let mut records = self.records.write()?;
        if records.messages.contains_key(&message.id) {
            return Err(StoreError::AlreadyExists(message.id.clone()));
        }

        records.messages.insert(message.id.clone(), message.clone());
        records.recompute_success_rate();
        tracing::trace!(id = %message.id, "Stored message");
        Ok(())
    }

    async fn update_message(&self, id: &str, update: &MessageUpdate) -> crate::Result<Message> {
        let mut records = self.records.write()?;
        let message = records
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let was_sent = message.status == MessageStatus::Sent;
        update.apply(message);
        let now_sent = message.status == MessageStatus::Sent;
        let updated = message.clone();

        if now_sent && !was_sent {
            records.roll_day();
            records.system.emails_sent_today += 1;
        }
        records.recompute_success_rate();
        records.system.last_updated = Utc::now();

        Ok(updated)
    }

    async fn get_message(&self, id: &str) -> crate::Result<Option<Message>> {
        Ok(self.records.read()?.messages.get(id).cloned())
    }

    async fn list_recent_messages(&self, limit: usize) -> crate::Result<Vec<Message>> {
        let mut messages: Vec<_> = self.records.read()?.messages.values().cloned().collect();

        // Ids break ties between messages created within the same clock tick
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        messages.truncate(limit);

        Ok(messages)
    }

    async fn append_log(&self, mut event: LogEvent) -> crate::Result<LogEvent> {
        let mut records = self.records.write()?;

        records.next_log_id += 1;
        event.id = records.next_log_id;
        records.logs.push_back(event.clone());

        while records.logs.len() > self.log_capacity {
            if let Some(evicted) = records.logs.pop_front() {
                tracing::trace!(id = evicted.id, "Evicted log event");
            }
        }

        Ok(event)
    }

    async fn list_recent_logs(&self, limit: usize) -> crate::Result<Vec<LogEvent>> {
        Ok(self
            .records
            .read()?
            .logs
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_provider_stats(&self, name: &str) -> crate::Result<Option<ProviderStats>> {
        Ok(self.records.read()?.providers.get(name).cloned())
    }

    async fn update_provider_stats(
        &self,
        name: &str,
        update: &ProviderStatsUpdate,
    ) -> crate::Result<ProviderStats> {
        let mut records = self.records.write()?;
        let stats = records
            .providers
            .entry(name.to_string())
            .or_insert_with(|| ProviderStats::new(name));

        if let Some(successes) = update.successes {
            stats.successes = successes;
        }
        if let Some(failures) = update.failures {
            stats.failures = failures;
        }
        if let Some(avg_latency_ms) = update.avg_latency_ms {
            stats.avg_latency_ms = avg_latency_ms;
        }
        if let Some(circuit_state) = &update.circuit_state {
            stats.circuit_state = Some(circuit_state.clone());
        }
        stats.last_checked = Utc::now();

        Ok(stats.clone())
    }

    async fn get_system_stats(&self) -> crate::Result<SystemStats> {
        let mut records = self.records.write()?;
        records.roll_day();
        Ok(records.system.clone())
    }

    async fn update_system_stats(&self, update: &SystemStatsUpdate) -> crate::Result<SystemStats> {
        let mut records = self.records.write()?;
        records.roll_day();

        let system = &mut records.system;
        if let Some(sent) = update.emails_sent_today {
            system.emails_sent_today = sent;
        }
        if let Some(success_rate) = update.success_rate {
            system.success_rate = success_rate;
        }
        if let Some(queue_size) = update.queue_size {
            system.queue_size = queue_size;
        }
        if let Some(usage) = update.rate_limit_usage {
            system.rate_limit_usage = usage;
        }
        system.last_updated = Utc::now();

        Ok(system.clone())
    }
}
