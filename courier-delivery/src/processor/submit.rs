use courier_common::{LogEvent, LogLevel, Message};
use courier_store::StoreError;
use tracing::{debug, warn};
use ulid::Ulid;

use super::DeliveryOrchestrator;
use crate::{
    error::SubmitError,
    types::{SubmitRequest, SubmitResponse},
};

impl DeliveryOrchestrator {
    /// Accept a message for delivery
    ///
    /// With an `idempotency_key` the key becomes the message id, and a key
    /// recorded within the idempotency TTL answers [`SubmitStatus::Duplicate`]
    /// without creating work or consuming rate-limit capacity. A key is only
    /// recorded once its message is stored, so a refused or failed submission
    /// can be retried with the same key.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Validation`] for a malformed request, nothing is recorded
    /// - [`SubmitError::RateLimitExceeded`] when the admission window is full
    /// - [`SubmitError::Store`] when the message cannot be persisted; it is not enqueued
    ///
    /// [`SubmitStatus::Duplicate`]: crate::SubmitStatus::Duplicate
    pub async fn submit(
        &self,
        request: SubmitRequest,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitResponse, SubmitError> {
        let priority = request.validate()?;

        let key = idempotency_key.map(str::trim).filter(|key| !key.is_empty());
        if let Some(key) = key
            && self.idempotency.contains(key)
        {
            debug!(idempotency_key = key, "Duplicate submission");
            return Ok(SubmitResponse::duplicate(key.to_string()));
        }

        if !self.rate_limiter.try_admit() {
            let retry_after = self.rate_limiter.retry_after();
            self.log(LogEvent::new(
                LogLevel::Warn,
                format!(
                    "Rate limit exceeded for {}, retry after {}ms",
                    request.recipient.trim(),
                    retry_after.as_millis()
                ),
            ))
            .await;
            return Err(SubmitError::RateLimitExceeded { retry_after });
        }

        let id = key.map_or_else(|| Ulid::new().to_string(), str::to_string);
        let message = Message::new(
            id,
            request.recipient.trim(),
            request.subject,
            request.message,
            priority,
        )
        .with_max_retries(self.config.retry.max_retries);

        // The store settles concurrent submissions with one key, and a key
        // reused after its TTL that still names a stored message
        match self.store.create_message(&message).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(id)) if key.is_some() => {
                debug!(message_id = %id, "Submission matches a stored message");
                self.idempotency.record(&id);
                return Ok(SubmitResponse::duplicate(id));
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to store submitted message");
                return Err(e.into());
            }
        }

        if let Some(key) = key {
            self.idempotency.record(key);
        }

        let id = message.id.clone();
        let recipient = message.recipient.clone();
        self.queue.enqueue(message);
        self.log(
            LogEvent::new(
                LogLevel::Info,
                format!("Email {id} queued for delivery to {recipient}"),
            )
            .with_message_id(&id),
        )
        .await;
        self.sync_system_stats().await;

        Ok(SubmitResponse::queued(id))
    }
}
