//! One dispatch tick: claim, attempt across providers, settle the outcome

use std::{any::Any, panic::AssertUnwindSafe, time::Duration};

use chrono::Utc;
use courier_common::{FailureOutcome, LogEvent, LogLevel, Message, outgoing};
use courier_store::{ProviderStats, ProviderStatsUpdate};
use futures_util::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::DeliveryOrchestrator;
use crate::{
    error::{CircuitError, DeliveryError, ProviderError},
    provider::{DeliveryProvider, SendReceipt},
    types::QueueEntry,
};

/// What a call to [`DeliveryOrchestrator::tick`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running
    Busy,
    /// Nothing was eligible for dispatch
    Idle,
    /// The message was delivered
    Sent { id: String, provider: String },
    /// The attempt cycle failed and the message was re-queued
    Retrying {
        id: String,
        attempt: u32,
        delay: Duration,
    },
    /// The message reached its retry ceiling
    Failed { id: String, error: DeliveryError },
    /// The claimed message was already terminal and was dropped from the queue
    Dropped { id: String },
}

/// A successful attempt cycle
#[derive(Debug)]
struct Delivered {
    provider: String,
    receipt: SendReceipt,
}

impl DeliveryOrchestrator {
    /// Run one dispatch tick
    ///
    /// Claims at most one eligible entry and drives it through one attempt
    /// cycle. Nothing escapes a tick: every failure ends up in the outcome
    /// and the delivery log. A call made while another tick is running
    /// returns [`TickOutcome::Busy`] without doing anything.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_running) = self.tick_guard.try_lock() else {
            debug!("Dispatch tick already running, skipping");
            return TickOutcome::Busy;
        };

        let Some(entry) = self.queue.dequeue_next() else {
            return TickOutcome::Idle;
        };

        let outcome = self.process(entry).await;
        self.sync_system_stats().await;
        outcome
    }

    async fn process(&self, entry: QueueEntry) -> TickOutcome {
        let mut message = entry.message;
        debug!(
            message_id = %message.id,
            priority = %message.priority,
            retry_count = message.retry_count,
            "Dispatching message"
        );

        match self.attempt_delivery(&message).await {
            Ok(delivered) => self.handle_success(&mut message, delivered).await,
            Err(error) => self.handle_failure(&mut message, &error).await,
        }
    }

    /// Try every provider in preference order, first success wins
    ///
    /// A provider whose breaker refuses attempts is skipped; a provider that
    /// exhausts its inner retries counts as one breaker failure.
    async fn attempt_delivery(&self, message: &Message) -> Result<Delivered, DeliveryError> {
        let mut last_error = None;

        for provider in self.providers.iter() {
            let name = provider.name();
            let breaker = self.breakers.get(name);

            if !breaker.allows_attempt() {
                self.log(
                    LogEvent::new(
                        LogLevel::Warn,
                        format!("Circuit breaker OPEN for {name}, skipping"),
                    )
                    .with_provider(name)
                    .with_message_id(&message.id),
                )
                .await;
                last_error = Some(DeliveryError::ProviderUnavailable(name.to_string()));
                continue;
            }

            let started = Instant::now();
            let result = breaker
                .execute(|| self.send_with_retry(provider.as_ref(), message))
                .await;
            let latency = started.elapsed();

            match result {
                Ok(receipt) => {
                    self.record_provider_outcome(name, true, latency).await;
                    return Ok(Delivered {
                        provider: name.to_string(),
                        receipt,
                    });
                }
                Err(CircuitError::Open(_)) => {
                    // Another caller took the half-open probe first
                    last_error = Some(DeliveryError::ProviderUnavailable(name.to_string()));
                }
                Err(CircuitError::Inner(error)) => {
                    self.record_provider_outcome(name, false, latency).await;
                    self.log(
                        LogEvent::new(LogLevel::Error, format!("Provider {name} failed: {error}"))
                            .with_provider(name)
                            .with_message_id(&message.id),
                    )
                    .await;
                    last_error = Some(error);
                }
            }
        }

        let reason = last_error.map_or_else(
            || "no providers configured".to_string(),
            |error| error.to_string(),
        );
        Err(DeliveryError::AllProvidersFailed(reason))
    }

    /// Send through one provider, retrying with backoff within this attempt cycle
    async fn send_with_retry(
        &self,
        provider: &dyn DeliveryProvider,
        message: &Message,
    ) -> Result<SendReceipt, DeliveryError> {
        let attempts = self.config.retry.provider_attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            outgoing!(
                level = DEBUG,
                message_id = %message.id,
                provider = %provider.name(),
                attempt,
                "Handing message to provider"
            );

            // A panicking provider is just a failed send
            let sent = AssertUnwindSafe(provider.send(
                &message.recipient,
                &message.subject,
                &message.body,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = format!("provider panicked: {}", panic_message(panic.as_ref()));
                error!(
                    message_id = %message.id,
                    provider = %provider.name(),
                    attempt,
                    %reason,
                    "Provider send panicked"
                );
                Err(ProviderError::new(provider.name(), reason))
            });

            match sent {
                Ok(receipt) => return Ok(receipt),
                Err(error) => {
                    last_error = error.reason;
                    if attempt < attempts {
                        let delay = self.config.retry.backoff(attempt);
                        self.log(
                            LogEvent::new(
                                LogLevel::Warn,
                                format!(
                                    "Attempt {attempt}/{attempts} failed for email {} via {}, retrying in {}ms",
                                    message.id,
                                    provider.name(),
                                    delay.as_millis()
                                ),
                            )
                            .with_provider(provider.name())
                            .with_message_id(&message.id),
                        )
                        .await;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(DeliveryError::DeliveryFailure {
            provider: provider.name().to_string(),
            reason: last_error,
        })
    }

    async fn handle_success(&self, message: &mut Message, delivered: Delivered) -> TickOutcome {
        if let Err(e) = message.mark_sent(&delivered.provider, Utc::now()) {
            return self.drop_terminal(message, &e.to_string());
        }

        self.persist(message).await;
        self.queue.mark_completed(&message.id);
        self.log(
            LogEvent::new(
                LogLevel::Success,
                format!(
                    "Email {} delivered via {} ({})",
                    message.id, delivered.provider, delivered.receipt.message_id
                ),
            )
            .with_provider(&delivered.provider)
            .with_message_id(&message.id),
        )
        .await;

        TickOutcome::Sent {
            id: message.id.clone(),
            provider: delivered.provider,
        }
    }

    async fn handle_failure(&self, message: &mut Message, error: &DeliveryError) -> TickOutcome {
        let reason = error.to_string();
        let outcome = match message.record_failure(&reason, Utc::now()) {
            Ok(outcome) => outcome,
            Err(e) => return self.drop_terminal(message, &e.to_string()),
        };

        match outcome {
            FailureOutcome::Exhausted => {
                self.persist(message).await;
                self.queue.mark_completed(&message.id);

                let terminal = DeliveryError::MaxRetriesExceeded {
                    id: message.id.clone(),
                    attempts: message.retry_count,
                    reason,
                };
                self.log(
                    LogEvent::new(LogLevel::Error, terminal.to_string())
                        .with_message_id(&message.id),
                )
                .await;

                TickOutcome::Failed {
                    id: message.id.clone(),
                    error: terminal,
                }
            }
            FailureOutcome::Retry(attempt) => {
                let delay = self.config.retry.backoff(attempt);

                self.persist(message).await;
                self.queue.update_message(message);
                self.queue.mark_failed(&message.id, Some(delay));
                self.log(
                    LogEvent::new(
                        LogLevel::Warn,
                        format!(
                            "Email {} scheduled for retry {attempt}/{} in {}ms",
                            message.id,
                            message.max_retries,
                            delay.as_millis()
                        ),
                    )
                    .with_message_id(&message.id),
                )
                .await;

                TickOutcome::Retrying {
                    id: message.id.clone(),
                    attempt,
                    delay,
                }
            }
        }
    }

    /// Remove an entry whose message was already terminal when claimed
    fn drop_terminal(&self, message: &Message, reason: &str) -> TickOutcome {
        warn!(message_id = %message.id, reason, "Dropping terminal message from queue");
        self.queue.mark_completed(&message.id);
        TickOutcome::Dropped {
            id: message.id.clone(),
        }
    }

    /// Fold one provider-level attempt cycle into the provider's stats
    async fn record_provider_outcome(&self, provider: &str, success: bool, latency: Duration) {
        let current = match self.store.get_provider_stats(provider).await {
            Ok(stats) => stats.unwrap_or_else(|| ProviderStats::new(provider)),
            Err(e) => {
                warn!(provider, error = %e, "Failed to read provider stats");
                return;
            }
        };

        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut stats = current.with_outcome(success, latency_ms);
        stats.circuit_state = Some(self.breakers.get(provider).state().to_string());

        if let Err(e) = self
            .store
            .update_provider_stats(provider, &ProviderStatsUpdate::from(&stats))
            .await
        {
            warn!(provider, error = %e, "Failed to update provider stats");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
