use std::{sync::Arc, time::Duration};

use courier_common::{Message, internal, logging};
use courier_delivery::{
    DeliveryConfig, DeliveryOrchestrator, DeliveryProvider, SimulatedProvider,
    SimulatedProviderConfig, SubmitRequest, TickOutcome,
};
use courier_store::{MemoryStore, MemoryStoreConfig, MessageStore};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// Top-level configuration of a courier instance
///
/// ```ron
/// (
///     delivery: (dispatch_interval_ms: 1000),
///     providers: [(name: "MockProvider A", latency_ms: 125)],
///     store: (log_capacity: 1000),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Providers in preference order, the primary and fallback presets when empty
    #[serde(alias = "provider", default)]
    pub providers: Vec<SimulatedProviderConfig>,
    #[serde(default)]
    pub store: MemoryStoreConfig,
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Courier {
    /// Provider configurations actually used
    pub fn provider_configs(&self) -> Vec<SimulatedProviderConfig> {
        if self.providers.is_empty() {
            vec![
                SimulatedProviderConfig::primary(),
                SimulatedProviderConfig::fallback(),
            ]
        } else {
            self.providers.clone()
        }
    }

    /// Assemble a pipeline over a fresh in-memory store
    pub fn orchestrator(&self) -> DeliveryOrchestrator {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::with_config(&self.store));
        let providers = self
            .provider_configs()
            .into_iter()
            .map(|config| Arc::new(SimulatedProvider::new(config)) as Arc<dyn DeliveryProvider>)
            .collect();

        DeliveryOrchestrator::new(self.delivery.clone(), store, providers)
    }

    /// Run the dispatch loop until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// This function will return an error if the signal handlers cannot be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        internal!("Controller running");

        let orchestrator = self.orchestrator();
        let shutdown = CancellationToken::new();

        let signal = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let r = shutdown_signal().await;
                shutdown.cancel();
                r
            }
        });

        // A tick in flight finishes before serve returns
        orchestrator.serve(shutdown).await;

        internal!("Shutting down...");

        signal.await?
    }

    /// Submit one message and dispatch until it is sent or failed
    ///
    /// Retries are honoured, so this can take as long as the backoff schedule
    /// of the configured retry policy.
    ///
    /// # Errors
    ///
    /// This function will return an error if the submission is refused.
    pub async fn send(
        self,
        request: SubmitRequest,
        idempotency_key: Option<&str>,
    ) -> anyhow::Result<Message> {
        logging::init();

        let orchestrator = self.orchestrator();
        let response = orchestrator.submit(request, idempotency_key).await?;
        let idle = orchestrator.config().dispatch_interval().min(Duration::from_millis(100));

        loop {
            match orchestrator.tick().await {
                TickOutcome::Sent { id, .. } | TickOutcome::Failed { id, .. }
                    if id == response.id =>
                {
                    break;
                }
                TickOutcome::Idle | TickOutcome::Retrying { .. } => tokio::time::sleep(idle).await,
                _ => {}
            }
        }

        orchestrator
            .store()
            .get_message(&response.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Message {} missing from store", response.id))
    }
}
