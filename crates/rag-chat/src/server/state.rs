//! Application state for the chat server

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::generation::RagOrchestrator;
use crate::providers::Providers;
use crate::retrieval::VectorStoreBuilder;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Configuration
    config: RagConfig,
    /// Set once the vector store is built
    orchestrator: watch::Sender<Option<Arc<RagOrchestrator>>>,
}

impl AppState {
    /// Create state that is not ready until an orchestrator is installed
    pub fn new(config: RagConfig) -> Self {
        let (orchestrator, _) = watch::channel(None);
        Self {
            inner: Arc::new(AppStateInner {
                config,
                orchestrator,
            }),
        }
    }

    /// Create state that is ready immediately
    pub fn with_orchestrator(config: RagConfig, orchestrator: Arc<RagOrchestrator>) -> Self {
        let state = Self::new(config);
        state.set_ready(orchestrator);
        state
    }

    /// Get configuration
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Whether queries can be served
    pub fn is_ready(&self) -> bool {
        self.inner.orchestrator.borrow().is_some()
    }

    /// Install the orchestrator and wake waiting requests
    pub fn set_ready(&self, orchestrator: Arc<RagOrchestrator>) {
        self.inner.orchestrator.send_replace(Some(orchestrator));
    }

    /// The orchestrator, waiting up to `server.index_wait_secs` for the index
    pub async fn orchestrator(&self) -> Result<Arc<RagOrchestrator>> {
        let mut ready = self.inner.orchestrator.subscribe();
        let wait = Duration::from_secs(self.inner.config.server.index_wait_secs);

        let result = match tokio::time::timeout(wait, ready.wait_for(Option::is_some)).await {
            Ok(Ok(orchestrator)) => orchestrator.clone().ok_or(Error::NotReady),
            _ => {
                tracing::warn!("Index not ready after {:?}", wait);
                Err(Error::NotReady)
            }
        };
        result
    }

    /// Build the vector store in the background, then become ready
    ///
    /// A failed build is logged and leaves the service not ready.
    pub fn spawn_index_build(&self, providers: Providers) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let config = state.config();
            tracing::info!("Building vector store from {}", config.documents.docs_path.display());

            let builder = VectorStoreBuilder::new(
                config,
                Arc::clone(&providers.extractor),
                Arc::clone(&providers.embedder),
            );
            match builder.build().await {
                Ok(store) => {
                    let orchestrator = RagOrchestrator::new(
                        providers.chat,
                        Arc::new(store),
                        &config.retrieval,
                        config.pipeline.clone(),
                    );
                    state.set_ready(Arc::new(orchestrator));
                    tracing::info!("Vector store initialized, accepting questions");
                }
                Err(e) => tracing::error!("Vector store build failed: {}", e),
            }
        })
    }
}
