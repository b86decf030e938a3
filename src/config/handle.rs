//! Atomically swappable config snapshot.
//!
//! Requests call [`ConfigHandle::snapshot`] once and keep the returned `Arc`
//! for their whole lifetime; a reload only affects requests started after it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::schema::PipelineConfig;

#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<PipelineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// The config in effect right now.
    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        self.current.load_full()
    }

    pub fn replace(&self, config: PipelineConfig) {
        self.current.store(Arc::new(config));
    }

    /// Apply every config received from `updates` (e.g. a [`ConfigWatcher`]).
    ///
    /// [`ConfigWatcher`]: crate::config::watcher::ConfigWatcher
    pub fn follow(&self, mut updates: mpsc::UnboundedReceiver<PipelineConfig>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(config) = updates.recv().await {
                handle.replace(config);
                tracing::info!("Configuration reloaded");
            }
        })
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
