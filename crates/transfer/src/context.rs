use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::progress::TransferProgress;

/// Per-call state handed explicitly to every orchestrator and worker.
///
/// Cloning is cheap; clones share progress, cancellation and config.
#[derive(Debug, Clone)]
pub struct TransferContext {
    pub progress: Arc<TransferProgress>,
    pub cancel: CancellationToken,
    pub config: Arc<TransferConfig>,
}

impl Default for TransferContext {
    fn default() -> Self {
        Self::new(TransferConfig::default())
    }
}

impl TransferContext {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            progress: Arc::new(TransferProgress::default()),
            cancel: CancellationToken::new(),
            config: Arc::new(config),
        }
    }

    /// Fresh progress and cancellation over an already shared config.
    pub fn from_shared(config: Arc<TransferConfig>) -> Self {
        Self {
            progress: Arc::new(TransferProgress::default()),
            cancel: CancellationToken::new(),
            config,
        }
    }

    pub fn with_progress(mut self, progress: Arc<TransferProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
