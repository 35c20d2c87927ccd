use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::http_client::TransferProgress;
use crate::{Platform, StrategyKind};

/// Lifecycle events of one `collect` call, tagged with the source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CollectorEvent {
    Start {
        source_id: String,
        url: String,
        platform: Platform,
    },
    Status {
        source_id: String,
        phase: String,
        message: String,
    },
    DownloadProgress {
        source_id: String,
        downloaded: u64,
        total: Option<u64>,
        progress: Option<f64>,
    },
    Warning {
        source_id: String,
        /// Strategy that failed, absent for quality warnings.
        strategy: Option<StrategyKind>,
        message: String,
    },
    Completed {
        source_id: String,
        method: StrategyKind,
        total_items: usize,
        quality_score: u8,
    },
    Error {
        source_id: String,
        code: String,
        message: String,
    },
}

impl CollectorEvent {
    pub fn source_id(&self) -> &str {
        match self {
            Self::Start { source_id, .. }
            | Self::Status { source_id, .. }
            | Self::DownloadProgress { source_id, .. }
            | Self::Warning { source_id, .. }
            | Self::Completed { source_id, .. }
            | Self::Error { source_id, .. } => source_id,
        }
    }
}

/// Event sender bound to one source.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<CollectorEvent>,
    source_id: String,
}

impl EventSink {
    pub fn new(sender: broadcast::Sender<CollectorEvent>, source_id: impl Into<String>) -> Self {
        Self {
            sender,
            source_id: source_id.into(),
        }
    }

    /// Sink whose events go nowhere, for calling strategies directly.
    pub fn detached(source_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(sender, source_id)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn emit(&self, event: CollectorEvent) {
        let _ = self.sender.send(event);
    }

    pub fn status(&self, phase: &str, message: impl Into<String>) {
        self.emit(CollectorEvent::Status {
            source_id: self.source_id.clone(),
            phase: phase.to_owned(),
            message: message.into(),
        });
    }

    pub fn warning(&self, strategy: Option<StrategyKind>, message: impl Into<String>) {
        self.emit(CollectorEvent::Warning {
            source_id: self.source_id.clone(),
            strategy,
            message: message.into(),
        });
    }

    pub fn download_progress(&self, progress: TransferProgress) {
        self.emit(CollectorEvent::DownloadProgress {
            source_id: self.source_id.clone(),
            downloaded: progress.transferred,
            total: progress.total,
            progress: progress.fraction(),
        });
    }
}
