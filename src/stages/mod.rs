pub mod stage0_embed;
pub mod stage1_cluster;
pub mod stage2_issues;
pub mod stage3_link;

pub use stage0_embed::*;
pub use stage1_cluster::*;
pub use stage2_issues::*;
pub use stage3_link::*;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::FailureLedger;

/// State threaded through every stage of one pipeline run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub batch_id: Uuid,
    pub config: PipelineConfig,
    pub cancel: CancellationToken,
    /// Contained per-item failures, appended after each stage
    pub ledger: FailureLedger,
}

impl RunContext {
    pub fn new(config: PipelineConfig, cancel: CancellationToken) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            config,
            cancel,
            ledger: FailureLedger::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Per-stage numbers reported in the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}
