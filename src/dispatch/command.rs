//! Job Commands - control messages from a `JobHandle` to its dispatch actor

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::oneshot;

use super::queue::QueueStats;
use crate::domain::{JobState, Progress, SliceStatus};
use crate::error::Result;
use crate::pricing::{FundingState, PricingState};

#[derive(Debug)]
pub enum JobCommand {
    /// Stop new dispatch; finish once in-flight slices drain
    Cancel,
    /// Change the per-slice offer; replies with the previous offer
    Reprice {
        offer: Decimal,
        reply: oneshot::Sender<Result<Decimal>>,
    },
    /// The payer's balance changed; re-read it now
    RefreshFunding,
    Snapshot(oneshot::Sender<JobSnapshot>),
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceSnapshot {
    pub index: usize,
    pub status: SliceStatus,
    pub attempts: u32,
    pub last_progress: Option<Progress>,
}

/// Point-in-time view of a job's actor state
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub state: JobState,
    pub pricing: PricingState,
    pub funding: FundingState,
    pub funding_paused: bool,
    pub cancel_requested: bool,
    pub slices: Vec<SliceSnapshot>,
    #[serde(skip)]
    pub queue: QueueStats,
}

impl JobSnapshot {
    pub fn count(&self, status: SliceStatus) -> usize {
        self.slices.iter().filter(|s| s.status == status).count()
    }

    /// Slices that have ever left the queue
    pub fn ever_dispatched(&self) -> usize {
        self.slices.iter().filter(|s| s.attempts > 0).count()
    }

    pub fn in_flight(&self) -> usize {
        self.slices
            .iter()
            .filter(|s| s.status.is_in_flight())
            .count()
    }
}
