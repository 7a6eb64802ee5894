//! Dispatch Engine - the single writer of one job's state
//!
//! Each job gets its own actor task. The `run()` loop uses `tokio::select!` to:
//!   - Apply executor signals (progress, console, result, error)
//!   - Apply handle commands (cancel, reprice, funding refresh, snapshot)
//!   - Periodically scan for stalled slices
//!   - Periodically re-read the payer's balance
//! and after every step pumps the queue (funding check → dispatch) and checks
//! for a terminal state. Events are published only after state is committed.

use rust_decimal::Decimal;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::command::{JobCommand, JobSnapshot, SliceSnapshot};
use super::executor::{ExecutorSignal, SignalKind, SliceAssignment, SliceReporter};
use super::queue::WorkQueue;
use super::results::ResultAggregator;
use crate::config::FailurePolicy;
use crate::context::ComputeContext;
use crate::domain::{
    ComputeGroup, EventPayload, JobId, JobManifest, JobState, PublicInfo, SliceSet, SliceStatus,
    StagedFile, StateTransition, WorkDescriptor,
};
use crate::error::{JobMeshError, Result};
use crate::events::EventPublisher;
use crate::pricing::{FundingCheck, FundingMonitor, PricingPolicy};

/// Submission-time description of a job, fixed before exec
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub work: WorkDescriptor,
    pub public: PublicInfo,
    pub compute_groups: Vec<ComputeGroup>,
    pub requirements: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// State shared between the actor (writer) and its handle (readers)
pub struct SharedJobState {
    pub id: Arc<OnceLock<JobId>>,
    pub state: watch::Sender<JobState>,
    pub results: Arc<RwLock<ResultAggregator>>,
}

pub struct DispatchEngine {
    ctx: Arc<ComputeContext>,
    definition: JobDefinition,
    slices: SliceSet,
    queue: WorkQueue,
    state: JobState,
    transitions: Vec<StateTransition>,
    pricing: PricingPolicy,
    funding: FundingMonitor,
    publisher: EventPublisher,
    shared: SharedJobState,
    job_id: Option<JobId>,
    cancel_requested: bool,

    signal_tx: mpsc::Sender<ExecutorSignal>,
    signal_rx: mpsc::Receiver<ExecutorSignal>,
    command_rx: mpsc::Receiver<JobCommand>,
}

impl DispatchEngine {
    pub fn new(
        ctx: Arc<ComputeContext>,
        definition: JobDefinition,
        slices: SliceSet,
        pricing: PricingPolicy,
        publisher: EventPublisher,
        shared: SharedJobState,
        command_rx: mpsc::Receiver<JobCommand>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(ctx.dispatch.signal_buffer.max(1));
        let funding = FundingMonitor::new(ctx.payment.account_id(), Decimal::ZERO);
        let queue = WorkQueue::with_slices(slices.len());

        Self {
            ctx,
            definition,
            slices,
            queue,
            state: JobState::New,
            transitions: Vec::new(),
            pricing,
            funding,
            publisher,
            shared,
            job_id: None,
            cancel_requested: false,
            signal_tx,
            signal_rx,
            command_rx,
        }
    }

    /// Drive the job from submission to a terminal state
    pub async fn run(mut self) {
        if let Err(e) = self.submit().await {
            error!(job = %self.definition.public.name, error = %e, "job submission failed");
            self.shared.results.write().await.set_failure_reason(e.to_string());
            self.publisher.publish(EventPayload::Error {
                job_name: self.definition.public.name.clone(),
                slice_number: None,
                message: e.to_string(),
            });
            self.transition(JobState::Errored, "submission failed");
            return;
        }

        if self.slices.is_empty() {
            self.transition(JobState::Done, "empty input set");
            return;
        }

        let mut stall_tick = tokio::time::interval(self.ctx.dispatch.tick());
        let mut funding_tick = tokio::time::interval(self.ctx.funding.poll_interval());
        stall_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        funding_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.pump().await;

        while !self.state.is_terminal() {
            tokio::select! {
                Some(signal) = self.signal_rx.recv() => {
                    self.handle_signal(signal).await;
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }

                _ = stall_tick.tick() => {
                    self.scan_stalls().await;
                }

                _ = funding_tick.tick() => {
                    self.refresh_balance().await;
                }
            }

            self.pump().await;
        }

        self.release_in_flight().await;
        info!(
            job_id = %self.job_label(),
            state = %self.state,
            transitions = self.transitions.len(),
            "dispatch actor finished"
        );
    }

    fn job_label(&self) -> String {
        self.job_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unassigned>".to_string())
    }

    // ==================== Submission ====================

    async fn submit(&mut self) -> Result<()> {
        for name in &self.definition.requirements {
            self.ctx.resolver.resolve(name).await.map_err(|e| {
                JobMeshError::Submission(format!("package '{}' unavailable: {}", name, e))
            })?;
        }

        let mut staged_files = Vec::with_capacity(self.definition.files.len());
        for path in &self.definition.files {
            let location = self.ctx.stager.stage(path).await.map_err(|e| {
                JobMeshError::Submission(format!("staging {} failed: {}", path.display(), e))
            })?;
            staged_files.push(StagedFile {
                path: path.clone(),
                location,
            });
        }

        if !self.pricing.is_explicit() {
            self.pricing
                .quote_market(self.ctx.oracle.as_ref())
                .await
                .map_err(|e| JobMeshError::Submission(format!("market quote failed: {}", e)))?;
        }

        let manifest = JobManifest {
            owner: self.ctx.identity.identity(),
            payment_account: self.ctx.payment.account_id().to_string(),
            public: self.definition.public.clone(),
            work: self.definition.work.clone(),
            slice_count: self.slices.len(),
            slice_payment_offer: self.pricing.current_offer(),
            compute_groups: self.definition.compute_groups.clone(),
            requirements: self.definition.requirements.clone(),
            staged_files,
        };

        let id = self.ctx.backend.submit(&manifest).await.map_err(|e| match e {
            JobMeshError::Submission(_) => e,
            other => JobMeshError::Submission(other.to_string()),
        })?;

        if self.shared.id.set(id.clone()).is_err() {
            return Err(JobMeshError::Internal("job id assigned twice".into()));
        }
        self.publisher.set_job(id.clone());
        self.job_id = Some(id.clone());
        self.pricing.lock();
        self.refresh_balance().await;

        info!(
            job_id = %id,
            name = %self.definition.public.name,
            slices = self.slices.len(),
            offer = %self.pricing.current_offer(),
            "job accepted"
        );
        self.transition(JobState::Accepted, "backend assigned id");
        self.publisher.publish(EventPayload::Accepted { job: id });
        Ok(())
    }

    // ==================== Lifecycle ====================

    /// Apply a lifecycle transition. Illegal transitions are ignored.
    fn transition(&mut self, to: JobState, reason: &str) -> bool {
        let from = self.state;
        if !from.can_transition_to(to) {
            debug!(%from, %to, reason, "ignoring illegal job transition");
            return false;
        }

        self.state = to;
        self.transitions.push(StateTransition::new(from, to, reason));
        self.shared.state.send_replace(to);
        info!(job_id = %self.job_label(), %from, %to, reason, "job state changed");

        self.publisher
            .publish(EventPayload::ReadyStateChange { state: to });
        true
    }

    fn check_completion(&mut self) {
        if self.state.is_terminal() || self.state == JobState::New {
            return;
        }

        if self.cancel_requested {
            if self.slices.in_flight() == 0 {
                self.transition(JobState::Cancelled, "cancel requested, in-flight slices drained");
            }
            return;
        }

        let resolved = match self.ctx.dispatch.failure_policy {
            FailurePolicy::RequireAll => {
                self.slices.count_status(SliceStatus::Done) == self.slices.len()
            }
            FailurePolicy::AllowPartial => self.slices.remaining() == 0,
        };
        if resolved {
            self.transition(JobState::Done, "all slices resolved");
        }
    }

    // ==================== Dispatch ====================

    async fn pump(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.dispatch_ready().await;
        self.check_completion();
    }

    async fn dispatch_ready(&mut self) {
        if self.cancel_requested || !self.state.can_dispatch() || self.slices.remaining() == 0 {
            return;
        }

        let offer = self.pricing.current_offer();
        let remaining = self.slices.remaining();
        let check = self.funding.evaluate(remaining, offer);
        if let FundingCheck::Shortfall {
            required,
            newly_paused: true,
            ..
        } = check
        {
            self.publisher.publish(EventPayload::NoFunds {
                name: self.definition.public.name.clone(),
                bank_account: self.funding.bank_account().to_string(),
                funds_required: required,
                remaining_slices: remaining,
                slice_payment_amount: offer,
            });
        }
        if !check.allows_dispatch() {
            return;
        }

        let slots = self.ctx.executors.available_slots();
        for _ in 0..slots {
            let Some(index) = self.queue.dequeue() else {
                break;
            };
            if !self.dispatch_slice(index).await {
                break;
            }
        }
    }

    /// Hand one slice to the pool. On failure the slice goes back to the head of the queue.
    async fn dispatch_slice(&mut self, index: usize) -> bool {
        let Some(job) = self.job_id.clone() else {
            self.queue.restore(index);
            return false;
        };
        let Some(slice) = self.slices.get(index) else {
            return true;
        };
        if !slice.status.is_queueable() {
            return true;
        }

        let attempt = slice.attempts + 1;
        let assignment = SliceAssignment {
            job,
            slice: index,
            attempt,
            work: self.definition.work.clone(),
            arguments: slice.arguments(),
            avoid: slice.previous_executors.clone(),
        };
        let reporter = SliceReporter::new(self.signal_tx.clone(), index, attempt);

        match self.ctx.executors.dispatch(assignment, reporter).await {
            Ok(executor) => {
                debug!(job_id = %self.job_label(), slice = index, attempt, %executor, "slice dispatched");
                if let Some(slice) = self.slices.get_mut(index) {
                    slice.mark_dispatched(executor, Instant::now());
                }
                if self.state == JobState::Accepted {
                    self.transition(JobState::Running, "first slice dispatched");
                }
                true
            }
            Err(e) => {
                warn!(slice = index, attempt, error = %e, "executor hand-off failed");
                self.queue.restore(index);
                false
            }
        }
    }

    // ==================== Signals ====================

    async fn handle_signal(&mut self, signal: ExecutorSignal) {
        let index = signal.slice;
        let Some(slice) = self.slices.get_mut(index) else {
            warn!(slice = index, "signal for unknown slice");
            return;
        };

        if let SignalKind::Console(message) = signal.kind {
            self.publisher.publish(EventPayload::Console {
                slice_number: index,
                message,
            });
            return;
        }

        if signal.attempt != slice.attempts || !slice.status.is_in_flight() {
            debug!(
                slice = index,
                attempt = signal.attempt,
                current = slice.attempts,
                status = %slice.status,
                "discarding stale executor signal"
            );
            return;
        }

        match signal.kind {
            SignalKind::Progress(progress) => {
                slice.record_progress(progress, Instant::now());
                self.publisher.publish(EventPayload::Progress {
                    slice_number: index,
                    progress,
                });
            }
            SignalKind::Result(value) => self.complete_slice(index, value).await,
            SignalKind::Error(message) => {
                warn!(slice = index, attempt = signal.attempt, %message, "slice reported an error");
                self.retry_or_fail(index, message).await;
            }
            SignalKind::Console(_) => {}
        }
    }

    async fn complete_slice(&mut self, index: usize, value: Value) {
        if let Some(slice) = self.slices.get_mut(index) {
            slice.complete(value.clone());
        }
        self.shared.results.write().await.store(index, value.clone());

        let offer = self.pricing.current_offer();
        if !self.pricing.is_free() {
            match self.ctx.payment.charge(offer).await {
                Ok(()) => self.funding.record_payment(offer),
                Err(e) => {
                    warn!(slice = index, %offer, error = %e, "slice payment failed");
                    self.refresh_balance().await;
                }
            }
        }

        debug!(job_id = %self.job_label(), slice = index, "slice done");
        self.publisher.publish(EventPayload::Result {
            slice_number: index,
            result: value,
        });
    }

    /// Abandon the current attempt; re-queue if the retry budget allows,
    /// otherwise fail the slice permanently. A cancelling job only drains.
    async fn retry_or_fail(&mut self, index: usize, reason: String) {
        let max_retries = self.ctx.dispatch.max_retries;
        let Some(slice) = self.slices.get_mut(index) else {
            return;
        };
        let attempt = slice.attempts;
        let executor = slice.executor.clone();
        slice.abandon();

        if let Some(executor) = executor {
            self.ctx.executors.release(&executor, index, attempt).await;
        }

        if self.cancel_requested {
            debug!(slice = index, attempt, %reason, "abandoned slice not re-queued, job cancelling");
        } else if attempt > max_retries {
            self.fail_slice(index, reason).await;
        } else {
            info!(slice = index, attempt, max_retries, "re-dispatching abandoned slice");
            self.queue.requeue(index);
        }
    }

    async fn fail_slice(&mut self, index: usize, reason: String) {
        let message = format!(
            "Slice {} failed after {} attempts: {}",
            index,
            self.slices.get(index).map_or(0, |s| s.attempts),
            reason
        );
        if let Some(slice) = self.slices.get_mut(index) {
            slice.fail(message.clone());
        }
        error!(job_id = %self.job_label(), slice = index, %message, "slice failed permanently");

        {
            let mut results = self.shared.results.write().await;
            results.mark_failed(index);
            if self.ctx.dispatch.failure_policy == FailurePolicy::RequireAll {
                results.set_failure_reason(message.clone());
            }
        }

        self.publisher.publish(EventPayload::Error {
            job_name: self.definition.public.name.clone(),
            slice_number: Some(index),
            message,
        });

        if self.ctx.dispatch.failure_policy == FailurePolicy::RequireAll {
            self.queue.clear();
            self.transition(JobState::Errored, "slice exhausted its retry budget");
        }
    }

    // ==================== Stalls ====================

    async fn scan_stalls(&mut self) {
        let deadline = self.ctx.dispatch.stall_deadline();
        if deadline.is_zero() {
            return;
        }
        let now = Instant::now();
        let stalled: Vec<usize> = self
            .slices
            .iter()
            .filter(|s| s.silent_for(now).is_some_and(|d| d >= deadline))
            .map(|s| s.index)
            .collect();

        let abandon_after = self.ctx.dispatch.stall_warnings_before_abandon.max(1);
        for index in stalled {
            if self.state.is_terminal() {
                return;
            }
            let Some(slice) = self.slices.get_mut(index) else {
                continue;
            };
            let warnings = slice.record_stall(now);
            let last_progress = slice.last_progress;
            let message = format!(
                "Slice {} has not reported progress in {}s (warning {}/{})",
                index,
                deadline.as_secs(),
                warnings,
                abandon_after
            );
            warn!(job_id = %self.job_label(), slice = index, warnings, "slice stalled");

            self.publisher.publish(EventPayload::NoProgress {
                job_name: self.definition.public.name.clone(),
                slice_number: index,
                last_progress,
                message,
            });

            if warnings >= abandon_after {
                self.retry_or_fail(index, format!("no progress after {} warnings", warnings))
                    .await;
            }
        }
    }

    async fn release_in_flight(&mut self) {
        let in_flight: Vec<_> = self
            .slices
            .iter()
            .filter(|s| s.status.is_in_flight())
            .filter_map(|s| s.executor.clone().map(|e| (e, s.index, s.attempts)))
            .collect();
        for (executor, index, attempt) in in_flight {
            self.ctx.executors.release(&executor, index, attempt).await;
        }
    }

    // ==================== Funding ====================

    async fn refresh_balance(&mut self) {
        match self.ctx.payment.balance().await {
            Ok(balance) => self.funding.set_balance(balance),
            Err(e) => warn!(
                account = %self.funding.bank_account(),
                error = %e,
                "failed to read balance"
            ),
        }
    }

    // ==================== Commands ====================

    async fn handle_command(&mut self, command: JobCommand) {
        match command {
            JobCommand::Cancel => self.request_cancel(),
            JobCommand::Reprice { offer, reply } => {
                let result = self.pricing.reprice(offer);
                let _ = reply.send(result);
            }
            JobCommand::RefreshFunding => self.refresh_balance().await,
            JobCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn request_cancel(&mut self) {
        if !self.state.can_dispatch() || self.cancel_requested {
            debug!(state = %self.state, "cancel ignored");
            return;
        }
        self.cancel_requested = true;
        let dropped = self.queue.clear();
        info!(
            job_id = %self.job_label(),
            dropped,
            in_flight = self.slices.in_flight(),
            "cancel requested, no further dispatch"
        );
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            state: self.state,
            pricing: self.pricing.state().clone(),
            funding: self.funding.state().clone(),
            funding_paused: self.funding.is_paused(),
            cancel_requested: self.cancel_requested,
            slices: self
                .slices
                .iter()
                .map(|s| SliceSnapshot {
                    index: s.index,
                    status: s.status,
                    attempts: s.attempts,
                    last_progress: s.last_progress,
                })
                .collect(),
            queue: self.queue.stats(),
        }
    }
}

