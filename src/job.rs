//! Public job surface: build a job, attach listeners, exec, then wait.

use rust_decimal::Decimal;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{debug, info};

use crate::context::ComputeContext;
use crate::dispatch::{
    DispatchEngine, JobCommand, JobDefinition, JobSnapshot, ResultAggregator, SharedJobState,
    WaitOutcome,
};
use crate::domain::{
    input_array, ComputeGroup, EventKind, JobEvent, JobId, JobState, PublicInfo, SliceSet,
    WorkDescriptor,
};
use crate::error::{JobMeshError, Result};
use crate::events::{DeliveryStatus, EventBus, ListenerRegistry};
use crate::pricing::PricingPolicy;

const COMMAND_BUFFER: usize = 32;

/// Files and directories to stage for executors before submission
#[derive(Debug, Clone, Default)]
pub struct JobFiles {
    paths: Vec<PathBuf>,
}

impl JobFiles {
    pub fn add(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// A job under construction. Metadata, admission groups and listeners are
/// fixed once `exec` consumes it.
pub struct Job {
    ctx: Arc<ComputeContext>,
    slices: SliceSet,
    work: WorkDescriptor,
    listeners: ListenerRegistry,
    pub public: PublicInfo,
    /// Empty means the global network
    pub compute_groups: Vec<ComputeGroup>,
    pub requirements: Vec<String>,
    pub fs: JobFiles,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("work", &self.work)
            .field("slices", &self.slices.len())
            .field("public", &self.public)
            .field("compute_groups", &self.compute_groups)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// One slice per input element; each slice calls `work(input, ...static_args)`.
    pub fn compute_for<I>(
        ctx: Arc<ComputeContext>,
        inputs: I,
        work: WorkDescriptor,
        static_args: Vec<Value>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Value>,
    {
        if work.function.trim().is_empty() {
            return Err(JobMeshError::InvalidInput(
                "work descriptor has no function".into(),
            ));
        }
        Ok(Self {
            ctx,
            slices: SliceSet::new(inputs, static_args),
            listeners: ListenerRegistry::new(),
            public: PublicInfo::new(work.function.clone()),
            work,
            compute_groups: Vec::new(),
            requirements: Vec::new(),
            fs: JobFiles::default(),
        })
    }

    /// Same as `compute_for`, for an input set that arrives as JSON
    pub fn compute_for_value(
        ctx: Arc<ComputeContext>,
        inputs: Value,
        work: WorkDescriptor,
        static_args: Vec<Value>,
    ) -> Result<Self> {
        Self::compute_for(ctx, input_array(inputs)?, work, static_args)
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// Register a listener by event name. Unknown names are ignored and return false.
    pub fn on<F>(&mut self, kind: &str, handler: F) -> bool
    where
        F: Fn(&JobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.on(kind, handler)
    }

    pub fn on_kind<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&JobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.on_kind(kind, handler);
    }

    /// Start dispatch. `offer` is the per-slice payment; `None` follows the
    /// market price quoted at submission.
    ///
    /// Returns as soon as the dispatch actor is running. Must be called
    /// inside a Tokio runtime.
    pub fn exec(self, offer: Option<Decimal>) -> Result<JobHandle> {
        let pricing = match offer {
            Some(offer) => PricingPolicy::explicit(offer)?,
            None => PricingPolicy::market(),
        };
        tokio::runtime::Handle::try_current().map_err(|_| {
            JobMeshError::InvalidInput("exec must be called inside a Tokio runtime".into())
        })?;

        let slice_count = self.slices.len();
        let (publisher, delivery, _delivery_task) = EventBus::start(self.listeners);
        let (state_tx, state_rx) = watch::channel(JobState::New);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let id = Arc::new(OnceLock::new());
        let results = Arc::new(RwLock::new(ResultAggregator::new(slice_count)));
        let shared = SharedJobState {
            id: Arc::clone(&id),
            state: state_tx,
            results: Arc::clone(&results),
        };

        let name = self.public.name.clone();
        let definition = JobDefinition {
            work: self.work,
            public: self.public,
            compute_groups: self.compute_groups,
            requirements: self.requirements,
            files: self.fs.paths,
        };

        let engine = DispatchEngine::new(
            self.ctx,
            definition,
            self.slices,
            pricing,
            publisher,
            shared,
            command_rx,
        );
        tokio::spawn(engine.run());
        info!(job = %name, slices = slice_count, ?offer, "job exec started");

        Ok(JobHandle {
            name,
            slice_count,
            id,
            state: state_rx,
            results,
            delivery,
            commands: command_tx,
        })
    }
}

/// Caller-side handle to a running job
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    slice_count: usize,
    id: Arc<OnceLock<JobId>>,
    state: watch::Receiver<JobState>,
    results: Arc<RwLock<ResultAggregator>>,
    delivery: watch::Receiver<DeliveryStatus>,
    commands: mpsc::Sender<JobCommand>,
}

impl JobHandle {
    /// Backend-assigned id; None until ACCEPTED
    pub fn id(&self) -> Option<JobId> {
        self.id.get().cloned()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slice_count(&self) -> usize {
        self.slice_count
    }

    /// Latest committed state. Listeners may not have seen it yet.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Listener callbacks that failed or panicked so far
    pub fn handler_failures(&self) -> u64 {
        self.delivery.borrow().handler_failures
    }

    /// Stop new dispatch. The job becomes CANCELLED once in-flight slices
    /// finish or stall out. A no-op on terminal jobs.
    pub async fn cancel(&self) {
        if self.commands.send(JobCommand::Cancel).await.is_err() {
            debug!(job = %self.name, "cancel after job finished");
        }
    }

    /// Change the per-slice offer for slices not yet paid. Returns the previous offer.
    pub async fn reprice(&self, offer: Decimal) -> Result<Decimal> {
        let (reply, rx) = oneshot::channel();
        self.request(JobCommand::Reprice { offer, reply }).await?;
        rx.await.map_err(|_| self.finished())?
    }

    /// Ask the job to re-read the payer's balance now (e.g. after a deposit)
    pub async fn refresh_funding(&self) {
        if self.commands.send(JobCommand::RefreshFunding).await.is_err() {
            debug!(job = %self.name, "funding refresh after job finished");
        }
    }

    pub async fn snapshot(&self) -> Result<JobSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.request(JobCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| self.finished())
    }

    async fn request(&self, command: JobCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.finished())
    }

    fn finished(&self) -> JobMeshError {
        JobMeshError::NotRunning(self.name.clone())
    }

    /// Block until the job is terminal and every listener has seen the
    /// terminal readystatechange.
    ///
    /// With a deadline, expiry returns `WaitOutcome::TimedOut` with whatever
    /// results exist; in-flight slices keep running.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<WaitOutcome> {
        let mut delivery = self.delivery.clone();
        let settled = async {
            delivery
                .wait_for(|status| status.terminal.is_some() || status.closed)
                .await
                .map(|status| (*status).clone())
        };

        let status = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, settled).await {
                Ok(status) => status,
                Err(_) => {
                    debug!(job = %self.name, ?deadline, "wait deadline expired");
                    return Ok(WaitOutcome::TimedOut(self.results.read().await.partial()));
                }
            },
            None => settled.await,
        }
        .map_err(|_| JobMeshError::Internal("event delivery stopped unexpectedly".into()))?;

        let results = self.results.read().await;
        match status.terminal {
            Some(JobState::Done) => Ok(WaitOutcome::Complete(results.ordered())),
            Some(JobState::Cancelled) => Err(JobMeshError::Cancelled {
                unresolved: results.unresolved(),
            }),
            Some(JobState::Errored) => Err(JobMeshError::Errored {
                reason: results
                    .failure_reason()
                    .unwrap_or("job errored")
                    .to_string(),
                unresolved: results.unresolved(),
            }),
            _ => Err(JobMeshError::Internal(format!(
                "job '{}' stopped without reaching a terminal state",
                self.name
            ))),
        }
    }

    /// Wait without a deadline and return the ordered results
    pub async fn results(&self) -> Result<Vec<Value>> {
        match self.wait(None).await? {
            WaitOutcome::Complete(values) => Ok(values),
            WaitOutcome::TimedOut(_) => Err(JobMeshError::Internal(
                "wait without a deadline timed out".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryAccount, StaticIdentity};
    use crate::dispatch::LocalExecutorPool;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn ctx() -> Arc<ComputeContext> {
        ComputeContext::builder()
            .identity(Arc::new(StaticIdentity("tester".into())))
            .payment(Arc::new(InMemoryAccount::new("bank", dec!(100))))
            .executors(Arc::new(LocalExecutorPool::new(2, |args, _| {
                Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
            })))
            .build()
            .unwrap()
    }

    #[test]
    fn test_empty_work_function_rejected() {
        let err = Job::compute_for(ctx(), vec![json!(1)], WorkDescriptor::new("  "), vec![])
            .unwrap_err();
        assert!(matches!(err, JobMeshError::InvalidInput(_)));
    }

    #[test]
    fn test_non_array_value_rejected() {
        let err = Job::compute_for_value(ctx(), json!(5), WorkDescriptor::new("double"), vec![])
            .unwrap_err();
        assert!(matches!(err, JobMeshError::InvalidInput(_)));

        let job = Job::compute_for_value(ctx(), json!([1, 2]), WorkDescriptor::new("double"), vec![])
            .unwrap();
        assert_eq!(job.slice_count(), 2);
    }

    #[test]
    fn test_exec_outside_runtime_fails() {
        let job = Job::compute_for(ctx(), vec![json!(1)], WorkDescriptor::new("double"), vec![])
            .unwrap();
        assert!(job.exec(None).is_err());
    }

    #[test]
    fn test_negative_offer_rejected_before_dispatch() {
        let job = Job::compute_for(ctx(), vec![json!(1)], WorkDescriptor::new("double"), vec![])
            .unwrap();
        let err = job.exec(Some(dec!(-1))).unwrap_err();
        assert!(matches!(err, JobMeshError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_local_job_doubles_inputs() {
        let mut job = Job::compute_for(
            ctx(),
            vec![json!(1), json!(2), json!(3)],
            WorkDescriptor::new("double"),
            vec![],
        )
        .unwrap();
        job.public = PublicInfo::new("doubler").with_description("unit test");
        job.fs.add("Cargo.toml");
        assert!(!job.on("noSuchEvent", |_| Ok(())));

        let handle = job.exec(Some(dec!(1))).unwrap();
        assert_eq!(handle.results().await.unwrap(), vec![json!(2), json!(4), json!(6)]);
        assert_eq!(handle.state(), JobState::Done);
        assert!(handle.id().is_some());
    }
}
