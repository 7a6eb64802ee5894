//! Executor seam - where slices leave the engine and signals come back

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::{ExecutorId, JobId, Progress, WorkDescriptor};
use crate::error::{JobMeshError, Result};

/// What an executor reports about a slice
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Progress(Progress),
    Console(Vec<String>),
    Result(Value),
    Error(String),
}

/// A signal tagged with the dispatch attempt it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSignal {
    pub slice: usize,
    pub attempt: u32,
    pub kind: SignalKind,
}

/// One slice handed to an executor
#[derive(Debug, Clone)]
pub struct SliceAssignment {
    pub job: JobId,
    pub slice: usize,
    /// 1 for the first dispatch, incremented on every re-dispatch
    pub attempt: u32,
    pub work: WorkDescriptor,
    /// Input element followed by the static arguments
    pub arguments: Vec<Value>,
    /// Executors this slice was abandoned on; pick another when possible
    pub avoid: Vec<ExecutorId>,
}

/// Channel back into the job's actor, bound to one slice attempt
#[derive(Debug, Clone)]
pub struct SliceReporter {
    tx: mpsc::Sender<ExecutorSignal>,
    slice: usize,
    attempt: u32,
}

impl SliceReporter {
    pub fn new(tx: mpsc::Sender<ExecutorSignal>, slice: usize, attempt: u32) -> Self {
        Self { tx, slice, attempt }
    }

    pub fn slice(&self) -> usize {
        self.slice
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn signal(&self, kind: SignalKind) -> ExecutorSignal {
        ExecutorSignal {
            slice: self.slice,
            attempt: self.attempt,
            kind,
        }
    }

    /// Returns false once the job no longer listens
    pub async fn send(&self, kind: SignalKind) -> bool {
        self.tx.send(self.signal(kind)).await.is_ok()
    }

    /// For synchronous work running on a blocking thread
    pub fn blocking_send(&self, kind: SignalKind) -> bool {
        self.tx.blocking_send(self.signal(kind)).is_ok()
    }

    pub async fn progress(&self, progress: Progress) -> bool {
        self.send(SignalKind::Progress(progress)).await
    }

    pub async fn console(&self, lines: Vec<String>) -> bool {
        self.send(SignalKind::Console(lines)).await
    }

    pub async fn result(&self, value: Value) -> bool {
        self.send(SignalKind::Result(value)).await
    }

    pub async fn error(&self, message: impl Into<String>) -> bool {
        self.send(SignalKind::Error(message.into())).await
    }
}

/// A set of remote executor slots
#[async_trait]
pub trait ExecutorPool: Send + Sync {
    /// Slots free right now
    fn available_slots(&self) -> usize;

    /// Hand a slice to an executor and return which one took it. Signals flow
    /// back through `reporter`.
    async fn dispatch(&self, assignment: SliceAssignment, reporter: SliceReporter)
        -> Result<ExecutorId>;

    /// The engine stopped waiting on this attempt
    async fn release(&self, _executor: &ExecutorId, _slice: usize, _attempt: u32) {}
}

/// Handle given to local work functions for progress and console output
pub struct WorkContext {
    reporter: SliceReporter,
}

impl WorkContext {
    pub fn slice(&self) -> usize {
        self.reporter.slice()
    }

    /// Indeterminate progress
    pub fn progress(&self) {
        self.reporter
            .blocking_send(SignalKind::Progress(Progress::Indeterminate));
    }

    pub fn progress_at(&self, fraction: f64) {
        self.reporter
            .blocking_send(SignalKind::Progress(Progress::fraction(fraction)));
    }

    pub fn console(&self, message: impl Into<String>) {
        self.reporter
            .blocking_send(SignalKind::Console(vec![message.into()]));
    }
}

pub type LocalWork = Arc<dyn Fn(&[Value], &WorkContext) -> anyhow::Result<Value> + Send + Sync>;

/// Fixed number of in-process workers running one work function on blocking threads
pub struct LocalExecutorPool {
    work: LocalWork,
    busy: Arc<Mutex<Vec<bool>>>,
}

impl LocalExecutorPool {
    pub fn new<F>(workers: usize, work: F) -> Self
    where
        F: Fn(&[Value], &WorkContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            work: Arc::new(work),
            busy: Arc::new(Mutex::new(vec![false; workers.max(1)])),
        }
    }

    fn worker_id(slot: usize) -> ExecutorId {
        ExecutorId::new(format!("local-{}", slot))
    }

    /// Claim a free slot, preferring one not in `avoid`
    fn claim(&self, avoid: &[ExecutorId]) -> Option<usize> {
        let avoid: HashSet<&ExecutorId> = avoid.iter().collect();
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());

        let free: Vec<usize> = busy
            .iter()
            .enumerate()
            .filter(|(_, b)| !**b)
            .map(|(slot, _)| slot)
            .collect();
        let slot = free
            .iter()
            .copied()
            .find(|slot| !avoid.contains(&Self::worker_id(*slot)))
            .or_else(|| free.first().copied())?;

        busy[slot] = true;
        Some(slot)
    }
}

#[async_trait]
impl ExecutorPool for LocalExecutorPool {
    fn available_slots(&self) -> usize {
        let busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.iter().filter(|b| !**b).count()
    }

    async fn dispatch(
        &self,
        assignment: SliceAssignment,
        reporter: SliceReporter,
    ) -> Result<ExecutorId> {
        let slot = self
            .claim(&assignment.avoid)
            .ok_or_else(|| JobMeshError::collaborator("executor pool", "no free executor"))?;
        let executor = Self::worker_id(slot);
        debug!(
            executor = %executor,
            slice = assignment.slice,
            attempt = assignment.attempt,
            "running slice locally"
        );

        let work = Arc::clone(&self.work);
        let busy = Arc::clone(&self.busy);
        tokio::spawn(async move {
            let ctx = WorkContext {
                reporter: reporter.clone(),
            };
            let args = assignment.arguments;
            let outcome = tokio::task::spawn_blocking(move || work(args.as_slice(), &ctx)).await;

            busy.lock().unwrap_or_else(|e| e.into_inner())[slot] = false;

            let delivered = match outcome {
                Ok(Ok(value)) => reporter.result(value).await,
                Ok(Err(e)) => reporter.error(format!("{:#}", e)).await,
                Err(join_err) => reporter.error(format!("worker crashed: {}", join_err)).await,
            };
            if !delivered {
                warn!(slice = reporter.slice(), "job gone before slice finished");
            }
        });

        Ok(executor)
    }
}
