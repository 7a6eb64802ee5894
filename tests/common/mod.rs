#![allow(dead_code)]

use async_trait::async_trait;
use jobmesh::config::DispatchConfig;
use jobmesh::dispatch::{ExecutorPool, SliceAssignment, SliceReporter};
use jobmesh::domain::{ExecutorId, JobEvent};
use jobmesh::{ComputeContext, EventKind, InMemoryAccount, Job, Progress, StaticIdentity};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Executor pool driven by the test: every dispatch is handed to the test,
/// which decides what the executor reports and when.
pub struct ScriptedPool {
    capacity: usize,
    busy: Arc<AtomicUsize>,
    live: Mutex<HashMap<(usize, u32), Arc<AtomicBool>>>,
    next_executor: AtomicUsize,
    tx: mpsc::UnboundedSender<Dispatched>,
}

impl ScriptedPool {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Dispatched>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Self {
            capacity,
            busy: Arc::new(AtomicUsize::new(0)),
            live: Mutex::new(HashMap::new()),
            next_executor: AtomicUsize::new(0),
            tx,
        });
        (pool, rx)
    }
}

fn free(active: &AtomicBool, busy: &AtomicUsize) {
    if active.swap(false, Ordering::SeqCst) {
        busy.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutorPool for ScriptedPool {
    fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.busy.load(Ordering::SeqCst))
    }

    async fn dispatch(
        &self,
        assignment: SliceAssignment,
        reporter: SliceReporter,
    ) -> jobmesh::Result<ExecutorId> {
        let n = self.next_executor.fetch_add(1, Ordering::SeqCst);
        let executor = ExecutorId::new(format!("exec-{n}"));
        let active = Arc::new(AtomicBool::new(true));
        self.busy.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap()
            .insert((assignment.slice, assignment.attempt), Arc::clone(&active));

        let _ = self.tx.send(Dispatched {
            assignment,
            executor: executor.clone(),
            reporter,
            active,
            busy: Arc::clone(&self.busy),
        });
        Ok(executor)
    }

    async fn release(&self, _executor: &ExecutorId, slice: usize, attempt: u32) {
        if let Some(active) = self.live.lock().unwrap().remove(&(slice, attempt)) {
            free(&active, &self.busy);
        }
    }
}

/// One slice attempt as seen by the scripted executor
pub struct Dispatched {
    pub assignment: SliceAssignment,
    pub executor: ExecutorId,
    reporter: SliceReporter,
    active: Arc<AtomicBool>,
    busy: Arc<AtomicUsize>,
}

impl Dispatched {
    pub fn slice(&self) -> usize {
        self.assignment.slice
    }

    pub fn attempt(&self) -> u32 {
        self.assignment.attempt
    }

    pub fn input(&self) -> &Value {
        &self.assignment.arguments[0]
    }

    pub async fn progress(&self, progress: Progress) {
        self.reporter.progress(progress).await;
    }

    pub async fn console(&self, line: &str) {
        self.reporter.console(vec![line.to_string()]).await;
    }

    pub async fn finish(self, value: Value) {
        free(&self.active, &self.busy);
        self.reporter.result(value).await;
    }

    pub async fn fail(self, message: &str) {
        free(&self.active, &self.busy);
        self.reporter.error(message).await;
    }
}

pub fn context(
    pool: Arc<dyn ExecutorPool>,
    account: InMemoryAccount,
    dispatch: DispatchConfig,
) -> Arc<ComputeContext> {
    ComputeContext::builder()
        .identity(Arc::new(StaticIdentity("test-identity".into())))
        .payment(Arc::new(account))
        .executors(pool)
        .dispatch_config(dispatch)
        .build()
        .expect("context builds")
}

/// Record every event the job publishes, in delivery order
pub fn record_all(job: &mut Job) -> Arc<Mutex<Vec<JobEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in EventKind::ALL {
        let events = Arc::clone(&events);
        job.on_kind(kind, move |event| {
            events.lock().unwrap().push(event.clone());
            Ok(())
        });
    }
    events
}

pub fn of_kind(events: &Arc<Mutex<Vec<JobEvent>>>, kind: EventKind) -> Vec<JobEvent> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind() == kind)
        .cloned()
        .collect()
}

/// readystatechange payloads in order, as listeners see them
pub fn states(events: &Arc<Mutex<Vec<JobEvent>>>) -> Vec<String> {
    of_kind(events, EventKind::ReadyStateChange)
        .iter()
        .map(|e| e.to_json().as_str().unwrap_or_default().to_string())
        .collect()
}

/// Poll until at least `count` events of `kind` were delivered
pub async fn delivered(events: &Arc<Mutex<Vec<JobEvent>>>, kind: EventKind, count: usize) {
    for _ in 0..200 {
        if of_kind(events, kind).len() >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {count} {kind} events");
}
