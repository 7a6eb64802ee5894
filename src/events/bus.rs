//! Event Bus - ordered per-job delivery of committed events to listeners
//!
//! The dispatch actor publishes events after committing state. Publishing only
//! stamps a sequence number and enqueues; handlers run on a separate delivery
//! task so a slow listener never holds job state.

use chrono::Utc;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::{EventKind, EventPayload, JobEvent, JobId, JobState};

/// A listener callback. Returning an error (or panicking) is logged and
/// isolated from other listeners.
pub type EventHandler = Arc<dyn Fn(&JobEvent) -> anyhow::Result<()> + Send + Sync>;

/// Event-kind → ordered handler list
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register by kind name. Unknown names are accepted and ignored so
    /// listeners written for newer event sets keep working; returns whether
    /// the handler was actually attached.
    pub fn on<F>(&mut self, kind: &str, handler: F) -> bool
    where
        F: Fn(&JobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match kind.parse::<EventKind>() {
            Ok(kind) => {
                self.on_kind(kind, handler);
                true
            }
            Err(_) => {
                debug!(kind, "ignoring listener for unknown event kind");
                false
            }
        }
    }

    pub fn on_kind<F>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(&JobEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for the event's kind in registration order.
    /// Returns the number of handlers that failed.
    pub fn deliver(&self, event: &JobEvent) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            return 0;
        };

        let mut failed = 0;
        for (position, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failed += 1;
                    error!(
                        kind = %event.kind(),
                        sequence = event.sequence,
                        handler = position,
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    failed += 1;
                    error!(
                        kind = %event.kind(),
                        sequence = event.sequence,
                        handler = position,
                        "event handler panicked"
                    );
                }
            }
        }
        failed
    }
}

/// Progress of the delivery task, observed by `wait()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStatus {
    /// Sequence number of the last event handed to every listener
    pub delivered: u64,
    /// Set once the terminal readystatechange has been delivered
    pub terminal: Option<JobState>,
    /// The publisher went away without a terminal state
    pub closed: bool,
    pub handler_failures: u64,
}

/// Stamps sequence numbers and hands events to the delivery task
#[derive(Debug)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<JobEvent>,
    next_sequence: u64,
    job: Option<JobId>,
}

impl EventPublisher {
    /// Job id attached to every event published from now on
    pub fn set_job(&mut self, job: JobId) {
        self.job = Some(job);
    }

    /// Last sequence number handed out (0 before the first event)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn publish(&mut self, payload: EventPayload) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let event = JobEvent {
            sequence,
            job: self.job.clone(),
            timestamp: Utc::now(),
            payload,
        };
        if self.tx.send(event).is_err() {
            warn!(sequence, "event delivery task gone, dropping event");
        }
        sequence
    }
}

/// Per-job event bus
pub struct EventBus;

impl EventBus {
    /// Start the delivery task for one job
    pub fn start(
        listeners: ListenerRegistry,
    ) -> (EventPublisher, watch::Receiver<DeliveryStatus>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(DeliveryStatus::default());
        let handle = tokio::spawn(run_delivery(listeners, rx, status_tx));

        let publisher = EventPublisher {
            tx,
            next_sequence: 1,
            job: None,
        };
        (publisher, status_rx, handle)
    }
}

async fn run_delivery(
    listeners: ListenerRegistry,
    mut rx: mpsc::UnboundedReceiver<JobEvent>,
    status_tx: watch::Sender<DeliveryStatus>,
) {
    while let Some(event) = rx.recv().await {
        let failures = listeners.deliver(&event);

        let terminal = match &event.payload {
            EventPayload::ReadyStateChange { state } if state.is_terminal() => Some(*state),
            _ => None,
        };
        status_tx.send_modify(|status| {
            status.delivered = event.sequence;
            status.handler_failures += failures as u64;
            if terminal.is_some() {
                status.terminal = terminal;
            }
        });
    }

    status_tx.send_modify(|status| status.closed = true);
    debug!("event delivery finished");
}
