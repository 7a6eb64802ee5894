use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::ids::ExecutorId;
use crate::error::{JobMeshError, Result};

/// Per-slice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SliceStatus {
    Pending,
    Dispatched,
    Progressing,
    Done,
    Failed,
    Abandoned,
}

impl SliceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SliceStatus::Pending => "PENDING",
            SliceStatus::Dispatched => "DISPATCHED",
            SliceStatus::Progressing => "PROGRESSING",
            SliceStatus::Done => "DONE",
            SliceStatus::Failed => "FAILED",
            SliceStatus::Abandoned => "ABANDONED",
        }
    }

    /// Handed to an executor and not yet resolved or abandoned
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SliceStatus::Dispatched | SliceStatus::Progressing)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, SliceStatus::Done | SliceStatus::Failed)
    }

    /// Eligible for the work queue
    pub fn is_queueable(&self) -> bool {
        matches!(self, SliceStatus::Pending | SliceStatus::Abandoned)
    }
}

impl fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A progress report from an executor.
///
/// `progress()` with no argument and `progress(0.5)` are the same signal,
/// tagged differently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Indeterminate,
    Fraction(f64),
}

impl Progress {
    /// Fractional report, clamped into 0.0..=1.0. NaN is treated as indeterminate.
    pub fn fraction(value: f64) -> Self {
        if value.is_nan() {
            Progress::Indeterminate
        } else {
            Progress::Fraction(value.clamp(0.0, 1.0))
        }
    }

    pub fn as_fraction(&self) -> Option<f64> {
        match self {
            Progress::Indeterminate => None,
            Progress::Fraction(f) => Some(*f),
        }
    }
}

impl Serialize for Progress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Progress::Indeterminate => serializer.serialize_str("indeterminate"),
            Progress::Fraction(f) => serializer.serialize_f64(*f),
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Indeterminate => write!(f, "indeterminate"),
            Progress::Fraction(v) => write!(f, "{:.0}%", v * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SliceOutcome {
    Result(Value),
    Error(String),
}

/// One schedulable unit of work: an input element plus the shared static arguments
#[derive(Debug, Clone)]
pub struct Slice {
    pub index: usize,
    pub input: Value,
    pub static_args: Arc<Vec<Value>>,
    pub status: SliceStatus,
    /// Number of times this slice has been handed to an executor
    pub attempts: u32,
    /// NOPROGRESS warnings since the last dispatch or progress report
    pub stall_warnings: u32,
    pub last_progress: Option<Progress>,
    pub last_progress_at: Option<Instant>,
    pub dispatched_at: Option<Instant>,
    pub executor: Option<ExecutorId>,
    /// Executors this slice was abandoned on, most recent last
    pub previous_executors: Vec<ExecutorId>,
    outcome: Option<SliceOutcome>,
}

impl Slice {
    fn new(index: usize, input: Value, static_args: Arc<Vec<Value>>) -> Self {
        Self {
            index,
            input,
            static_args,
            status: SliceStatus::Pending,
            attempts: 0,
            stall_warnings: 0,
            last_progress: None,
            last_progress_at: None,
            dispatched_at: None,
            executor: None,
            previous_executors: Vec::new(),
            outcome: None,
        }
    }

    /// Work-function arguments: the input element first, then the static arguments
    pub fn arguments(&self) -> Vec<Value> {
        let mut args = Vec::with_capacity(self.static_args.len() + 1);
        args.push(self.input.clone());
        args.extend(self.static_args.iter().cloned());
        args
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Some(SliceOutcome::Result(v)) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(SliceOutcome::Error(e)) => Some(e),
            _ => None,
        }
    }

    pub fn mark_dispatched(&mut self, executor: ExecutorId, now: Instant) {
        self.status = SliceStatus::Dispatched;
        self.attempts += 1;
        self.stall_warnings = 0;
        self.dispatched_at = Some(now);
        self.last_progress_at = Some(now);
        self.executor = Some(executor);
    }

    /// Returns false if the slice is not in flight (late signal)
    pub fn record_progress(&mut self, progress: Progress, now: Instant) -> bool {
        if !self.status.is_in_flight() {
            return false;
        }
        self.status = SliceStatus::Progressing;
        self.last_progress = Some(progress);
        self.last_progress_at = Some(now);
        self.stall_warnings = 0;
        true
    }

    /// Time since the last progress report (or dispatch), if in flight
    pub fn silent_for(&self, now: Instant) -> Option<Duration> {
        if !self.status.is_in_flight() {
            return None;
        }
        self.last_progress_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Count a stall warning and restart the stall timer
    pub fn record_stall(&mut self, now: Instant) -> u32 {
        self.stall_warnings += 1;
        self.last_progress_at = Some(now);
        self.stall_warnings
    }

    pub fn abandon(&mut self) {
        self.status = SliceStatus::Abandoned;
        self.stall_warnings = 0;
        if let Some(executor) = self.executor.take() {
            self.previous_executors.push(executor);
        }
    }

    pub fn complete(&mut self, result: Value) {
        self.status = SliceStatus::Done;
        self.outcome = Some(SliceOutcome::Result(result));
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = SliceStatus::Failed;
        if let Some(executor) = self.executor.take() {
            self.previous_executors.push(executor);
        }
        self.outcome = Some(SliceOutcome::Error(message.into()));
    }
}

/// Partition of an ordered input collection into slices
#[derive(Debug, Clone)]
pub struct SliceSet {
    slices: Vec<Slice>,
}

impl SliceSet {
    pub fn new<I>(inputs: I, static_args: Vec<Value>) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let static_args = Arc::new(static_args);
        let slices = inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| Slice::new(index, input, Arc::clone(&static_args)))
            .collect();
        Self { slices }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slice> {
        self.slices.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Slice> {
        self.slices.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    pub fn count_status(&self, status: SliceStatus) -> usize {
        self.slices.iter().filter(|s| s.status == status).count()
    }

    pub fn in_flight(&self) -> usize {
        self.slices.iter().filter(|s| s.status.is_in_flight()).count()
    }

    /// Slices not yet paid for (everything except DONE and FAILED)
    pub fn remaining(&self) -> usize {
        self.slices.iter().filter(|s| !s.status.is_resolved()).count()
    }

    pub fn unresolved_indices(&self) -> Vec<usize> {
        self.slices
            .iter()
            .filter(|s| s.status != SliceStatus::Done)
            .map(|s| s.index)
            .collect()
    }
}

/// Unwrap a JSON input set. Only arrays are iterable input sets.
pub fn input_array(inputs: Value) -> Result<Vec<Value>> {
    match inputs {
        Value::Array(items) => Ok(items),
        other => Err(JobMeshError::InvalidInput(format!(
            "input set must be an array, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
