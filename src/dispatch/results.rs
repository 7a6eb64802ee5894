//! Result aggregation in input order

use serde_json::Value;
use std::collections::BTreeSet;

/// What a deadline-bounded `wait()` saw
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// Job reached DONE; results in input order
    Complete(Vec<Value>),
    /// Deadline expired first; nothing was cancelled
    TimedOut(PartialResults),
}

/// Aggregator state at an arbitrary point in time
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResults {
    /// Indexed by slice number
    pub values: Vec<Option<Value>>,
    /// Slices without a result yet (including permanently failed ones)
    pub unresolved: Vec<usize>,
}

impl PartialResults {
    pub fn completed(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Per-slice results keyed by index, plus the terminal failure reason
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    values: Vec<Option<Value>>,
    failed: BTreeSet<usize>,
    failure_reason: Option<String>,
}

impl ResultAggregator {
    pub fn new(slices: usize) -> Self {
        Self {
            values: vec![None; slices],
            failed: BTreeSet::new(),
            failure_reason: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First result for a slice wins; returns false for duplicates or bad indices
    pub fn store(&mut self, index: usize, value: Value) -> bool {
        match self.values.get_mut(index) {
            Some(slot @ None) => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&mut self, index: usize) {
        if index < self.values.len() && self.values[index].is_none() {
            self.failed.insert(index);
        }
    }

    pub fn set_failure_reason(&mut self, reason: impl Into<String>) {
        self.failure_reason.get_or_insert_with(|| reason.into());
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn completed(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn unresolved(&self) -> Vec<usize> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Results in input order. Failed slices (partial-success policy) appear as null.
    pub fn ordered(&self) -> Vec<Value> {
        self.values
            .iter()
            .map(|v| v.clone().unwrap_or(Value::Null))
            .collect()
    }

    pub fn partial(&self) -> PartialResults {
        PartialResults {
            values: self.values.clone(),
            unresolved: self.unresolved(),
        }
    }
}
