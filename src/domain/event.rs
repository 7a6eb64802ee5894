use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use super::ids::JobId;
use super::slice::Progress;
use super::state::JobState;

/// The closed set of event kinds listeners can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ReadyStateChange,
    Accepted,
    NoProgress,
    Error,
    NoFunds,
    Result,
    Console,
    Progress,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::ReadyStateChange,
        EventKind::Accepted,
        EventKind::NoProgress,
        EventKind::Error,
        EventKind::NoFunds,
        EventKind::Result,
        EventKind::Console,
        EventKind::Progress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReadyStateChange => "readystatechange",
            EventKind::Accepted => "accepted",
            EventKind::NoProgress => "noProgress",
            EventKind::Error => "error",
            EventKind::NoFunds => "nofunds",
            EventKind::Result => "result",
            EventKind::Console => "console",
            EventKind::Progress => "progress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().to_ascii_lowercase() == lowered)
            .ok_or_else(|| format!("Unknown event kind: {}", s))
    }
}

/// Kind-specific event fields
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ReadyStateChange {
        state: JobState,
    },
    Accepted {
        job: JobId,
    },
    NoProgress {
        job_name: String,
        slice_number: usize,
        last_progress: Option<Progress>,
        message: String,
    },
    /// `slice_number` is None for job-level failures such as a rejected submission
    Error {
        job_name: String,
        slice_number: Option<usize>,
        message: String,
    },
    NoFunds {
        name: String,
        bank_account: String,
        funds_required: Decimal,
        remaining_slices: usize,
        slice_payment_amount: Decimal,
    },
    Result {
        slice_number: usize,
        result: Value,
    },
    Console {
        slice_number: usize,
        message: Vec<String>,
    },
    Progress {
        slice_number: usize,
        progress: Progress,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::ReadyStateChange { .. } => EventKind::ReadyStateChange,
            EventPayload::Accepted { .. } => EventKind::Accepted,
            EventPayload::NoProgress { .. } => EventKind::NoProgress,
            EventPayload::Error { .. } => EventKind::Error,
            EventPayload::NoFunds { .. } => EventKind::NoFunds,
            EventPayload::Result { .. } => EventKind::Result,
            EventPayload::Console { .. } => EventKind::Console,
            EventPayload::Progress { .. } => EventKind::Progress,
        }
    }

    pub fn slice_number(&self) -> Option<usize> {
        match self {
            EventPayload::Error { slice_number, .. } => *slice_number,
            EventPayload::NoProgress { slice_number, .. }
            | EventPayload::Result { slice_number, .. }
            | EventPayload::Console { slice_number, .. }
            | EventPayload::Progress { slice_number, .. } => Some(*slice_number),
            _ => None,
        }
    }
}

/// A committed job event, numbered in commit order
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    /// Strictly increasing per job, starting at 1
    pub sequence: u64,
    /// None only for events committed before the backend assigned an id
    pub job: Option<JobId>,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn slice_number(&self) -> Option<usize> {
        self.payload.slice_number()
    }

    /// Listener-facing JSON shape of the payload
    pub fn to_json(&self) -> Value {
        let job = self.job.as_ref().map(|id| id.as_str().to_string());
        match &self.payload {
            EventPayload::ReadyStateChange { state } => json!(state.as_str().to_lowercase()),
            EventPayload::Accepted { job } => json!({ "job": job.as_str() }),
            EventPayload::NoProgress {
                job_name,
                slice_number,
                last_progress,
                message,
            } => json!({
                "job": job,
                "jobName": job_name,
                "sliceNumber": slice_number,
                "progressReports": { "last": { "progress": last_progress } },
                "message": message,
            }),
            EventPayload::Error {
                job_name,
                slice_number,
                message,
            } => json!({
                "job": job,
                "jobName": job_name,
                "sliceNumber": slice_number,
                "message": message,
            }),
            EventPayload::NoFunds {
                name,
                bank_account,
                funds_required,
                remaining_slices,
                slice_payment_amount,
            } => json!({
                "job": job,
                "name": name,
                "bankAccount": bank_account,
                "fundsRequired": funds_required,
                "remainingSlices": remaining_slices,
                "slicePaymentAmount": slice_payment_amount,
            }),
            EventPayload::Result {
                slice_number,
                result,
            } => json!({
                "job": job,
                "sliceNumber": slice_number,
                "result": result,
            }),
            EventPayload::Console {
                slice_number,
                message,
            } => json!({
                "job": job,
                "sliceNumber": slice_number,
                "message": message,
            }),
            EventPayload::Progress {
                slice_number,
                progress,
            } => json!({
                "job": job,
                "sliceNumber": slice_number,
                "progress": progress,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(payload: EventPayload) -> JobEvent {
        JobEvent {
            sequence: 7,
            job: Some(JobId::new("job-1")),
            timestamp: Utc::now(),
            payload,
        }
    }

    #[test]
    fn test_kind_names_parse_case_insensitively() {
        assert_eq!("noProgress".parse::<EventKind>(), Ok(EventKind::NoProgress));
        assert_eq!("noprogress".parse::<EventKind>(), Ok(EventKind::NoProgress));
        assert_eq!("NOFUNDS".parse::<EventKind>(), Ok(EventKind::NoFunds));
        assert!("complete".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_nofunds_json_shape() {
        let e = event(EventPayload::NoFunds {
            name: "Template job".into(),
            bank_account: "0xabc".into(),
            funds_required: dec!(10),
            remaining_slices: 2,
            slice_payment_amount: dec!(5),
        });
        let v = e.to_json();
        assert_eq!(v["job"], "job-1");
        assert_eq!(v["bankAccount"], "0xabc");
        assert_eq!(v["remainingSlices"], 2);
        assert_eq!(v["fundsRequired"], "10");
    }

    #[test]
    fn test_noprogress_json_nests_last_progress() {
        let e = event(EventPayload::NoProgress {
            job_name: "t".into(),
            slice_number: 3,
            last_progress: Some(Progress::Fraction(0.5)),
            message: "no progress".into(),
        });
        let v = e.to_json();
        assert_eq!(v["progressReports"]["last"]["progress"], 0.5);
        assert_eq!(e.slice_number(), Some(3));
        assert_eq!(e.kind(), EventKind::NoProgress);
    }

    #[test]
    fn test_readystatechange_is_bare_state() {
        let e = event(EventPayload::ReadyStateChange {
            state: JobState::Running,
        });
        assert_eq!(e.to_json(), json!("running"));
        assert_eq!(e.slice_number(), None);
    }

    #[test]
    fn test_job_level_error_has_null_slice() {
        let e = event(EventPayload::Error {
            job_name: "t".into(),
            slice_number: None,
            message: "Job submission failed: rejected".into(),
        });
        let v = e.to_json();
        assert!(v["sliceNumber"].is_null());
        assert_eq!(v["jobName"], "t");
        assert_eq!(e.slice_number(), None);
    }
}
