use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Slices and work descriptor bound, not yet submitted
    New,
    /// Backend acknowledged the submission and assigned an id
    Accepted,
    /// At least one slice has been dispatched
    Running,
    /// Every slice resolved
    Done,
    /// Cancelled by the caller after in-flight slices drained
    Cancelled,
    /// Submission rejected or a slice failure escalated
    Errored,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::Accepted => "ACCEPTED",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Cancelled => "CANCELLED",
            JobState::Errored => "ERRORED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        match (self, target) {
            // From New
            (New, Accepted) => true, // Backend assigned an id
            (New, Errored) => true,  // Submission rejected

            // From Accepted
            (Accepted, Running) => true,   // First slice dispatched
            (Accepted, Done) => true,      // Empty slice set
            (Accepted, Cancelled) => true, // Cancelled before any dispatch
            (Accepted, Errored) => true,

            // From Running
            (Running, Done) => true,
            (Running, Cancelled) => true,
            (Running, Errored) => true,

            // Terminal states never leave
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<JobState> {
        use JobState::*;

        match self {
            New => vec![Accepted, Errored],
            Accepted => vec![Running, Done, Cancelled, Errored],
            Running => vec![Done, Cancelled, Errored],
            Done | Cancelled | Errored => vec![],
        }
    }

    /// May new slices be handed to executors in this state?
    pub fn can_dispatch(&self) -> bool {
        matches!(self, JobState::Accepted | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Done | JobState::Cancelled | JobState::Errored
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for JobState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "NEW" => Ok(JobState::New),
            "ACCEPTED" => Ok(JobState::Accepted),
            "RUNNING" => Ok(JobState::Running),
            "DONE" => Ok(JobState::Done),
            "CANCELLED" => Ok(JobState::Cancelled),
            "ERRORED" => Ok(JobState::Errored),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// State transition record (for logging/debugging)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: JobState, to: JobState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path() {
        assert!(JobState::New.can_transition_to(JobState::Accepted));
        assert!(JobState::Accepted.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Done));
    }

    #[test]
    fn test_terminal_states_are_sinks() {
        for state in [JobState::Done, JobState::Cancelled, JobState::Errored] {
            assert!(state.is_terminal());
            assert!(state.valid_transitions().is_empty());
            assert!(!state.can_transition_to(JobState::Cancelled));
            assert!(!state.can_dispatch());
        }
    }

    #[test]
    fn test_new_cannot_be_cancelled() {
        assert!(!JobState::New.can_transition_to(JobState::Cancelled));
        assert!(!JobState::New.can_transition_to(JobState::Running));
    }

    #[test]
    fn test_valid_transitions_agree_with_table() {
        use JobState::*;
        for from in [New, Accepted, Running, Done, Cancelled, Errored] {
            for to in [New, Accepted, Running, Done, Cancelled, Errored] {
                assert_eq!(
                    from.can_transition_to(to),
                    from.valid_transitions().contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_roundtrip_str() {
        assert_eq!(JobState::try_from("running"), Ok(JobState::Running));
        assert!(JobState::try_from("paused").is_err());
        assert_eq!(JobState::Errored.to_string(), "ERRORED");
    }
}
