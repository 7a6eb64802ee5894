//! Per-job dispatch: executor seam, work queue, result aggregation and the actor
//! that ties them together.

pub mod command;
pub mod engine;
pub mod executor;
pub mod queue;
pub mod results;

pub use command::{JobCommand, JobSnapshot, SliceSnapshot};
pub use engine::{DispatchEngine, JobDefinition, SharedJobState};
pub use executor::{
    ExecutorPool, ExecutorSignal, LocalExecutorPool, LocalWork, SignalKind, SliceAssignment,
    SliceReporter, WorkContext,
};
pub use queue::{QueueStats, WorkQueue};
pub use results::{PartialResults, ResultAggregator, WaitOutcome};
