pub mod executor;
pub mod finding_repository;
pub mod job_store;

pub use executor::{Checkpoint, CheckpointHandle, TaskContext, TaskExecutor, TaskOutput};
pub use finding_repository::{AnalysisSink, FindingRepository};
pub use job_store::{CancelOutcome, JobStore};
