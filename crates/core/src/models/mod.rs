pub mod finding;
pub mod job;

pub use finding::{
    AnalysisReport, Finding, FindingStatus, Observation, Severity, SeverityThresholds,
};
pub use job::{
    Job, JobMeta, JobOutcome, JobPriority, JobStatus, JobType, JobView, NewJob, QueueStats,
    TierStats,
};
