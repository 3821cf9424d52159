pub mod job;
pub mod request;

// Re-export models for easy access
pub use job::{Job, JobOutcome, JobSummary, StepResult, StepStatus};
pub use request::{JobFilter, JobPage, JobRequest, JobStatistics};
