//! Job admission, worker supervision, and their error taxonomy.

pub mod error;
pub mod executor;
pub mod job_queue;
pub mod supervisor;

pub use error::{AppResult, ConfigError, JobError, OutputParseError, WorkerError};
pub use executor::JobRunner;
pub use job_queue::{JobHandle, JobQueue, QueueStatus, Spawn};
pub use supervisor::{InvocationState, WorkerSupervisor};
