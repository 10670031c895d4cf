//! Build a [`ScrapeService`] from [`ServiceConfig`].

use crate::config::ServiceConfig;
use crate::core::{ConfigError, JobQueue, JobRunner, WorkerSupervisor};
use crate::runtime::{ScrapeService, TokioSpawner};

/// Build the production service: a queue on the current tokio runtime in
/// front of a [`WorkerSupervisor`].
///
/// # Errors
///
/// Returns `ConfigError` if the configuration is invalid or no tokio runtime
/// is running.
pub fn build_service(cfg: &ServiceConfig) -> Result<ScrapeService, ConfigError> {
    cfg.validate()?;
    let supervisor = WorkerSupervisor::new(cfg.supervisor.clone())?;
    build_service_with(cfg, supervisor)
}

/// Build a service around a caller-provided runner, using only the queue
/// section of `cfg`.
///
/// # Errors
///
/// Returns `ConfigError` if the queue section is invalid or no tokio runtime
/// is running.
pub fn build_service_with<R>(cfg: &ServiceConfig, runner: R) -> Result<ScrapeService<R>, ConfigError>
where
    R: JobRunner,
{
    cfg.queue.validate()?;
    let queue = JobQueue::with_spawner(cfg.queue.max_concurrent, TokioSpawner::current()?)?;
    Ok(ScrapeService::new(queue, runner))
}
