//! FIFO job queue with a fixed concurrency ceiling.
//!
//! Every scheduling transition happens on a single dispatcher task that reads
//! events from a channel: `add` pushes the job into the backlog and emits
//! `Submitted`, a finishing job releases its slot and emits `Completed`. On each
//! event the dispatcher starts backlog jobs in admission order until either the
//! backlog is empty or `max_concurrent` jobs are active.
//!
//! Backlog and counters live behind a `parking_lot::Mutex` so `size`, `active`
//! and `status` can be read synchronously; each critical section is O(1).

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::error::{ConfigError, JobError};
use crate::runtime::TokioSpawner;

/// Abstraction for spawning futures on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Point-in-time view of the queue, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Jobs currently executing.
    pub active: usize,
    /// Jobs waiting in the backlog.
    pub queued: usize,
    /// Concurrency ceiling.
    pub max_concurrent: usize,
}

type JobRun = Box<dyn FnOnce(Slot) -> BoxFuture<'static, ()> + Send>;

/// A queued unit of work. Dropping it unrun cancels its handle.
struct Job {
    id: u64,
    run: JobRun,
}

struct QueueState {
    backlog: VecDeque<Job>,
    active: usize,
    next_id: u64,
}

enum Event {
    Submitted(u64),
    Completed(u64),
}

/// Capacity held by one running job. Released exactly once, on drop.
struct Slot {
    id: u64,
    state: Arc<Mutex<QueueState>>,
    events: mpsc::UnboundedSender<Event>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.active -= 1;
        }
        // The dispatcher only disappears once every sender is gone, and this
        // slot owns one.
        let _ = self.events.send(Event::Completed(self.id));
    }
}

/// Handle to a job's eventual outcome.
///
/// Resolves with the task's value, its error wrapped in [`JobError::Task`],
/// [`JobError::Panicked`], or [`JobError::Cancelled`] when the job was
/// discarded before it started.
#[must_use = "a job handle does nothing unless awaited"]
pub struct JobHandle<T, E> {
    id: u64,
    rx: oneshot::Receiver<Result<T, JobError<E>>>,
}

impl<T, E> JobHandle<T, E> {
    /// Queue-assigned job identifier, increasing in admission order.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl<T, E> Future for JobHandle<T, E> {
    type Output = Result<T, JobError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Bounded-concurrency FIFO scheduler.
///
/// Cloning yields another handle onto the same queue. When the last handle
/// is dropped the backlog is cancelled; active jobs run to completion.
#[derive(Clone)]
pub struct JobQueue {
    max_concurrent: usize,
    state: Arc<Mutex<QueueState>>,
    events: mpsc::UnboundedSender<Event>,
}

impl JobQueue {
    /// Create a queue on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `max_concurrent` is zero or no runtime is
    /// running.
    pub fn new(max_concurrent: usize) -> Result<Self, ConfigError> {
        Self::with_spawner(max_concurrent, TokioSpawner::current()?)
    }

    /// Create a queue whose dispatcher and jobs run on `spawner`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `max_concurrent` is zero.
    pub fn with_spawner<S>(max_concurrent: usize, spawner: S) -> Result<Self, ConfigError>
    where
        S: Spawn + Clone + Send + Sync + 'static,
    {
        if max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent must be greater than 0".into(),
            ));
        }

        let state = Arc::new(Mutex::new(QueueState {
            backlog: VecDeque::new(),
            active: 0,
            next_id: 0,
        }));
        let (events, rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            max_concurrent,
            state: Arc::clone(&state),
            events: events.downgrade(),
            spawner: spawner.clone(),
        };
        spawner.spawn(dispatcher.run(rx));

        info!(max_concurrent, "job queue initialized");

        Ok(Self {
            max_concurrent,
            state,
            events,
        })
    }

    /// Admit `task` to the backlog and return a handle to its outcome.
    ///
    /// Never fails synchronously; every failure arrives through the handle.
    pub fn add<F, Fut, T, E>(&self, task: F) -> JobHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let run: JobRun = Box::new(move |slot: Slot| {
            async move {
                let outcome = AssertUnwindSafe(async move { task().await })
                    .catch_unwind()
                    .await;
                let id = slot.id;
                let result = match outcome {
                    Ok(Ok(value)) => {
                        info!(job_id = id, "job completed");
                        Ok(value)
                    }
                    Ok(Err(e)) => {
                        warn!(job_id = id, "job failed");
                        Err(JobError::Task(e))
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(job_id = id, panic = %message, "job panicked");
                        Err(JobError::Panicked(message))
                    }
                };
                // Free the slot before settling so a woken caller observes it.
                drop(slot);
                let _ = tx.send(result);
            }
            .boxed()
        });

        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.backlog.push_back(Job { id, run });
            id
        };

        if self.events.send(Event::Submitted(id)).is_err() {
            // Dispatcher is gone (runtime shut down): cancel instead of hanging.
            let mut state = self.state.lock();
            state.backlog.retain(|job| job.id != id);
        }

        JobHandle { id, rx }
    }

    /// Number of jobs waiting in the backlog.
    pub fn size(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Number of jobs currently executing.
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Concurrency ceiling fixed at construction.
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Discard every job that has not started yet and return how many.
    ///
    /// Their handles resolve with [`JobError::Cancelled`]. Active jobs are
    /// untouched.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut self.state.lock().backlog);
        let cleared = drained.len();
        drop(drained);
        info!(cleared, "cleared queued jobs");
        cleared
    }

    /// Snapshot of active, queued and ceiling.
    pub fn status(&self) -> QueueStatus {
        let state = self.state.lock();
        QueueStatus {
            active: state.active,
            queued: state.backlog.len(),
            max_concurrent: self.max_concurrent,
        }
    }
}

struct Dispatcher<S> {
    max_concurrent: usize,
    state: Arc<Mutex<QueueState>>,
    events: mpsc::WeakUnboundedSender<Event>,
    spawner: S,
}

impl<S> Dispatcher<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Submitted(id) => debug!(job_id = id, "job submitted"),
                Event::Completed(id) => debug!(job_id = id, "slot released"),
            }
            if !self.advance() {
                break;
            }
        }

        let abandoned = std::mem::take(&mut self.state.lock().backlog);
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "queue dropped, cancelling backlog");
        }
        debug!("dispatcher stopped");
    }

    /// Start backlog jobs while capacity allows. Returns `false` once every
    /// queue handle is gone.
    fn advance(&self) -> bool {
        loop {
            let (job, active, queued) = {
                let mut state = self.state.lock();
                if state.active >= self.max_concurrent {
                    return true;
                }
                let Some(job) = state.backlog.pop_front() else {
                    return true;
                };
                state.active += 1;
                (job, state.active, state.backlog.len())
            };

            let Some(events) = self.events.upgrade() else {
                self.state.lock().active -= 1;
                return false;
            };

            info!(job_id = job.id, active, queued, "starting job");
            let slot = Slot {
                id: job.id,
                state: Arc::clone(&self.state),
                events,
            };
            self.spawner.spawn((job.run)(slot));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_zero_concurrency() {
        assert!(JobQueue::new(0).is_err());
    }

    #[tokio::test]
    async fn runs_a_single_job() {
        let queue = JobQueue::new(1).unwrap();
        let handle = queue.add(|| async { Ok::<_, String>(41 + 1) });
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(queue.active(), 0);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn task_error_is_propagated_verbatim() {
        let queue = JobQueue::new(1).unwrap();
        let err = queue
            .add(|| async { Err::<(), _>("scrape blew up".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.into_task_error().as_deref(), Some("scrape blew up"));
    }

    #[tokio::test]
    async fn panicking_task_fails_its_handle_only() {
        let queue = JobQueue::new(1).unwrap();
        let bad = queue.add(|| async {
            if true {
                panic!("selector exploded");
            }
            Ok::<u8, String>(0)
        });
        let good = queue.add(|| async { Ok::<_, String>(7u8) });

        match bad.await {
            Err(JobError::Panicked(msg)) => assert!(msg.contains("selector exploded")),
            other => panic!("expected panic failure, got {other:?}"),
        }
        assert_eq!(good.await.unwrap(), 7);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn handle_ids_follow_admission_order() {
        let queue = JobQueue::new(1).unwrap();
        let a = queue.add(|| async { Ok::<_, String>(()) });
        let b = queue.add(|| async { Ok::<_, String>(()) });
        assert!(a.id() < b.id());
        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn status_serializes_camel_case() {
        let queue = JobQueue::new(3).unwrap();
        let json = serde_json::to_value(queue.status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"active": 0, "queued": 0, "maxConcurrent": 3})
        );
    }

    #[tokio::test]
    async fn dropped_queue_cancels_backlog() {
        let queue = JobQueue::new(1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let running = queue.add(move || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok::<_, String>("done")
        });
        let waiting = queue.add(|| async { Ok::<_, String>("never") });

        started_rx.await.unwrap();
        drop(queue);
        release_tx.send(()).unwrap();

        assert_eq!(running.await.unwrap(), "done");
        let outcome = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("cancelled handle should settle");
        assert!(outcome.unwrap_err().is_cancelled());
    }
}
