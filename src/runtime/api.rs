//! Service facade: request models and the queue-plus-supervisor composition
//! that an HTTP layer or batch driver calls into.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::core::{
    AppResult, JobError, JobQueue, JobRunner, QueueStatus, WorkerError, WorkerSupervisor,
};
use crate::runtime::metrics::{MetricsSnapshot, RunMetrics};
use crate::util::clock::{format_secs, now_ms};

/// One scrape request, forwarded to the worker as its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrapeRequest {
    /// Sites to scrape.
    pub sites: Vec<String>,
    /// Article cap per site.
    pub max_articles_per_site: u32,
    /// Per-page navigation timeout handed to the worker, in milliseconds.
    pub timeout: u64,
    /// Publication-date filter understood by the worker.
    pub date_filter: String,
    /// Whether to extract images.
    pub include_images: bool,
    /// Whether to de-duplicate articles.
    pub remove_duplicates: bool,
    /// Verbose worker logging.
    pub debug: bool,
}

impl Default for ScrapeRequest {
    fn default() -> Self {
        Self {
            sites: vec!["edition.cnn.com".to_string()],
            max_articles_per_site: 50,
            timeout: 30_000,
            date_filter: "today".to_string(),
            include_images: true,
            remove_duplicates: true,
            debug: false,
        }
    }
}

/// Several URLs scraped one after another through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchRequest {
    /// URLs, each becoming one job.
    pub urls: Vec<String>,
    /// Article cap per URL.
    pub max_articles_per_url: u32,
    /// See [`ScrapeRequest::timeout`].
    pub timeout: u64,
    /// See [`ScrapeRequest::date_filter`].
    pub date_filter: String,
    /// See [`ScrapeRequest::include_images`].
    pub include_images: bool,
    /// See [`ScrapeRequest::remove_duplicates`].
    pub remove_duplicates: bool,
    /// See [`ScrapeRequest::debug`].
    pub debug: bool,
}

impl Default for BatchRequest {
    fn default() -> Self {
        let single = ScrapeRequest::default();
        Self {
            urls: Vec::new(),
            max_articles_per_url: single.max_articles_per_site,
            timeout: single.timeout,
            date_filter: single.date_filter,
            include_images: single.include_images,
            remove_duplicates: single.remove_duplicates,
            debug: single.debug,
        }
    }
}

impl BatchRequest {
    /// Single-site request for `url`.
    pub fn request_for(&self, url: &str) -> ScrapeRequest {
        ScrapeRequest {
            sites: vec![url.to_string()],
            max_articles_per_site: self.max_articles_per_url,
            timeout: self.timeout,
            date_filter: self.date_filter.clone(),
            include_images: self.include_images,
            remove_duplicates: self.remove_duplicates,
            debug: self.debug,
        }
    }
}

/// Timing and queue context attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// Wall time of the request, e.g. `"12.34s"`.
    pub duration: String,
    /// Completion time, milliseconds since the epoch.
    pub timestamp_ms: u128,
    /// Queue state at completion.
    pub queue_status: QueueStatus,
}

/// Successful scrape: the worker's result object plus `meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResponse {
    /// Worker result fields, flattened into the response.
    #[serde(flatten)]
    pub result: Map<String, Value>,
    /// Request context.
    pub meta: ResponseMeta,
}

/// Failed scrape with the diagnostics of the underlying error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Always `"error"`.
    pub status: String,
    /// Stable error kind, e.g. `"worker_timeout"`.
    pub kind: String,
    /// Human-readable message.
    pub error: String,
    /// Exit code for `worker_exit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured stderr tail for `worker_exit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
    /// Truncated stdout for `output_parse`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
    /// Empty result shape so clients can read failures like successes.
    #[serde(default)]
    pub articles: Vec<Value>,
    /// Always zero.
    #[serde(default)]
    pub total_results: u64,
    /// Request context.
    pub meta: ResponseMeta,
}

impl ErrorReport {
    fn from_job_error(err: &JobError<WorkerError>, meta: ResponseMeta) -> Self {
        let (kind, exit_code, stderr_tail, output_tail) = match err {
            JobError::Task(WorkerError::Exit {
                code, stderr_tail, ..
            }) => ("worker_exit", *code, Some(stderr_tail.clone()), None),
            JobError::Task(WorkerError::OutputParse(e)) => {
                ("output_parse", None, None, Some(e.output_tail.clone()))
            }
            JobError::Task(e) => (e.kind(), None, None, None),
            JobError::Panicked(_) => ("task_panicked", None, None, None),
            JobError::Cancelled => ("cancelled", None, None, None),
        };
        Self {
            status: "error".to_string(),
            kind: kind.to_string(),
            error: err.to_string(),
            exit_code,
            stderr_tail,
            output_tail,
            articles: Vec::new(),
            total_results: 0,
            meta,
        }
    }
}

/// Outcome of one URL inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlOutcome {
    /// The URL.
    pub url: String,
    /// Whether its job produced a result.
    pub success: bool,
    /// `totalResults` reported by the worker.
    pub articles_found: u64,
    /// Seconds spent, queue wait included.
    pub duration_secs: f64,
    /// Articles returned by the worker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub articles: Vec<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Always `"ok"`; per-URL failures are reported in `results`.
    pub status: String,
    /// Sum of `articles_found`.
    pub total_articles: u64,
    /// URLs requested.
    pub total_urls: usize,
    /// URLs that succeeded.
    pub successful_urls: usize,
    /// URLs that failed.
    pub failed_urls: usize,
    /// Per-URL outcomes in request order.
    pub results: Vec<UrlOutcome>,
    /// Request context.
    pub meta: ResponseMeta,
}

/// Response to a backlog clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    /// Summary, e.g. `"Cleared 3 queued jobs"`.
    pub message: String,
    /// Queue state after clearing.
    pub status: QueueStatus,
}

/// Health payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    /// Always `"healthy"` while the service answers.
    pub status: String,
    /// Crate name.
    pub service: String,
    /// Crate version.
    pub version: String,
    /// Seconds since the service was built.
    pub uptime_secs: f64,
    /// Current queue state.
    pub queue: QueueStatus,
}

/// Queue and runner composed into the operations a front end exposes.
pub struct ScrapeService<R = WorkerSupervisor>
where
    R: JobRunner,
{
    queue: JobQueue,
    runner: Arc<R>,
    metrics: RunMetrics,
}

impl<R> ScrapeService<R>
where
    R: JobRunner,
{
    /// Compose a service from a queue and a runner.
    pub fn new(queue: JobQueue, runner: R) -> Self {
        Self {
            queue,
            runner: Arc::new(runner),
            metrics: RunMetrics::default(),
        }
    }

    /// The admission queue.
    pub const fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Queue one worker run for `request` and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorReport`] carrying the failure kind and diagnostics.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<ScrapeResponse, ErrorReport> {
        let started = Instant::now();
        self.metrics.record_start();
        info!(sites = ?request.sites, max_articles = request.max_articles_per_site, "scrape request received");

        match self.submit(&request).await {
            Ok(value) => {
                self.metrics.record_success();
                let meta = self.meta(started);
                info!(duration = %meta.duration, "scrape completed");
                Ok(ScrapeResponse {
                    result: into_object(value),
                    meta,
                })
            }
            Err(e) => {
                self.metrics.record_failure();
                let meta = self.meta(started);
                error!(duration = %meta.duration, error = %e, "scrape failed");
                Err(ErrorReport::from_job_error(&e, meta))
            }
        }
    }

    /// Scrape `batch.urls` one after another through the queue.
    ///
    /// # Errors
    ///
    /// Fails without queueing anything when `urls` is empty. Individual URL
    /// failures are reported inside the [`BatchReport`].
    pub async fn scrape_batch(&self, batch: BatchRequest) -> AppResult<BatchReport> {
        if batch.urls.is_empty() {
            anyhow::bail!("URLs array is required and must not be empty");
        }

        let started = Instant::now();
        self.metrics.record_start();
        info!(urls = batch.urls.len(), "batch scrape request received");

        let mut results = Vec::with_capacity(batch.urls.len());
        for url in &batch.urls {
            let url_started = Instant::now();
            let outcome = match self.submit(&batch.request_for(url)).await {
                Ok(value) => {
                    let articles_found = value
                        .get("totalResults")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let articles = value
                        .get("articles")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    info!(%url, articles_found, "batch url completed");
                    UrlOutcome {
                        url: url.clone(),
                        success: true,
                        articles_found,
                        duration_secs: url_started.elapsed().as_secs_f64(),
                        articles,
                        error: None,
                    }
                }
                Err(e) => {
                    error!(%url, error = %e, "batch url failed");
                    UrlOutcome {
                        url: url.clone(),
                        success: false,
                        articles_found: 0,
                        duration_secs: url_started.elapsed().as_secs_f64(),
                        articles: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(outcome);
        }

        self.metrics.record_success();
        let successful_urls = results.iter().filter(|r| r.success).count();
        let meta = self.meta(started);
        info!(duration = %meta.duration, successful_urls, "batch scrape completed");
        Ok(BatchReport {
            status: "ok".to_string(),
            total_articles: results.iter().map(|r| r.articles_found).sum(),
            total_urls: results.len(),
            successful_urls,
            failed_urls: results.len() - successful_urls,
            results,
            meta,
        })
    }

    /// Drop every queued job that has not started.
    pub fn clear_queue(&self) -> ClearResponse {
        let cleared = self.queue.clear();
        ClearResponse {
            message: format!("Cleared {cleared} queued jobs"),
            status: self.queue.status(),
        }
    }

    /// Current queue snapshot.
    pub fn status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Run counters plus queue snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.queue.status())
    }

    /// Liveness payload.
    pub fn health(&self) -> Health {
        Health {
            status: "healthy".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.metrics.uptime_secs(),
            queue: self.queue.status(),
        }
    }

    async fn submit(&self, request: &ScrapeRequest) -> Result<Value, JobError<WorkerError>> {
        let input = serde_json::to_value(request)
            .map_err(|e| JobError::Task(WorkerError::InputEncode(e)))?;
        let runner = Arc::clone(&self.runner);
        self.queue
            .add(move || async move { runner.execute(input).await })
            .await
    }

    fn meta(&self, started: Instant) -> ResponseMeta {
        ResponseMeta {
            duration: format_secs(started.elapsed()),
            timestamp_ms: now_ms(),
            queue_status: self.queue.status(),
        }
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}
