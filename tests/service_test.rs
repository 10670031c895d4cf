//! Tests for the ScrapeService facade using in-process runners.
//!
//! These tests validate:
//! - Single scrapes and their response shape
//! - Error reports for each failure kind
//! - Batch sequencing and aggregation
//! - Queue clearing, metrics and health

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scrape_parking_lot::builders::build_service_with;
use scrape_parking_lot::config::ServiceConfig;
use scrape_parking_lot::core::{JobQueue, JobRunner, OutputParseError, WorkerError};
use scrape_parking_lot::runtime::{BatchRequest, ScrapeRequest, ScrapeService};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

// ============================================================================
// TEST RUNNERS
// ============================================================================

/// Returns two articles per site; fails for sites starting with `bad.`.
struct CannedRunner;

#[async_trait]
impl JobRunner for CannedRunner {
    async fn execute(&self, input: Value) -> Result<Value, WorkerError> {
        let site = input["sites"][0].as_str().unwrap_or_default().to_string();
        if site.starts_with("bad.") {
            return Err(WorkerError::Exit {
                code: Some(1),
                signal: None,
                stderr_tail: format!("net::ERR_NAME_NOT_RESOLVED at https://{site}"),
            });
        }
        Ok(json!({
            "totalResults": 2,
            "articles": [{"url": format!("https://{site}/a")}, {"url": format!("https://{site}/b")}],
            "echo": input,
        }))
    }
}

/// Fails every call with a fixed error.
struct FailingRunner(fn() -> WorkerError);

#[async_trait]
impl JobRunner for FailingRunner {
    async fn execute(&self, _input: Value) -> Result<Value, WorkerError> {
        Err((self.0)())
    }
}

/// Holds every call until a permit is released.
struct GatedRunner(Arc<Semaphore>);

#[async_trait]
impl JobRunner for GatedRunner {
    async fn execute(&self, _input: Value) -> Result<Value, WorkerError> {
        let _permit = self
            .0
            .acquire()
            .await
            .map_err(|e| WorkerError::Io(std::io::Error::other(e)))?;
        Ok(json!({"totalResults": 0, "articles": []}))
    }
}

fn service<R: JobRunner>(runner: R) -> ScrapeService<R> {
    ScrapeService::new(JobQueue::new(1).unwrap(), runner)
}

// ============================================================================
// REQUEST MODELS
// ============================================================================

#[test]
fn empty_request_body_takes_defaults() {
    let request: ScrapeRequest = serde_json::from_str("{}").unwrap();
    assert_eq!(request, ScrapeRequest::default());
    assert_eq!(request.sites, vec!["edition.cnn.com"]);
    assert_eq!(request.max_articles_per_site, 50);
    assert_eq!(request.timeout, 30_000);
    assert_eq!(request.date_filter, "today");
    assert!(request.include_images && request.remove_duplicates && !request.debug);
}

#[test]
fn request_uses_camel_case_on_the_wire() {
    let request: ScrapeRequest =
        serde_json::from_str(r#"{"sites": ["bbc.com"], "maxArticlesPerSite": 5, "dateFilter": "week"}"#)
            .unwrap();
    assert_eq!(request.max_articles_per_site, 5);
    assert_eq!(request.date_filter, "week");

    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["includeImages"], true);
    assert_eq!(wire["removeDuplicates"], true);
}

#[test]
fn batch_request_derives_single_site_requests() {
    let batch: BatchRequest =
        serde_json::from_str(r#"{"urls": ["a.com", "b.com"], "maxArticlesPerUrl": 7}"#).unwrap();
    let request = batch.request_for("b.com");
    assert_eq!(request.sites, vec!["b.com"]);
    assert_eq!(request.max_articles_per_site, 7);
    assert_eq!(request.timeout, 30_000);
}

// ============================================================================
// SINGLE SCRAPE
// ============================================================================

#[tokio::test]
async fn scrape_returns_worker_result_with_meta() {
    let service = service(CannedRunner);
    let response = service.scrape(ScrapeRequest::default()).await.unwrap();

    assert_eq!(response.result["totalResults"], 2);
    assert_eq!(response.result["echo"]["maxArticlesPerSite"], 50);
    assert_eq!(response.meta.queue_status.max_concurrent, 1);
    assert!(response.meta.duration.ends_with('s'));

    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["totalResults"], 2);
    assert!(wire["meta"]["queueStatus"].is_object());
}

#[tokio::test]
async fn exit_failure_becomes_error_report() {
    let service = service(CannedRunner);
    let request = ScrapeRequest {
        sites: vec!["bad.example".to_string()],
        ..ScrapeRequest::default()
    };

    let report = service.scrape(request).await.unwrap_err();
    assert_eq!(report.status, "error");
    assert_eq!(report.kind, "worker_exit");
    assert_eq!(report.exit_code, Some(1));
    assert!(report.stderr_tail.unwrap().contains("ERR_NAME_NOT_RESOLVED"));
    assert!(report.error.starts_with("worker exited with code 1"));
}

#[tokio::test]
async fn timeout_and_parse_failures_keep_their_kind() {
    let timeout = service(FailingRunner(|| WorkerError::Timeout {
        deadline: Duration::from_secs(300),
    }));
    let report = timeout.scrape(ScrapeRequest::default()).await.unwrap_err();
    assert_eq!(report.kind, "worker_timeout");
    assert!(report.exit_code.is_none());

    let parse = service(FailingRunner(|| {
        WorkerError::OutputParse(OutputParseError {
            reason: "no sentinel-framed result found".to_string(),
            output_tail: "Scraping...".to_string(),
        })
    }));
    let report = parse.scrape(ScrapeRequest::default()).await.unwrap_err();
    assert_eq!(report.kind, "output_parse");
    assert_eq!(report.output_tail.as_deref(), Some("Scraping..."));

    let wire = serde_json::to_value(&report).unwrap();
    assert_eq!(wire["outputTail"], "Scraping...");
    assert!(wire.get("exitCode").is_none());
    assert_eq!(wire["totalResults"], 0);
    assert_eq!(wire["articles"], json!([]));
}

// ============================================================================
// BATCH
// ============================================================================

#[tokio::test]
async fn empty_batch_is_rejected() {
    let service = service(CannedRunner);
    let err = service.scrape_batch(BatchRequest::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "URLs array is required and must not be empty");
    assert_eq!(service.metrics().total_runs, 0);
}

#[tokio::test]
async fn batch_reports_each_url_in_order() {
    let service = service(CannedRunner);
    let batch = BatchRequest {
        urls: vec!["a.com".into(), "bad.example".into(), "c.com".into()],
        ..BatchRequest::default()
    };

    let report = service.scrape_batch(batch).await.unwrap();
    assert_eq!(report.total_urls, 3);
    assert_eq!(report.successful_urls, 2);
    assert_eq!(report.failed_urls, 1);
    assert_eq!(report.total_articles, 4);

    let urls: Vec<_> = report.results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, ["a.com", "bad.example", "c.com"]);
    assert!(!report.results[1].success);
    assert!(report.results[1].error.as_deref().unwrap().contains("code 1"));
    assert_eq!(report.results[2].articles.len(), 2);

    let metrics = service.metrics();
    assert_eq!(metrics.total_runs, 1);
    assert_eq!(metrics.successful_runs, 1);
}

// ============================================================================
// QUEUE CONTROL, METRICS, HEALTH
// ============================================================================

#[tokio::test]
async fn clear_queue_cancels_waiting_scrapes() {
    let gate = Arc::new(Semaphore::new(0));
    let service = Arc::new(service(GatedRunner(Arc::clone(&gate))));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.scrape(ScrapeRequest::default()).await })
        })
        .collect();

    for _ in 0..1000 {
        let status = service.status();
        if status.active == 1 && status.queued == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let cleared = service.clear_queue();
    assert_eq!(cleared.message, "Cleared 2 queued jobs");
    assert_eq!(cleared.status.queued, 0);
    assert_eq!(cleared.status.active, 1);

    gate.add_permits(1);
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap());
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    let cancelled: Vec<_> = outcomes.into_iter().filter_map(Result::err).collect();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|r| r.kind == "cancelled"));

    let metrics = service.metrics();
    assert_eq!(metrics.total_runs, 3);
    assert_eq!(metrics.failed_runs, 2);
    assert_eq!(metrics.success_rate, "33.33%");
}

#[tokio::test]
async fn health_reports_service_identity() {
    let service = build_service_with(&ServiceConfig::default(), CannedRunner).unwrap();
    let health = service.health();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "scrape_parking_lot");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.queue.max_concurrent, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn built_service_runs_a_real_worker() {
    let mut config = ServiceConfig::default();
    config.queue.max_concurrent = 2;
    config.supervisor = scrape_parking_lot::config::SupervisorConfig::for_program(
        "/bin/sh",
        [
            "-c",
            r#"echo "__APIFY_OUTPUT_START__"; printf '{"totalResults": 0, "input": %s}\n' "$APIFY_INPUT"; echo "__APIFY_OUTPUT_END__""#,
        ],
    );

    let service = scrape_parking_lot::builders::build_service(&config).unwrap();
    let response = service.scrape(ScrapeRequest::default()).await.unwrap();
    assert_eq!(response.result["input"]["sites"][0], "edition.cnn.com");
    assert_eq!(response.meta.queue_status.max_concurrent, 2);
}
