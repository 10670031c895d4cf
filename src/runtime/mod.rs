//! Runtime adapters and the service facade.

pub mod api;
pub mod metrics;
pub mod tokio_spawner;

pub use api::{BatchRequest, BatchReport, ErrorReport, ScrapeRequest, ScrapeResponse, ScrapeService};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use tokio_spawner::TokioSpawner;
