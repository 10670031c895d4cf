//! # Scrape Parking Lot
//!
//! Admission control and process supervision for scrape jobs.
//!
//! Scrape requests are expensive: each one launches a headless-browser worker
//! process that can run for minutes and consume a large heap. This crate parks
//! requests in a FIFO queue with a fixed concurrency ceiling, runs each
//! admitted job in its own worker process under a hard deadline, and recovers
//! the worker's JSON result from noisy stdout by looking for sentinel lines.
//!
//! ## Components
//!
//! - [`core::JobQueue`]: FIFO admission with at most `max_concurrent` jobs
//!   running. Every caller gets a [`core::JobHandle`] that settles with exactly
//!   that job's outcome.
//! - [`core::WorkerSupervisor`]: spawns the worker with its input in an
//!   environment variable, captures stdout/stderr, kills it on deadline and
//!   classifies the outcome as a [`core::WorkerError`].
//! - [`protocol::OutputCodec`]: extracts the JSON value framed between the
//!   start and end sentinels, with an opt-in last-line fallback.
//! - [`runtime::ScrapeService`]: the facade a front end calls (scrape, batch,
//!   clear, status, metrics, health).
//!
//! ```rust,ignore
//! use scrape_parking_lot::builders::build_service;
//! use scrape_parking_lot::config::ServiceConfig;
//! use scrape_parking_lot::runtime::ScrapeRequest;
//!
//! let service = build_service(&ServiceConfig::from_env()?)?;
//! let response = service.scrape(ScrapeRequest::default()).await;
//! ```
//!
//! Worker programs written in Rust can use [`protocol::read_input`] and
//! [`protocol::write_result`] to speak the same protocol.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Job admission, worker supervision, and the error taxonomy.
pub mod core;
/// Configuration models for the queue, the supervisor and the service.
pub mod config;
/// Builders to construct the service from configuration.
pub mod builders;
/// Worker wire protocol: input hand-off and sentinel-framed output.
pub mod protocol;
/// Runtime adapters and the service facade.
pub mod runtime;
/// Shared utilities.
pub mod util;
