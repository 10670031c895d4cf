//! Configuration models for the queue, the supervisor, and the service.

pub mod service;

pub use service::{QueueConfig, ServiceConfig, SupervisorConfig};
