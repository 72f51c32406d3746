//! HTTP route handlers for the InferSafe server.
//!
//! This module organizes all route handlers:
//! - `generate`: queued (streamed) and synchronous generation
//! - `admin`: model reload
//! - `health`: health checks, stats and Prometheus metrics

pub mod admin;
pub mod generate;
pub mod health;

// Re-export handlers for convenience
pub use admin::reload_model;
pub use generate::{generate, generate_batch, root, GenerateRequest};
pub use health::{health, live, metrics, ready, stats};
