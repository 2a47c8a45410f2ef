//! Image transformation service.
//!
//! Images are transformed either synchronously over HTTP or asynchronously
//! as jobs published to a Redis-backed queue and consumed by a worker pool.
//! Results are cached under a key derived from the source and the requested
//! operations, and outputs are uploaded to S3-compatible storage.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod telemetry;
