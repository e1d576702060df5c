//! HTTP endpoints for the mailprobe SMTP probe
//!
//! # Endpoints
//!
//! - **`POST /api/smtp-test`** - Runs a probe and answers with the finished record
//! - **`POST /api/smtp-test-stream`** - Runs a probe and streams its events as SSE
//! - **`GET /api/providers`** - Every provider preset, in display order
//! - **`GET /api/providers/{id}`** - One provider preset
//! - **`GET /api/stats`** - Counters over finished runs
//! - **`GET /health/live`** - Liveness probe
//!
//! # Usage
//!
//! ```rust,no_run
//! use mailprobe_web::{ProbeStats, WebConfig, WebServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = WebServer::new(&WebConfig::default(), Arc::new(ProbeStats::new())).await?;
//! server.serve(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod server;
mod stats;

pub use config::WebConfig;
pub use error::{Rejection, WebError};
pub use server::{AppState, WebServer, router};
pub use stats::{ProbeStats, StatsSnapshot};
