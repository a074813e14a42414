//! traefik-tower - forward-auth adapter for Traefik
//!
//! Traefik's `forwardAuth` middleware sends every inbound request here
//! first. traefik-tower checks the bearer token with one of four strategies
//! and answers 200 with the caller identity in `X-Consumer-Id`, 401 or 500.
//!
//! # Architecture
//!
//! - `services`: credential extraction, the strategies and the engine
//! - `client`: outbound HTTP client shared by the strategies
//! - `tracer`: per-request OpenTelemetry span pair
//! - `server`: axum routes, logging middleware and graceful shutdown
//! - `config`: configuration management and validation
//! - `telemetry`: log subscriber and tracer provider setup
//! - `metrics`: verification metrics and the Prometheus exporter
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use traefik_tower::{AuthService, Config, TracerHandle};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let service = AuthService::from_config(&config, TracerHandle::noop()).await?;
//!     println!("strategy: {}", service.strategy_name());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod services;
pub mod telemetry;
pub mod tracer;

// Re-export commonly used types
pub use client::HttpClient;
pub use config::{AuthMode, Config};
pub use error::{AuthError, AuthResult, Result, TowerError};
pub use services::{AuthService, ConsumerId, InboundRequest, Verifier};
pub use tracer::{TraceContext, TracerHandle};
