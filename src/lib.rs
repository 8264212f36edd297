//! # rttp-cache
//!
//! An async HTTP/1.1 gateway with a write-through response cache.
//!
//! Every successful `GET` passing through the gateway is streamed to the
//! client unchanged and, once complete, stored under its path for ten
//! minutes. When an origin goes down, `GET /fallback/<path>` (or automatic
//! failover on 502/503/504) serves the last stored body as
//! `{"cache": <body>}`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rttp_cache::{Gateway, Response, Router, Server, StatusCode};
//! use rttp_cache::cache::{CacheConfig, MemoryBackend};
//! use rttp_cache::context::Context;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::from_env();
//!     let backend = Arc::new(MemoryBackend::from_config(&config));
//!
//!     let mut router = Router::new();
//!     router.get("/pipeline-service/client/account/secured", |_ctx: Context| async {
//!         Response::new(StatusCode::Ok)
//!             .header("Content-Type", "application/json")
//!             .body(r#"{"id":1,"name":"A"}"#)
//!     });
//!
//!     let gateway = Gateway::builder(backend).config(config).router(router).build();
//!     gateway.serve(Server::bind("127.0.0.1:8080").await?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`http`]: wire types, including streamed response bodies.
//! - [`middleware`], [`router`], [`context`]: the request pipeline.
//! - [`cache`]: the response cache interceptor, fallback reader and backends.
//! - [`gateway`]: the assembled pipeline with failover.
//! - [`server`]: the TCP front end.
//! - [`telemetry`]: metric names.

pub mod cache;
pub mod context;
pub mod gateway;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;
pub mod telemetry;

pub use cache::{CacheBackend, CacheConfig, CacheError, FallbackOutcome, MemoryBackend};
pub use gateway::Gateway;
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
