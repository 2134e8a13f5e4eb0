//! # cat-cache
//!
//! An HTTP service that serves cat pictures for HTTP status codes, fetched
//! from an upstream such as <https://http.cat> and kept in an in-memory,
//! expiring, single-flight cache.
//!
//! The interesting part is [`cache::ExpiringCache`]: however many requests
//! miss on the same key at once, the upstream is asked once, and every waiter
//! receives the same outcome.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cat_cache::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::get(None)?;
//!     cat_cache::service::run(config, async {
//!         tokio::signal::ctrl_c().await.ok();
//!     })
//!     .await
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod router;
pub mod server;
pub mod service;
pub mod upstream;

pub use cache::{CacheConfig, ExpiringCache, LoadError};
pub use http::{Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
