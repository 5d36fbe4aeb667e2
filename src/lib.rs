//! # mockhttpr
//!
//! A development-time mock API gateway: pattern-matched REST routes,
//! a filesystem-backed JSON/binary resource layer with pagination,
//! filtering and JSON-Patch/Merge-Patch support, and a from-scratch
//! WebSocket server (RFC 6455) with rooms, broadcast, heartbeat and
//! permessage-deflate (RFC 7692).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use mockhttpr::config::GatewayConfig;
//! use mockhttpr::dispatcher::Gateway;
//! use mockhttpr::route::Route;
//! use mockhttpr::http::Method;
//! use mockhttpr::pattern::CompiledPattern;
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut config = GatewayConfig::default();
//! config.push_route(Route::fs(CompiledPattern::compile("/api/**").unwrap(), Method::Get));
//!
//! Gateway::new(config).run("127.0.0.1:4444").await
//! # }
//! ```

pub mod body;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fs_engine;
pub mod http;
pub mod middleware;
pub mod pattern;
pub mod route;
pub mod ws;
