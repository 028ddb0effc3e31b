//! # Metabase MCP Server
//!
//! A Model Context Protocol (MCP) server that gives AI agents access to a
//! Metabase instance without flooding their context window.
//!
//! This crate provides:
//! - **Tools**: list, retrieve, search, execute, export and clear_cache
//! - **Response optimization**: per-kind reducers that drop noisy metadata
//! - **Caching**: TTL caches for individual resources and list pages
//! - **Batch retrieval**: bounded-concurrency fetches with per-id isolation
//! - **Query safety**: read-only enforcement and automatic LIMIT handling
//!
//! ## Architecture
//!
//! Tools call server operations, which reach Metabase through the
//! [`gateway::ApiGateway`] trait. Raw payloads are reduced by [`optimizer`]
//! before they are cached or returned.

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod optimizer;
pub mod query;
pub mod resilience;
pub mod resource;
pub mod retrieval;
pub mod server;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use error::{McpError, ServerError};
pub use server::MetabaseMcpServer;
