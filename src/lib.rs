//! Kestrel extends a host tool registry with tools served by external
//! Model Context Protocol (MCP) servers.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] owns the stdio protocol sessions, the connection registry, the
//!   permission evaluator, and the bridge that wraps remote tools.
//! - [`tools`] defines the host [`tools::Tool`] trait and the registry the
//!   bridge populates.
//! - [`core`] holds configuration loading and shared constants.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod mcp;
pub mod tools;
pub mod utils;
