//! Command-line interface parsing and handling
//!
//! Every subcommand loads the configuration, builds a connection registry
//! and tool bridge from it, runs, and shuts all sessions down before exiting.

pub mod permission_check;
pub mod server_list;
pub mod tool_call;
pub mod tool_list;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::cli::permission_check::check_permission;
use crate::cli::server_list::list_servers;
use crate::cli::tool_call::call_tool;
use crate::cli::tool_list::list_tools;
use crate::core::config::data::Config;
use crate::mcp::bridge::ToolBridge;
use crate::mcp::client::SessionOptions;
use crate::mcp::permissions::{PermissionChecker, PlanModeGate};
use crate::mcp::registry::ConnectionRegistry;
use crate::tools::ToolRegistry;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(version)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERGEN_GIT_SHA"), ")"))]
#[command(about = "Bridge external MCP tool servers into a local tool registry")]
#[command(
    long_about = "Kestrel launches Model Context Protocol servers as child processes, \
performs the initialize handshake over stdio, and exposes every remote tool as a \
namespaced local tool (mcp_<server>_<tool>).\n\n\
Permission rules use the form mcp__<server>__<tool> with '*' wildcards and optional \
allow:/deny: prefixes. Deny always wins.\n\n\
Environment Variables:\n\
  KESTREL_LOG       Tracing filter directive (e.g. kestrel=debug)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs to the given file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Log at debug level unless KESTREL_LOG says otherwise
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Activate read-only plan mode
    #[arg(long, global = true)]
    pub plan: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured MCP servers and their environment status
    Servers,
    /// Connect, discover and print the registered tools
    Tools {
        /// Only this server (default: every enabled server)
        server: Option<String>,
    },
    /// Execute one remote tool and print its result
    Call {
        /// Configured server name
        server: String,
        /// Remote tool name, without the mcp_ prefix
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,
    },
    /// Evaluate a permission decision for a tool id
    Check {
        /// Tool id in permission form, e.g. mcp__github__create_issue
        tool_id: String,
        /// Rule to evaluate; repeatable. Defaults to the server's configured rules
        #[arg(long = "rule", value_name = "RULE")]
        rules: Vec<String>,
    },
}

/// Registry, connections and bridge for one CLI invocation.
pub(crate) fn build_bridge(config: &Config, plan: bool) -> ToolBridge {
    let connections = Arc::new(ConnectionRegistry::new(SessionOptions::from_config(config)));
    let gate: Arc<dyn PermissionChecker> =
        Arc::new(PlanModeGate::new(config.read_only_patterns(), plan));
    ToolBridge::new(Arc::new(ToolRegistry::new()), connections, Some(gate))
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref(), args.verbose)?;

    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Servers => {
            list_servers(&config);
            Ok(())
        }
        Commands::Tools { server } => list_tools(&config, server.as_deref(), args.plan).await,
        Commands::Call { server, tool, args: raw_args } => {
            let succeeded = call_tool(&config, &server, &tool, &raw_args, args.plan).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Check { tool_id, rules } => {
            if !check_permission(&config, &tool_id, &rules, args.plan) {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
