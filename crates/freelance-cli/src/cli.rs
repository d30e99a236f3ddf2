//! Clap CLI definitions for the `freelance` binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
Examples:
  freelance serve --bind tcp://127.0.0.1:5555
  freelance serve --bind tcp://127.0.0.1:5556
  freelance request --connect tcp://127.0.0.1:5555 --connect tcp://127.0.0.1:5556 hello

Clients route by server identity, which defaults to the bound endpoint.
Connect to exactly the endpoint the server prints, or pass --identity.";

/// Freelance: reliable request/reply across several servers.
#[derive(Parser)]
#[command(name = "freelance", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an echo server that returns every request unchanged.
    Serve {
        /// Endpoint to listen on.
        #[arg(long, default_value = "tcp://127.0.0.1:5555")]
        bind: String,
        /// Identity announced to clients (defaults to the bound endpoint).
        #[arg(long)]
        identity: Option<String>,
    },
    /// Send one request and print the reply frames.
    Request {
        /// Server endpoint; repeat for failover, first one is preferred.
        #[arg(long = "connect", required = true)]
        connect: Vec<String>,
        /// Request frames.
        #[arg(required = true)]
        frames: Vec<String>,
    },
}
