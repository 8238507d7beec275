//! CLI definitions for chainprobe.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "chainprobe",
    version,
    about = "Blockchain RPC provider latency prober\n\nEach invocation runs one bounded batch of probes against every configured provider of a chain and pushes the results as line protocol.",
    long_about = None
)]
pub struct Cli {
    /// Path to probe.toml config file (optional; defaults apply when absent)
    #[clap(long, short, default_value = "probe.toml")]
    pub config: PathBuf,

    /// Read the provider document from this file instead of $ENDPOINTS
    #[clap(long, env = "ENDPOINTS_FILE")]
    pub endpoints: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe every provider of one chain and push the results
    Collect {
        /// Chain name (ethereum, base, arbitrum, bnb, monad, hyperliquid, solana, ton)
        chain: String,
    },

    /// Send and time one Solana memo transaction per provider endpoint
    Land,

    /// Refresh the shared reference-state document from live nodes
    UpdateState,

    /// Serve the HTTP trigger routes
    Serve {
        /// Address to listen on
        #[clap(long, default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },

    /// Print an example probe.toml to stdout
    Init,
}
