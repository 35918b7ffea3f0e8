//! Command-line interface for the proxy.

use clap::Parser;

/// CLI arguments for the proxy.
#[derive(Parser, Debug)]
#[command(about = "Time-shifting proxy for Prometheus-compatible backends")]
pub struct CliArgs {
    /// Address to listen on (ip:port).
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Enable debug logging.
    #[arg(short, long)]
    pub debug: bool,
}

impl CliArgs {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
