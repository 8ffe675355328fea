use std::path::PathBuf;

use clap::Parser;

/// Asset discovery and reconnaissance for a set of seed hosts.
///
/// Seeds may be root domains, subdomains, or IP addresses. Output is JSON:
/// one asset per line in streaming mode, a single `{"assets": [...]}`
/// object otherwise.
#[derive(Debug, Parser)]
#[command(name = "surfmap", version, about)]
pub struct Args {
    /// Domains, subdomains or IPs to discover
    #[arg(required = true, value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Emit newline-delimited JSON, one asset per line as discovered
    #[arg(long)]
    pub stream: bool,

    /// Enable port scanning of discovered IPs (requires nmap)
    #[arg(short = 's', long)]
    pub scan: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write results to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
