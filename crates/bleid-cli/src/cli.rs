//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Disable privacy regardless of configuration
    #[arg(long)]
    pub no_privacy: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run an identity lifecycle against a simulated controller
    Demo {
        /// Number of extra identities to create
        #[arg(short, long, default_value_t = 2)]
        identities: u8,
        /// Force-detach advertising when removing identities
        #[arg(long)]
        force: bool,
    },
    /// Let the rotation timer refresh private addresses for a while
    Watch {
        /// How long to run, in seconds
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
        /// Override the rotation interval, in milliseconds
        #[arg(long)]
        rpa_timeout_ms: Option<u64>,
    },
    /// Generate a resolvable private address for a key
    Rpa {
        /// Identity resolving key (32 hex digits, most significant first)
        irk: String,
        /// Number of addresses to generate
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Check whether an address resolves with a key
    Resolve {
        /// Identity resolving key (32 hex digits, most significant first)
        irk: String,
        /// Address as written, e.g. 70:81:94:0D:FB:AA
        address: String,
    },
    /// Compute the random address hash function
    Ah {
        /// Identity resolving key (32 hex digits, most significant first)
        irk: String,
        /// 24-bit prand (6 hex digits, most significant first)
        prand: String,
    },
    /// Print the effective configuration
    Config,
}
