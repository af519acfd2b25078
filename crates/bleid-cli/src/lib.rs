//! BLE identity CLI library
//!
//! Argument parsing, layered configuration and command handlers for the
//! `bleid` binary. Commands run the identity coordinator against an
//! in-process simulated controller, or exercise the address functions
//! directly.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod sim;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use sim::SimulatedController;
