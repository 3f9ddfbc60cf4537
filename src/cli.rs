//! Uses clap to define the CLI interface declaratively.
use std::path::PathBuf;

use clap::{command, Parser};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML file describing the poller and the UDP sockets to drain
    #[arg(short, default_value = "mmpoll.toml", long, value_name = "FILE")]
    pub config: PathBuf,

    /// Override the wait timeout from the config (milliseconds, negative blocks)
    #[arg(long, value_name = "MS", allow_negative_numbers = true)]
    pub timeout_ms: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["mmpoll"]);
        assert_eq!(cli.config, PathBuf::from("mmpoll.toml"));
        assert_eq!(cli.timeout_ms, None);
    }

    #[test]
    fn test_negative_timeout_override() {
        let cli = Cli::parse_from(["mmpoll", "-c", "sink.toml", "--timeout-ms", "-1"]);
        assert_eq!(cli.config, PathBuf::from("sink.toml"));
        assert_eq!(cli.timeout_ms, Some(-1));
    }
}
