//! Command-line interface definition using clap
//!
//! Only the supervisor-facing surface is defined here. The internal
//! collector entry (`-forklog`, fixed five-element argument list) is
//! recognized in main() before clap parsing, the same way a service manager
//! entry would be.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rotating stderr log collector for supervised process trees
#[derive(Parser, Debug)]
#[command(name = "pipelog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command with its stderr captured into rotating log files
    ///
    /// Starts the collector child, points this process's standard streams at
    /// the shared pipe, then runs the command. Everything the command and its
    /// descendants write to stderr ends up in the log directory.
    Run {
        /// Directory holding pipelog.toml; relative log directories resolve
        /// against it
        #[arg(long, value_name = "DIR", default_value = ".")]
        data_dir: PathBuf,

        /// Command to run, with its arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["pipelog", "run", "--", "server", "--port", "5432"]);
        assert!(!cli.verbose);
        match cli.command {
            Command::Run { data_dir, command } => {
                assert_eq!(data_dir, PathBuf::from("."));
                assert_eq!(command, vec!["server", "--port", "5432"]);
            }
        }
    }

    #[test]
    fn test_cli_parse_data_dir() {
        let cli = Cli::parse_from(["pipelog", "run", "--data-dir", "/srv/data", "--", "true"]);
        match cli.command {
            Command::Run { data_dir, .. } => {
                assert_eq!(data_dir, PathBuf::from("/srv/data"));
            }
        }
    }

    #[test]
    fn test_cli_requires_a_command() {
        assert!(Cli::try_parse_from(["pipelog", "run"]).is_err());
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["pipelog", "-v", "run", "--", "true"]);
        assert!(cli.verbose);
    }
}
