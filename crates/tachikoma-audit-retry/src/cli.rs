//! Command-line arguments.

use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

/// Replays dead-lettered audit events into the audit store.
#[derive(Debug, Parser)]
#[command(name = "tachikoma-audit-retry", version, about, propagate_version = true)]
pub struct Cli {
    /// Explicit configuration file (otherwise `.tachikoma/audit-delivery.yaml`)
    #[arg(
        short,
        long,
        global = true,
        env = "TACHIKOMA_CONFIG_PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    /// Project directory that relative paths are resolved against
    #[arg(long, global = true, default_value = ".", value_hint = ValueHint::DirPath)]
    pub project_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the retry worker
    Run(RunArgs),

    /// List the most recent dead letters
    DeadLetters(DeadLettersArgs),

    /// Show queue depth and dead-letter count
    Stats,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Consumer group (overrides worker.consumer_group)
    #[arg(long)]
    pub group: Option<String>,

    /// Consumer name within the group (overrides worker.consumer_name)
    #[arg(long)]
    pub consumer: Option<String>,

    /// Process a single batch and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct DeadLettersArgs {
    /// Maximum records to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::parse_from([
            "tachikoma-audit-retry",
            "--project-dir",
            "/srv/app",
            "run",
            "--group",
            "replay",
            "--consumer",
            "replica-2",
            "--once",
        ]);

        assert_eq!(cli.project_dir, PathBuf::from("/srv/app"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.group.as_deref(), Some("replay"));
                assert_eq!(args.consumer.as_deref(), Some("replica-2"));
                assert!(args.once);
            }
            other => panic!("Expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_dead_letters_defaults() {
        let cli = Cli::parse_from(["tachikoma-audit-retry", "dead-letters", "--json"]);
        match cli.command {
            Command::DeadLetters(args) => {
                assert_eq!(args.limit, 20);
                assert!(args.json);
            }
            other => panic!("Expected dead-letters, got {:?}", other),
        }
    }
}
