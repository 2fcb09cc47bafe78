// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `batchdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "batchdag",
    version,
    about = "Run a dependency graph of tasks in ordered, bounded-parallel batches.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Batchdag.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Batchdag.toml")]
    pub config: String,

    /// Task graph to run (JSON document with a `tasks` array).
    #[arg(long, value_name = "PATH", required_unless_present_any = ["resume", "status", "run_gates"])]
    pub graph: Option<String>,

    /// Continue the interrupted run stored under `--run-name`.
    #[arg(long, conflicts_with = "graph")]
    pub resume: bool,

    /// Print the checkpoint summary of every run under `[checkpoint].dir`,
    /// or only of `--run-name` when given, and exit.
    #[arg(long, conflicts_with_all = ["graph", "resume"])]
    pub status: bool,

    /// Run the configured quality gates once, whatever their policy, and
    /// exit.
    #[arg(long, conflicts_with_all = ["graph", "resume", "status"])]
    pub run_gates: bool,

    /// Run one task at a time, in batch order.
    #[arg(long)]
    pub strict_order: bool,

    /// Checkpoint name; overrides `[checkpoint].run_name`.
    #[arg(long, value_name = "NAME")]
    pub run_name: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BATCHDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config and graph, print the batch plan, but dispatch nothing.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_is_required_for_a_fresh_run() {
        assert!(CliArgs::try_parse_from(["batchdag"]).is_err());
        assert!(CliArgs::try_parse_from(["batchdag", "--resume"]).is_ok());
        assert!(CliArgs::try_parse_from(["batchdag", "--status", "--run-name", "x"]).is_ok());
        assert!(CliArgs::try_parse_from(["batchdag", "--status"]).is_ok());
        assert!(CliArgs::try_parse_from(["batchdag", "--run-gates"]).is_ok());
        assert!(CliArgs::try_parse_from(["batchdag", "--run-gates", "--status"]).is_err());
    }

    #[test]
    fn parses_run_flags() {
        let args = CliArgs::try_parse_from([
            "batchdag",
            "--graph",
            "plan.json",
            "--strict-order",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.graph.as_deref(), Some("plan.json"));
        assert!(args.strict_order);
        assert_eq!(args.config, "Batchdag.toml");
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
