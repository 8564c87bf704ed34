// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments shared by `flowtk` and every program built on
/// [`crate::flow_main`].
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "flowtk",
    version,
    about = "Build, schedule and monitor flows of dependent batch jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Flow description (TOML). Optional with `--status` / `--cancel-all`.
    #[arg(value_name = "FLOWFILE")]
    pub flowfile: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWTK_LOG` or a default level will be used.
    #[arg(long = "loglevel", value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Working directory of the flow.
    #[arg(short = 'w', long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Manager file (YAML, or TOML by extension).
    ///
    /// Default: `manager.yml` in the current directory, then
    /// `~/.flowtk/manager.yml`, then a local shell manager.
    #[arg(short = 'm', long, value_name = "PATH")]
    pub manager: Option<PathBuf>,

    /// Run the flow with the scheduler until it completes or stops.
    #[arg(short = 's', long)]
    pub scheduler: bool,

    /// Submit the scheduler itself as a batch job.
    #[arg(short = 'b', long)]
    pub batch: bool,

    /// Remove the working directory before building.
    #[arg(short = 'r', long)]
    pub remove: bool,

    /// Print the dependency tree with task statuses.
    #[arg(short = 'p', long)]
    pub plot: bool,

    /// Write the dependency graph to `<workdir>/flow.dot`.
    #[arg(short = 'g', long)]
    pub graphviz: bool,

    /// Build the flow in memory and print it, without touching the disk.
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Validate every task input before doing anything else.
    #[arg(short = 'a', long)]
    pub abivalidate: bool,

    /// Work in a fresh temporary directory.
    #[arg(short = 't', long)]
    pub tempdir: bool,

    /// Report how long the execute phase took.
    #[arg(long)]
    pub prof: bool,

    /// Run a single launch cycle (submit ready tasks, poll once) and exit.
    #[arg(short = 'l', long)]
    pub launch: bool,

    /// Print the status of a persisted flow and exit.
    #[arg(long)]
    pub status: bool,

    /// Cancel every queued or running job of a persisted flow.
    #[arg(long)]
    pub cancel_all: bool,
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

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_map_to_fields() {
        let args = CliArgs::parse_from([
            "flowtk", "flow.toml", "-w", "out", "-m", "m.yml", "-s", "-r", "-g", "--loglevel", "debug",
        ]);
        assert_eq!(args.flowfile, Some(PathBuf::from("flow.toml")));
        assert_eq!(args.workdir, Some(PathBuf::from("out")));
        assert_eq!(args.manager, Some(PathBuf::from("m.yml")));
        assert!(args.scheduler && args.remove && args.graphviz);
        assert!(!args.batch && !args.dry_run);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }

    #[test]
    fn flowfile_is_optional_for_status() {
        let args = CliArgs::parse_from(["flowtk", "--status", "-w", "flow_x"]);
        assert!(args.status);
        assert!(args.flowfile.is_none());
    }
}
