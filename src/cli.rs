use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI entry point for the theme engine.
#[derive(Parser, Debug)]
#[command(
    name = "theme-engine",
    about = "Apply color schemes to application configs, transactionally",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file (default: $XDG_CONFIG_HOME/theme-engine/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply a color scheme to every configured target
    Apply(ApplyOpts),
    /// Validate a color scheme without applying it
    Validate(ValidateOpts),
    /// List configured targets
    List,
    /// Inspect or clear the render cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Print version information
    Version,
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ApplyOpts {
    /// Color scheme JSON file
    pub scheme: PathBuf,

    /// Apply only these targets
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Preview changes without applying
    #[arg(short = 'd', long)]
    pub dry_run: bool,

    /// Ignore cached renders and rewrite unchanged files
    #[arg(short, long)]
    pub force: bool,

    /// Apply targets one at a time (parallel is enabled by default)
    #[arg(long = "no-parallel", action = clap::ArgAction::SetFalse)]
    pub parallel: bool,

    /// Skip the pre-apply backup
    #[arg(long)]
    pub no_backup: bool,

    /// Keep going when a target fails instead of rolling everything back
    #[arg(long)]
    pub best_effort: bool,

    /// Templates in this directory take precedence over configured ones
    #[arg(long)]
    pub template_dir: Option<PathBuf>,
}

/// Options for the `validate` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ValidateOpts {
    /// Color scheme JSON file
    pub scheme: PathBuf,
}

/// Actions of the `cache` subcommand.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry count, size and on-disk location
    Stats,
    /// Remove every cached render
    Clear,
}
