//! bake: the bakelua command-line interface.
//!
//! `bake [target|tag|NAME=value]...` evaluates the build file, freezes the
//! target graph, resolves dependencies for the selection and drives the
//! worker pool. Query flags (`--search`, `--find-target`, `--target-info`)
//! stop after the freeze and report on the graph instead of building.

mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use bakelua_lib::error::ErrorCategory;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "bake")]
#[command(version, about = "Lua-scripted parallel build orchestrator")]
pub struct Cli {
  /// Targets, output paths or tags to build, plus NAME=value property
  /// overrides. Defaults to the `full` tag.
  pub patterns: Vec<String>,

  /// Root build file to evaluate
  #[arg(short = 'f', long = "file", default_value = "build.lua")]
  pub file: PathBuf,

  /// Clean the selected targets and all dependencies, then build
  #[arg(long)]
  pub rebuild: bool,

  /// Clean and rebuild only the selected targets; dependencies build only
  /// if missing
  #[arg(long = "rebuild-ignore-deps", visible_alias = "rid")]
  pub rebuild_ignore_deps: bool,

  /// Skip dependency and up-to-date checking for targets that already exist
  #[arg(long = "ignore-deps", visible_alias = "id")]
  pub ignore_deps: bool,

  /// Continue building unaffected targets after a failure
  #[arg(short = 'k', long = "keep-going")]
  pub keep_going: bool,

  /// Number of worker threads (default: one per CPU, bounded by
  /// BAKELUA_WORKERS_PER_CPU and BAKELUA_MAX_WORKERS)
  #[arg(short = 'j', long = "workers")]
  pub workers: Option<usize>,

  /// Build in parallel (the default; kept for compatibility)
  #[arg(short = 'J', long = "parallel")]
  pub parallel: bool,

  /// Resolve and report what would be built without building
  #[arg(short = 'n', long = "dry-run")]
  pub dry_run: bool,

  /// Console output format
  #[arg(short = 'F', long = "format", value_enum, default_value_t)]
  pub format: OutputFormat,

  /// List targets matching a substring or regular expression
  #[arg(long)]
  pub search: Option<String>,

  /// List targets whose name contains the given substring
  #[arg(long = "find-target")]
  pub find_target: Option<String>,

  /// Print details for targets matching the given substring
  #[arg(long = "target-info")]
  pub target_info: Option<String>,

  /// Enable debug logging
  #[arg(short, long)]
  pub verbose: bool,

  /// Log level (trace, debug, info, warn, error); takes precedence over -v
  #[arg(long = "log-level", value_name = "LEVEL")]
  pub log_level: Option<Level>,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let level = cli
    .log_level
    .unwrap_or(if cli.verbose { Level::DEBUG } else { Level::INFO });
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .init();

  match cmd::run(&cli) {
    Ok(code) => ExitCode::from(code),
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      let category = e
        .downcast_ref::<bakelua_lib::error::BuildError>()
        .map(|b| b.category())
        .unwrap_or(ErrorCategory::Configuration);
      ExitCode::from(category.exit_code() as u8)
    }
  }
}
