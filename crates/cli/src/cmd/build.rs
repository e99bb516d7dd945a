//! The main build command.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use bakelua_lib::cache::CacheFile;
use bakelua_lib::context::BuildContext;
use bakelua_lib::error::BuildError;
use bakelua_lib::eval::evaluate_build_file;
use bakelua_lib::executor::{BuildMode, ExecuteConfig, execute};
use bakelua_lib::graph::BuildModel;
use bakelua_lib::lock::StateLock;
use bakelua_lib::resolver::{ResolveOptions, resolve};

use crate::output::print_report;
use crate::Cli;

pub fn cmd_build(cli: &Cli) -> Result<u8> {
  // positional arguments mix selection patterns with NAME=value overrides
  let mut patterns: Vec<String> = Vec::new();
  let mut overrides: Vec<(String, String)> = Vec::new();
  for arg in &cli.patterns {
    match arg.split_once('=') {
      Some((name, value)) if !name.contains('/') => {
        overrides.push((name.to_string(), value.to_string()));
      }
      _ => patterns.push(arg.clone()),
    }
  }

  let state = evaluate_build_file(&cli.file, overrides).map_err(BuildError::from)?;
  let model = Arc::new(state.freeze()?);

  if crate::cmd::run_query(cli, &model)? {
    return Ok(0);
  }

  let selected = model.graph.select(&patterns).map_err(BuildError::from)?;
  let resolved = resolve(
    &model,
    &selected,
    ResolveOptions {
      ignore_deps: cli.ignore_deps && !cli.rebuild && !cli.rebuild_ignore_deps,
    },
  )
  .map_err(BuildError::from)?;

  let command = std::env::args().collect::<Vec<_>>().join(" ");
  let _lock = StateLock::acquire(&model.state, &command).map_err(BuildError::from)?;

  let cache = CacheFile::load(&model.state.cache_file());

  let mode = if cli.rebuild {
    BuildMode::Rebuild
  } else if cli.rebuild_ignore_deps {
    BuildMode::RebuildSelectedOnly
  } else {
    BuildMode::Incremental
  };

  let config = ExecuteConfig {
    workers: effective_workers(cli, &model),
    keep_going: cli.keep_going,
    mode,
    ignore_deps: cli.ignore_deps,
    dry_run: cli.dry_run,
    ..ExecuteConfig::default()
  };
  debug!(
    workers = config.workers,
    parallel = cli.parallel || config.workers > 1,
    mode = ?config.mode,
    targets = resolved.len(),
    "starting execution"
  );

  let build_ctx = Arc::new(BuildContext::new(model.clone()));
  let runtime = tokio::runtime::Runtime::new()
    .map_err(|e| BuildError::from(bakelua_lib::executor::ExecuteError::Pool(e.to_string())))
    .context("failed to start the worker runtime")?;
  let (report, cache) = runtime.block_on(async {
    let cancel_ctx = build_ctx.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel_ctx.request_cancel();
      }
    });
    execute(build_ctx.clone(), &resolved, config, cache).await
  })
  .map_err(BuildError::from)?;

  // a cancelled run keeps the previous cache: its in-flight updates are not
  // trustworthy
  if !report.cancelled {
    cache.flush(&model.state.cache_file()).map_err(BuildError::from)?;
  }

  print_report(&report, cli.format);

  Ok(if report.success() {
    0
  } else if report.cancelled {
    3
  } else {
    1
  })
}

/// Worker count: `-j` wins, then the `workers` build option, then CPUs
/// scaled by `BAKELUA_WORKERS_PER_CPU` and capped by `BAKELUA_MAX_WORKERS`.
fn effective_workers(cli: &Cli, model: &BuildModel) -> usize {
  if let Some(j) = cli.workers {
    return j.max(1);
  }

  if let Ok(options) = model.options.effective(&Default::default())
    && let Ok(configured) = options.get_int("workers")
    && configured > 0
  {
    return configured as usize;
  }

  let cpus = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
  let per_cpu: f64 = std::env::var("BAKELUA_WORKERS_PER_CPU")
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(1.0);
  let mut workers = ((cpus as f64) * per_cpu).round().max(1.0) as usize;
  if let Ok(max) = std::env::var("BAKELUA_MAX_WORKERS")
    && let Ok(max) = max.parse::<usize>()
  {
    workers = workers.min(max.max(1));
  }
  workers
}
