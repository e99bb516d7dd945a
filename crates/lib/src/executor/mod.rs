//! The parallel executor: a fixed worker pool driving targets through clean
//! and build phases.
//!
//! Scheduling is ready-queue based: a target becomes runnable once every
//! predecessor has succeeded or been skipped, runnable targets are ordered
//! by (effective priority desc, insertion order asc), and a dispatcher
//! hands them to blocking workers up to the configured pool size. The first
//! failure (without `keep_going`) flips a shutting-down flag: nothing new
//! dispatches, in-flight targets finish, the run reports failure.
//!
//! Workers own the whole per-target pipeline: the up-to-date decision
//! against the cache, retries with exponential backoff, buffered logging,
//! stamp-file maintenance for directory targets, and submission of the
//! fresh cache record on success.

pub mod logbuffer;

use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheError, CacheFile, CacheRecord, CacheUpdate, Probe, RebuildReason, UpToDate};
use crate::consts::CANCEL_GRACE_SECS;
use crate::context::{Artifact, BuildContext, TargetContext};
use crate::error::ErrorCategory;
use crate::path;
use crate::props::{OptionMap, PropertyError};
use crate::resolver::ResolvedGraph;
use crate::target::{TargetEntry, TargetError};
use self::logbuffer::{LogLevel, LogSink, TargetLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
  /// Build what is out of date.
  Incremental,
  /// Clean the whole closure (reverse dependency order), then build it.
  Rebuild,
  /// Clean and rebuild exactly the selected targets; dependencies build
  /// only if missing.
  RebuildSelectedOnly,
}

#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  pub workers: usize,
  pub keep_going: bool,
  pub mode: BuildMode,
  /// Selected targets that already exist were resolved as leaves; anything
  /// else builds only when its output is missing.
  pub ignore_deps: bool,
  pub dry_run: bool,
  /// How long cancelled in-flight targets get before the run gives up on
  /// them.
  pub grace: Duration,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      workers: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
      keep_going: false,
      mode: BuildMode::Incremental,
      ignore_deps: false,
      dry_run: false,
      grace: Duration::from_secs(CANCEL_GRACE_SECS),
    }
  }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("build cancelled")]
  Cancelled,

  #[error(transparent)]
  Property(#[from] PropertyError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("worker pool failure: {0}")]
  Pool(String),
}

impl ExecuteError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      ExecuteError::Cancelled => ErrorCategory::Cancelled,
      ExecuteError::Property(_) => ErrorCategory::Configuration,
      ExecuteError::Cache(_) | ExecuteError::Pool(_) => ErrorCategory::Fatal,
    }
  }
}

/// What happened this run, target by target.
#[derive(Debug, Default)]
pub struct RunReport {
  pub built: Vec<String>,
  pub up_to_date: Vec<String>,
  /// (target, error message)
  pub failed: Vec<(String, String)>,
  /// (target, reason): dependency failed or run aborted
  pub skipped: Vec<(String, String)>,
  /// dry-run only: (target, rebuild reason)
  pub would_build: Vec<(String, String)>,
  pub cancelled: bool,
  pub artifacts: Vec<Artifact>,
  pub elapsed: Duration,
}

impl RunReport {
  pub fn success(&self) -> bool {
    self.failed.is_empty() && !self.cancelled
  }

  pub fn total(&self) -> usize {
    self.built.len() + self.up_to_date.len() + self.failed.len() + self.skipped.len() + self.would_build.len()
  }
}

/// Execute the resolved graph. Returns the report plus the cache to flush.
pub async fn execute(
  build_ctx: Arc<BuildContext>,
  resolved: &ResolvedGraph,
  config: ExecuteConfig,
  cache: CacheFile,
) -> Result<(RunReport, CacheFile), ExecuteError> {
  let started = Instant::now();
  let records: Arc<std::collections::BTreeMap<String, CacheRecord>> = Arc::new(cache.records.clone());
  let (cache_tx, cache_join) = cache::spawn_writer(cache);
  let (sink, sink_join) = LogSink::spawn();

  let items = prepare_items(&build_ctx, resolved, &config)?;

  let mut states: Vec<NodeState> = vec![NodeState::Pending; items.len()];

  // clean pass(es) for the rebuild modes
  if !config.dry_run {
    match config.mode {
      BuildMode::Rebuild => {
        let mut runner = PhaseRunner::new(Phase::Clean, &items, resolved, &config, &build_ctx, &cache_tx, &sink);
        runner.participants = vec![true; items.len()];
        runner.run(&mut states).await?;
        // cleaned targets start the build pass fresh unless their clean
        // failed
        for state in states.iter_mut() {
          if !matches!(state, NodeState::Done(DoneKind::Failed)) {
            *state = NodeState::Pending;
          }
        }
      }
      BuildMode::RebuildSelectedOnly => {
        let mut runner = PhaseRunner::new(Phase::Clean, &items, resolved, &config, &build_ctx, &cache_tx, &sink);
        runner.participants = items.iter().map(|i| i.selected).collect();
        runner.run(&mut states).await?;
        for state in states.iter_mut() {
          if !matches!(state, NodeState::Done(DoneKind::Failed)) {
            *state = NodeState::Pending;
          }
        }
      }
      BuildMode::Incremental => {}
    }
  }

  let clean_failed = states.iter().any(|s| matches!(s, NodeState::Done(DoneKind::Failed)));
  if clean_failed && !config.keep_going {
    warn!("clean phase failed, not starting the build phase");
  } else {
    let mut runner = PhaseRunner::new(Phase::Build, &items, resolved, &config, &build_ctx, &cache_tx, &sink);
    runner.records = Some(records);
    runner.participants = vec![true; items.len()];
    runner.run(&mut states).await?;
  }

  // collect
  let mut report = RunReport {
    cancelled: build_ctx.is_cancelled(),
    ..RunReport::default()
  };
  for (idx, state) in states.iter().enumerate() {
    let name = items[idx].entry.path.clone();
    match state {
      NodeState::Done(DoneKind::Built) => report.built.push(name),
      NodeState::Done(DoneKind::UpToDate) => report.up_to_date.push(name),
      NodeState::Done(DoneKind::WouldBuild(reason)) => report.would_build.push((name, reason.clone())),
      NodeState::Done(DoneKind::Failed) => {} // recorded below with message
      NodeState::Done(DoneKind::Skipped(dep)) => report.skipped.push((name, dep.clone())),
      NodeState::Pending | NodeState::Running => {
        report.skipped.push((name, "run aborted".to_string()));
      }
    }
  }
  report.failed = runner_failures(&states, &items);

  drop(cache_tx);
  drop(sink);
  // abandoned blocking workers may still hold channel handles after a
  // grace-period expiry; a cancelled run must not hang on them
  let cache = if build_ctx.is_cancelled() {
    match tokio::time::timeout(config.grace, cache_join).await {
      Ok(joined) => joined.map_err(|e| ExecuteError::Pool(e.to_string()))?,
      Err(_) => {
        warn!("cache writer still busy at shutdown, discarding in-flight updates");
        CacheFile::default()
      }
    }
  } else {
    cache_join.await.map_err(|e| ExecuteError::Pool(e.to_string()))?
  };
  if build_ctx.is_cancelled() {
    sink_join.abort();
  } else {
    let _ = sink_join.await;
  }

  report.artifacts = build_ctx.artifacts();
  report.elapsed = started.elapsed();

  info!(
    built = report.built.len(),
    up_to_date = report.up_to_date.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    elapsed_secs = report.elapsed.as_secs_f64(),
    "execution complete"
  );

  Ok((report, cache))
}

fn runner_failures(states: &[NodeState], items: &[Arc<WorkItem>]) -> Vec<(String, String)> {
  states
    .iter()
    .enumerate()
    .filter_map(|(idx, s)| match s {
      NodeState::Done(DoneKind::Failed) => Some((items[idx].entry.path.clone(), items[idx].failure_message())),
      _ => None,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Work items

struct WorkItem {
  entry: Arc<TargetEntry>,
  options: OptionMap,
  /// Sorted absolute inputs: file inputs plus target-dependency anchors
  /// (directory targets contribute their stamp file, not the directory).
  input_paths: Vec<String>,
  output_anchor: std::path::PathBuf,
  stamp: std::path::PathBuf,
  effective_priority: f64,
  selected: bool,
  existing_leaf: bool,
  failure: std::sync::Mutex<String>,
}

impl WorkItem {
  fn record_failure(&self, message: String) {
    *self.failure.lock().unwrap() = message;
  }

  fn failure_message(&self) -> String {
    self.failure.lock().unwrap().clone()
  }
}

fn prepare_items(
  build_ctx: &BuildContext,
  resolved: &ResolvedGraph,
  _config: &ExecuteConfig,
) -> Result<Vec<Arc<WorkItem>>, ExecuteError> {
  let model = &build_ctx.model;
  let mut items = Vec::with_capacity(resolved.nodes.len());
  for node in &resolved.nodes {
    let options = model.effective_options(&node.entry)?;

    let mut input_paths: Vec<String> = Vec::with_capacity(node.file_inputs.len() + node.deps.len());
    for input in &node.file_inputs {
      input_paths.push(input.path.clone());
    }
    for &dep in &node.deps {
      let dep_entry = &resolved.nodes[dep].entry;
      if dep_entry.is_dir_target() {
        // directory mtimes are unreliable; the producer's stamp file is the
        // anchor
        input_paths.push(path::from_fs(&model.state.stamp_file(&dep_entry.path), false));
      } else {
        input_paths.push(dep_entry.path.clone());
      }
    }
    input_paths.sort();
    input_paths.dedup();

    let is_dir = node.entry.is_dir_target();
    let stamp = model.state.stamp_file(&node.entry.path);
    let output_anchor = if is_dir {
      stamp.clone()
    } else {
      path::to_fs(&node.entry.path)
    };

    items.push(Arc::new(WorkItem {
      entry: node.entry.clone(),
      options,
      input_paths,
      output_anchor,
      stamp,
      effective_priority: node.effective_priority,
      selected: node.selected,
      existing_leaf: node.existing_leaf,
      failure: std::sync::Mutex::new(String::new()),
    }));
  }
  Ok(items)
}

// ---------------------------------------------------------------------------
// Phase scheduling

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Clean,
  Build,
}

#[derive(Debug, Clone)]
enum NodeState {
  Pending,
  Running,
  Done(DoneKind),
}

#[derive(Debug, Clone)]
enum DoneKind {
  Built,
  UpToDate,
  WouldBuild(String),
  Failed,
  Skipped(String),
}

#[derive(Debug)]
enum Outcome {
  Built,
  UpToDate,
  WouldBuild(String),
  Failed { message: String, cancelled: bool },
}

/// Priority-queue entry: higher priority first, then insertion order.
struct Ready {
  priority: f64,
  seq: u64,
  idx: usize,
}

impl PartialEq for Ready {
  fn eq(&self, other: &Self) -> bool {
    self.seq == other.seq
  }
}
impl Eq for Ready {}
impl PartialOrd for Ready {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}
impl Ord for Ready {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self
      .priority
      .total_cmp(&other.priority)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

struct PhaseRunner<'a> {
  phase: Phase,
  items: &'a [Arc<WorkItem>],
  resolved: &'a ResolvedGraph,
  config: &'a ExecuteConfig,
  build_ctx: &'a Arc<BuildContext>,
  cache_tx: &'a mpsc::UnboundedSender<CacheUpdate>,
  sink: &'a LogSink,
  records: Option<Arc<std::collections::BTreeMap<String, CacheRecord>>>,
  participants: Vec<bool>,
}

impl<'a> PhaseRunner<'a> {
  fn new(
    phase: Phase,
    items: &'a [Arc<WorkItem>],
    resolved: &'a ResolvedGraph,
    config: &'a ExecuteConfig,
    build_ctx: &'a Arc<BuildContext>,
    cache_tx: &'a mpsc::UnboundedSender<CacheUpdate>,
    sink: &'a LogSink,
  ) -> Self {
    Self {
      phase,
      items,
      resolved,
      config,
      build_ctx,
      cache_tx,
      sink,
      records: None,
      participants: Vec::new(),
    }
  }

  fn preds(&self, idx: usize) -> &[usize] {
    match self.phase {
      Phase::Build => &self.resolved.nodes[idx].deps,
      Phase::Clean => &self.resolved.nodes[idx].rdeps,
    }
  }

  fn succs(&self, idx: usize) -> &[usize] {
    match self.phase {
      Phase::Build => &self.resolved.nodes[idx].rdeps,
      Phase::Clean => &self.resolved.nodes[idx].deps,
    }
  }

  async fn run(&mut self, states: &mut Vec<NodeState>) -> Result<(), ExecuteError> {
    let n = self.items.len();
    let total: usize = self.participants.iter().filter(|&&p| p).count();
    if total == 0 {
      return Ok(());
    }

    let mut pending: Vec<usize> = vec![0; n];
    let mut heap: BinaryHeap<Ready> = BinaryHeap::new();
    let mut seq: u64 = 0;

    for idx in 0..n {
      if !self.participants[idx] {
        continue;
      }
      // pre-failed nodes (clean-phase casualties) keep their state
      if matches!(states[idx], NodeState::Done(_)) {
        continue;
      }
      pending[idx] = self.preds(idx).iter().filter(|&&p| self.participants[p]).count();
      if pending[idx] == 0 {
        heap.push(Ready {
          priority: self.items[idx].effective_priority,
          seq,
          idx,
        });
        seq += 1;
      }
    }

    let mut join_set: JoinSet<(usize, Outcome)> = JoinSet::new();
    let mut running = 0usize;
    let mut done_count = 0usize;
    let mut shutting_down = false;
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut dispatched = 0usize;

    // nodes that failed before this phase began (clean-phase casualties)
    // cascade into their successors now
    for idx in 0..n {
      if self.participants[idx] && matches!(states[idx], NodeState::Done(DoneKind::Failed)) {
        done_count += 1;
        done_count += self.settle(states, idx, DoneKind::Failed, &mut pending, &mut heap, &mut seq);
      }
    }

    loop {
      if self.build_ctx.is_cancelled() && cancel_deadline.is_none() {
        warn!("cancellation requested, waiting for in-flight targets");
        shutting_down = true;
        cancel_deadline = Some(tokio::time::Instant::now() + self.config.grace);
      }

      if !shutting_down {
        while running < self.config.workers {
          let Some(ready) = heap.pop() else { break };
          let idx = ready.idx;
          // a predecessor may have failed after this node was queued
          if let Some(reason) = self.blocked_reason(states, idx) {
            done_count += 1 + self.settle(states, idx, DoneKind::Skipped(reason), &mut pending, &mut heap, &mut seq);
            continue;
          }
          states[idx] = NodeState::Running;
          running += 1;
          dispatched += 1;
          let banner_prefix = format!("{dispatched}/{total}");

          let item = self.items[idx].clone();
          let build_ctx = self.build_ctx.clone();
          let cache_tx = self.cache_tx.clone();
          let sink = self.sink.clone();
          let config = self.config.clone();
          let records = self.records.clone();
          let phase = self.phase;
          join_set.spawn(async move {
            let result = tokio::task::spawn_blocking(move || match phase {
              Phase::Clean => run_clean_worker(&item, &build_ctx, &cache_tx, &sink, &banner_prefix),
              Phase::Build => {
                let record = records.as_ref().and_then(|r| r.get(&item.entry.path));
                run_build_worker(&item, &build_ctx, record, &cache_tx, &sink, &config, &banner_prefix)
              }
            })
            .await;
            let outcome = result.unwrap_or_else(|e| Outcome::Failed {
              message: format!("worker panicked: {e}"),
              cancelled: false,
            });
            (idx, outcome)
          });
        }
      }

      if join_set.is_empty() {
        break;
      }

      let completed = if let Some(deadline) = cancel_deadline {
        let timed = tokio::time::timeout_at(deadline, join_set.join_next()).await;
        match timed {
          Ok(completed) => completed,
          Err(_) => {
            warn!("grace period expired, abandoning in-flight targets");
            join_set.abort_all();
            for idx in 0..n {
              if matches!(states[idx], NodeState::Running) {
                self.items[idx].record_failure("cancelled: did not stop within the grace period".into());
                states[idx] = NodeState::Done(DoneKind::Failed);
              }
            }
            break;
          }
        }
      } else {
        tokio::select! {
          completed = join_set.join_next() => completed,
          _ = self.build_ctx.cancelled_wait() => continue,
        }
      };

      let Some(completed) = completed else { break };
      let (idx, outcome) = completed.map_err(|e| ExecuteError::Pool(e.to_string()))?;
      running -= 1;
      done_count += 1;

      let kind = match outcome {
        Outcome::Built => DoneKind::Built,
        Outcome::UpToDate => DoneKind::UpToDate,
        Outcome::WouldBuild(reason) => DoneKind::WouldBuild(reason),
        Outcome::Failed { message, cancelled } => {
          self.items[idx].record_failure(message);
          if cancelled {
            shutting_down = true;
            if cancel_deadline.is_none() {
              cancel_deadline = Some(tokio::time::Instant::now() + self.config.grace);
            }
          } else if !self.config.keep_going {
            shutting_down = true;
          }
          DoneKind::Failed
        }
      };
      done_count += self.settle(states, idx, kind, &mut pending, &mut heap, &mut seq);
    }

    debug!(phase = ?self.phase, settled = done_count, total, "phase finished");
    Ok(())
  }

  /// Why `idx` cannot run: the first failed or skipped predecessor.
  fn blocked_reason(&self, states: &[NodeState], idx: usize) -> Option<String> {
    for &p in self.preds(idx) {
      if !self.participants[p] {
        continue;
      }
      match &states[p] {
        NodeState::Done(DoneKind::Failed) => return Some(self.items[p].entry.path.clone()),
        NodeState::Done(DoneKind::Skipped(_)) => return Some(self.items[p].entry.path.clone()),
        _ => {}
      }
    }
    None
  }

  /// Mark `idx` done with `kind` and unblock successors; skipped/failed
  /// states cascade so every reachable node settles. Returns the number of
  /// additional nodes settled.
  fn settle(
    &self,
    states: &mut [NodeState],
    idx: usize,
    kind: DoneKind,
    pending: &mut [usize],
    heap: &mut BinaryHeap<Ready>,
    seq: &mut u64,
  ) -> usize {
    states[idx] = NodeState::Done(kind);
    let mut extra = 0;
    let mut queue = vec![idx];
    while let Some(at) = queue.pop() {
      for &succ in self.succs(at) {
        if !self.participants[succ] || !matches!(states[succ], NodeState::Pending) {
          continue;
        }
        pending[succ] = pending[succ].saturating_sub(1);
        if pending[succ] == 0 {
          if let Some(reason) = self.blocked_reason(states, succ) {
            warn!(target = %self.items[succ].entry.path, dep = %reason, "skipping target, dependency failed");
            states[succ] = NodeState::Done(DoneKind::Skipped(reason));
            extra += 1;
            queue.push(succ);
          } else {
            heap.push(Ready {
              priority: self.items[succ].effective_priority,
              seq: *seq,
              idx: succ,
            });
            *seq += 1;
          }
        }
      }
    }
    extra
  }
}

// ---------------------------------------------------------------------------
// Workers (blocking)

fn option_int(options: &OptionMap, name: &str, default: i64) -> i64 {
  options.get_int(name).unwrap_or(default)
}

fn option_bool(options: &OptionMap, name: &str, default: bool) -> bool {
  options.get_bool(name).unwrap_or(default)
}

fn run_clean_worker(
  item: &WorkItem,
  build_ctx: &BuildContext,
  cache_tx: &mpsc::UnboundedSender<CacheUpdate>,
  sink: &LogSink,
  banner_prefix: &str,
) -> Outcome {
  let log = TargetLog::new(sink.clone(), item.entry.display_name());
  log.banner(&format!("{banner_prefix} Cleaning"));
  let started = Instant::now();

  let ctx = TargetContext::new(build_ctx, &item.entry, &item.options, &log);
  let _ = cache_tx.send(CacheUpdate::Remove {
    target: item.entry.path.clone(),
  });
  match item.entry.imp.clean(&ctx) {
    Ok(()) => {
      log.finish(LogLevel::Info, &format!("cleaned in {:.1} seconds", started.elapsed().as_secs_f64()));
      Outcome::Built
    }
    Err(e) => {
      log.error(format!("clean FAILED: {e}"));
      log.finish(LogLevel::Error, "clean FAILED");
      Outcome::Failed {
        message: format!("clean failed: {e}"),
        cancelled: e.is_cancelled(),
      }
    }
  }
}

fn run_build_worker(
  item: &WorkItem,
  build_ctx: &BuildContext,
  record: Option<&CacheRecord>,
  cache_tx: &mpsc::UnboundedSender<CacheUpdate>,
  sink: &LogSink,
  config: &ExecuteConfig,
  banner_prefix: &str,
) -> Outcome {
  let log = TargetLog::new(sink.clone(), item.entry.display_name());
  let ctx = TargetContext::new(build_ctx, &item.entry, &item.options, &log);

  // implicit inputs are safe to gather here: every dependency has already
  // been built (or skipped) by the time a target reaches a worker
  let options_hash = match options_hash(item, &ctx) {
    Ok(hash) => hash,
    Err(e) => {
      log.error(format!("FAILED computing implicit inputs: {e}"));
      log.finish(LogLevel::Error, "FAILED");
      return Outcome::Failed {
        message: format!("implicit input computation failed: {e}"),
        cancelled: e.is_cancelled(),
      };
    }
  };

  // decision first; an up-to-date target never banners
  let reason = match decide(item, record, config, &options_hash) {
    Ok(UpToDate::Yes { refreshed }) => {
      if let Some(refreshed) = refreshed {
        let _ = cache_tx.send(CacheUpdate::Record {
          target: item.entry.path.clone(),
          record: refreshed,
        });
      }
      log_up_to_date(&item.entry.path);
      return Outcome::UpToDate;
    }
    Ok(UpToDate::No(reason)) => reason,
    Err(e) => {
      return Outcome::Failed {
        message: format!("up-to-date check failed: {e}"),
        cancelled: false,
      };
    }
  };

  if config.dry_run {
    return Outcome::WouldBuild(reason.to_string());
  }

  log.banner(&format!("{banner_prefix} Building"));
  info_reason(item, &reason);
  let started = Instant::now();

  // dirty until proven built: drop the record and the stamp up front so a
  // crash mid-build forces a rebuild next run
  let _ = cache_tx.send(CacheUpdate::Remove {
    target: item.entry.path.clone(),
  });
  let _ = std::fs::remove_file(&item.stamp);

  if option_bool(&item.options, "cleanBeforeBuild", false)
    && let Err(e) = item.entry.imp.clean(&ctx)
  {
    log.warn(format!("pre-build clean failed: {e}"));
  }

  let retries = option_int(&item.options, "failureRetries", 0).max(0) as u32;
  let mut backoff = Duration::from_millis(option_int(&item.options, "retryBackoffMillis", 15_000).max(1) as u64);
  let mut attempt: u32 = 0;
  let mut transient_used = false;

  loop {
    if build_ctx.is_cancelled() {
      log.finish(LogLevel::Error, "cancelled");
      return Outcome::Failed {
        message: "cancelled".into(),
        cancelled: true,
      };
    }

    match run_once(item, &ctx) {
      Ok(()) => {
        if attempt > 0 {
          log.warn(format!("succeeded on retry #{attempt}"));
        }
        break;
      }
      Err(e) if e.is_cancelled() => {
        log.finish(LogLevel::Error, "cancelled");
        return Outcome::Failed {
          message: "cancelled".into(),
          cancelled: true,
        };
      }
      Err(e) => {
        let transient_retry = e.is_transient() && !transient_used;
        if attempt >= retries && !transient_retry {
          log.error(format!("FAILED: {e}"));
          log.finish(
            LogLevel::Error,
            &format!("FAILED in {:.1} seconds", started.elapsed().as_secs_f64()),
          );
          return Outcome::Failed {
            message: e.to_string(),
            cancelled: false,
          };
        }
        if attempt >= retries {
          transient_used = true;
        }
        attempt += 1;
        // keep severity-scanning CI quiet: the failed attempt's errors are
        // superseded by the retry
        log.demote_errors();
        log.warn(format!(
          "attempt #{attempt} failed ({e}), retrying after {} ms",
          backoff.as_millis()
        ));
        let work_dir = build_ctx.model.state.work_dir(&item.entry.path);
        let _ = std::fs::remove_dir_all(&work_dir);
        std::thread::sleep(backoff);
        backoff = backoff.saturating_mul(2);
      }
    }
  }

  // record what was consumed, at the moment of success
  match cache::capture_record(item.entry.imp.kind(), &options_hash, &item.input_paths) {
    Ok(record) => {
      let _ = cache_tx.send(CacheUpdate::Record {
        target: item.entry.path.clone(),
        record,
      });
    }
    Err(e) => {
      // the build itself succeeded; a cache miss next run is the only cost
      log.warn(format!("could not record cache entry: {e}"));
    }
  }

  log.finish(
    LogLevel::Info,
    &format!("done in {:.1} seconds", started.elapsed().as_secs_f64()),
  );
  Outcome::Built
}

fn info_reason(item: &WorkItem, reason: &RebuildReason) {
  debug!(target = %item.entry.path, reason = %reason, "rebuild required");
}

/// The first few up-to-date decisions are interesting; after that they are
/// noise.
fn log_up_to_date(target: &str) {
  use std::sync::atomic::{AtomicUsize, Ordering};
  static LOGGED: AtomicUsize = AtomicUsize::new(0);
  if LOGGED.fetch_add(1, Ordering::Relaxed) < 5 {
    info!(target = %target, "target is already up to date");
  } else {
    debug!(target = %target, "target is already up to date");
  }
}

/// One build attempt: run, verify the declared output exists, refresh the
/// stamp for directory targets.
fn run_once(item: &WorkItem, ctx: &TargetContext<'_>) -> Result<(), TargetError> {
  if let Some(parent) = path::to_fs(&item.entry.path).parent() {
    std::fs::create_dir_all(parent)?;
  }

  item.entry.imp.run(ctx)?;

  let output = path::to_fs(&item.entry.path);
  if !output.exists() {
    return Err(TargetError::Message(format!(
      "target completed without producing its declared output {}",
      item.entry.path
    )));
  }

  if item.entry.is_dir_target() {
    if let Some(parent) = item.stamp.parent() {
      std::fs::create_dir_all(parent)?;
    }
    // unique content per build, so dependents see a content change as well
    // as the fresh mtime
    let token = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap_or_default()
      .as_nanos();
    std::fs::write(&item.stamp, format!("{token}\n"))?;
  }
  Ok(())
}

fn options_hash(item: &WorkItem, ctx: &TargetContext<'_>) -> Result<String, TargetError> {
  Ok(cache::hash_lines(&hash_input_lines(item, ctx)?))
}

fn hash_input_lines(item: &WorkItem, ctx: &TargetContext<'_>) -> Result<Vec<String>, TargetError> {
  let mut lines: Vec<String> = item
    .entry
    .imp
    .significant_options()
    .iter()
    .map(|name| {
      let value = item.options.get(name).map(|v| v.to_string()).unwrap_or_default();
      format!("option {name}={value}")
    })
    .collect();
  for extra in item.entry.imp.implicit_inputs(ctx)? {
    lines.push(format!("implicit {}", extra.replace('\r', "\\r").replace('\n', "\\n")));
  }
  Ok(lines)
}

fn decide(
  item: &WorkItem,
  record: Option<&CacheRecord>,
  config: &ExecuteConfig,
  options_hash: &str,
) -> std::io::Result<UpToDate> {
  if item.existing_leaf {
    return Ok(UpToDate::Yes { refreshed: None });
  }
  let forced = match config.mode {
    BuildMode::Rebuild => true,
    BuildMode::RebuildSelectedOnly => item.selected,
    BuildMode::Incremental => false,
  };
  if forced {
    return Ok(UpToDate::No(RebuildReason::Forced));
  }
  // dependencies under --rebuild-ignore-deps / --ignore-deps: existence only
  if config.mode == BuildMode::RebuildSelectedOnly || config.ignore_deps {
    return if path::to_fs(&item.entry.path).exists() {
      Ok(UpToDate::Yes { refreshed: None })
    } else {
      Ok(UpToDate::No(RebuildReason::OutputMissing))
    };
  }

  // a directory target whose directory is gone must rebuild even if its
  // stamp survived
  if !path::to_fs(&item.entry.path).exists() {
    return Ok(UpToDate::No(RebuildReason::OutputMissing));
  }

  let probe = Probe {
    kind: item.entry.imp.kind(),
    options_hash,
    input_paths: &item.input_paths,
    output_anchor: &item.output_anchor,
  };
  cache::check_up_to_date(record, &probe)
}
