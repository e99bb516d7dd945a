//! The dependency resolver: expands abstract dependency declarations into a
//! concrete file/target DAG.
//!
//! Starting from the user-selected targets, each target's explicit
//! dependency set is resolved to concrete paths (cheaply: generated
//! directories contribute themselves, not their contents), every path that
//! is another target's declared output becomes a graph edge, and the rest
//! become file inputs that must already exist. Cycles are detected with a
//! strongly-connected-components pass and reported with the full cycle.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::RESOLVE_PROGRESS_SECS;
use crate::graph::{BuildModel, GraphError};
use crate::location::Location;
use crate::path;
use crate::pathset::PathSetError;
use crate::props::PropertyError;
use crate::target::TargetEntry;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  PathSet(#[from] PathSetError),

  #[error(transparent)]
  Property(#[from] PropertyError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("{target}: cannot find dependency \"{dep}\" ({location})")]
  MissingDependency {
    target: String,
    dep: String,
    location: Location,
  },

  #[error(
    "{target}: dependency \"{dep}\" exists but its trailing slash disagrees with what is on disk ({location})"
  )]
  WrongDirMarker {
    target: String,
    dep: String,
    location: Location,
  },

  #[error(
    "{target}: depends on \"{dep}\" which is produced under the directory target \"{producer}\"; reference it through a generated-directory set so the producing target is built first ({location})"
  )]
  UndeclaredDirectoryDependency {
    target: String,
    dep: String,
    producer: String,
    location: Location,
  },

  #[error("cyclic dependency between targets: {}", .cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("{target}: extra dependency \"{dep}\" names no known target ({location})")]
  UnknownExtraDep {
    target: String,
    dep: String,
    location: Location,
  },
}

/// A concrete non-target input of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
  /// Absolute path, dir-marked for directories.
  pub path: String,
}

/// One target in the resolved DAG.
#[derive(Debug)]
pub struct ResolvedNode {
  pub entry: Arc<TargetEntry>,
  /// Indices of targets this one depends on.
  pub deps: Vec<usize>,
  /// Indices of targets depending on this one.
  pub rdeps: Vec<usize>,
  /// Concrete non-target inputs.
  pub file_inputs: Vec<FileInput>,
  /// Own priority pushed down from dependents: a target inherits the
  /// highest priority of anything that needs it.
  pub effective_priority: f64,
  /// True if the user selected this target (directly or via tag).
  pub selected: bool,
  /// Under `--ignore-deps`, a selected target that already exists on disk:
  /// treated as a leaf and never rebuilt.
  pub existing_leaf: bool,
}

/// The DAG closed under dependencies, in a shape the executor can schedule.
#[derive(Debug)]
pub struct ResolvedGraph {
  pub nodes: Vec<ResolvedNode>,
  pub index: BTreeMap<String, usize>,
  /// Topological order, dependencies first.
  pub order: Vec<usize>,
}

impl ResolvedGraph {
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
  /// Treat already-existing selected targets as leaves with no
  /// dependencies (`--ignore-deps`).
  pub ignore_deps: bool,
}

/// Expand the selected targets into the full dependency DAG.
pub fn resolve(
  model: &BuildModel,
  selected: &[Arc<TargetEntry>],
  options: ResolveOptions,
) -> Result<ResolvedGraph, ResolveError> {
  let started = Instant::now();
  let mut last_progress = Instant::now();

  let mut nodes: Vec<ResolvedNode> = Vec::new();
  let mut index: BTreeMap<String, usize> = BTreeMap::new();
  let mut queue: VecDeque<Arc<TargetEntry>> = VecDeque::new();
  let selected_paths: BTreeSet<&str> = selected.iter().map(|e| e.path.as_str()).collect();

  let mut sorted_selection: Vec<_> = selected.to_vec();
  sorted_sel(&mut sorted_selection);
  for entry in sorted_selection {
    queue.push_back(entry);
  }

  // edges collected as (dependent, dependency) by path
  let mut edges: Vec<(String, String)> = Vec::new();
  let mut resolved_count = 0usize;

  while let Some(entry) = queue.pop_front() {
    if index.contains_key(&entry.path) {
      continue;
    }
    let idx = nodes.len();
    index.insert(entry.path.clone(), idx);
    resolved_count += 1;

    if last_progress.elapsed().as_secs() >= RESOLVE_PROGRESS_SECS {
      info!(
        resolved = resolved_count,
        pending = queue.len(),
        "resolving dependencies"
      );
      last_progress = Instant::now();
    }

    let is_selected = selected_paths.contains(entry.path.as_str());

    // ignore-deps: an existing selected target is a leaf and never rebuilds
    if options.ignore_deps && path::to_fs(&entry.path).exists() {
      debug!(target = %entry.path, "ignore-deps: existing target treated as leaf");
      nodes.push(ResolvedNode {
        entry,
        deps: Vec::new(),
        rdeps: Vec::new(),
        file_inputs: Vec::new(),
        effective_priority: 0.0,
        selected: is_selected,
        existing_leaf: true,
      });
      continue;
    }

    let mut dep_paths = entry.imp.sources().dependency_paths(model)?;

    // extra dependencies declared by target name
    for raw in &entry.spec.extra_deps {
      let expanded = model.props.expand(raw)?;
      let dep_entry = model
        .graph
        .by_output(&expanded)
        .or_else(|| {
          let normalized = if path::is_absolute(&expanded) {
            path::normalize(&expanded)
          } else {
            entry
              .spec
              .location
              .dir()
              .map(|d| path::join_normalize(&d, &expanded))
              .unwrap_or(expanded.clone())
          };
          model.graph.by_output(&normalized)
        })
        .ok_or_else(|| ResolveError::UnknownExtraDep {
          target: entry.display_name(),
          dep: raw.clone(),
          location: entry.spec.location.clone(),
        })?;
      dep_paths.push(crate::pathset::DepPath {
        path: dep_entry.path.clone(),
        skip_existence_check: true,
      });
    }

    let mut file_inputs: Vec<FileInput> = Vec::new();
    let mut target_dep_names: Vec<String> = Vec::new();

    for dep in dep_paths {
      if dep.path == entry.path {
        continue; // a target listing itself is a no-op, not a cycle
      }
      if let Some(producer) = model.graph.by_output(&dep.path) {
        edges.push((entry.path.clone(), producer.path.clone()));
        target_dep_names.push(producer.path.clone());
        if !index.contains_key(&producer.path) {
          queue.push_back(producer.clone());
        }
        continue;
      }

      // a path under a directory target's output must come through the
      // producing target, otherwise build order would be unenforceable
      if let Some(producer) = model.graph.dir_target_enclosing(&dep.path) {
        return Err(ResolveError::UndeclaredDirectoryDependency {
          target: entry.display_name(),
          dep: dep.path,
          producer: producer.path.clone(),
          location: entry.spec.location.clone(),
        });
      }
      if model.within_output_root(&dep.path) {
        return Err(ResolveError::MissingDependency {
          target: entry.display_name(),
          dep: dep.path,
          location: entry.spec.location.clone(),
        });
      }

      if !dep.skip_existence_check {
        let meta = std::fs::metadata(path::to_fs(&dep.path));
        match meta {
          Ok(meta) => {
            if meta.is_dir() != path::is_dir_path(&dep.path) {
              return Err(ResolveError::WrongDirMarker {
                target: entry.display_name(),
                dep: dep.path,
                location: entry.spec.location.clone(),
              });
            }
          }
          Err(_) => {
            return Err(ResolveError::MissingDependency {
              target: entry.display_name(),
              dep: dep.path,
              location: entry.spec.location.clone(),
            });
          }
        }
      }
      file_inputs.push(FileInput { path: dep.path });
    }

    if target_dep_names.is_empty() {
      debug!(target = %entry.path, "no target dependencies");
    } else {
      debug!(target = %entry.path, deps = %target_dep_names.join(", "), "target dependencies resolved");
    }

    file_inputs.sort_by(|a, b| a.path.cmp(&b.path));
    file_inputs.dedup();
    let effective_priority = entry.spec.priority;
    nodes.push(ResolvedNode {
      entry,
      deps: Vec::new(),
      rdeps: Vec::new(),
      file_inputs,
      effective_priority,
      selected: is_selected,
      existing_leaf: false,
    });
  }

  // wire edges
  let mut seen_edges: BTreeSet<(usize, usize)> = BTreeSet::new();
  for (dependent, dependency) in edges {
    let (Some(&from), Some(&to)) = (index.get(&dependent), index.get(&dependency)) else {
      continue; // dependency pruned by ignore-deps leaf handling
    };
    if seen_edges.insert((from, to)) {
      nodes[from].deps.push(to);
      nodes[to].rdeps.push(from);
    }
  }

  // cycle detection over the target graph
  let mut pg: DiGraph<usize, ()> = DiGraph::new();
  let pg_nodes: Vec<NodeIndex> = (0..nodes.len()).map(|i| pg.add_node(i)).collect();
  for (idx, node) in nodes.iter().enumerate() {
    for &dep in &node.deps {
      pg.add_edge(pg_nodes[dep], pg_nodes[idx], ());
    }
  }
  for scc in tarjan_scc(&pg) {
    if scc.len() > 1 {
      let mut cycle: Vec<String> = scc.iter().map(|&n| nodes[pg[n]].entry.path.clone()).collect();
      cycle.sort();
      let first = cycle[0].clone();
      cycle.push(first);
      return Err(ResolveError::CyclicDependency { cycle });
    }
  }

  let order: Vec<usize> = petgraph::algo::toposort(&pg, None)
    .expect("cycles were rejected above")
    .into_iter()
    .map(|n| pg[n])
    .collect();

  // push priorities down: dependents first, so a high-priority target pulls
  // its whole dependency chain forward
  for &idx in order.iter().rev() {
    let inherited = nodes[idx]
      .rdeps
      .iter()
      .map(|&r| nodes[r].effective_priority)
      .fold(f64::NEG_INFINITY, f64::max);
    if inherited > nodes[idx].effective_priority {
      nodes[idx].effective_priority = inherited;
    }
  }

  info!(
    targets = nodes.len(),
    elapsed_ms = started.elapsed().as_millis() as u64,
    "dependency resolution complete"
  );

  Ok(ResolvedGraph { nodes, index, order })
}

fn sorted_sel(selection: &mut [Arc<TargetEntry>]) {
  // stable start order independent of hash maps upstream
  selection.sort_by(|a, b| a.path.cmp(&b.path));
}
