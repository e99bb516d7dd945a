//! The target graph: registration, freeze-time validation, tags and
//! selection.
//!
//! Targets are registered while build files are parsed and frozen exactly
//! once at end-of-parse. Freezing resolves every target name to an absolute
//! output path and validates the global output-isolation rules: no duplicate
//! outputs (case-insensitive), no output nested beneath another target's
//! output, and no target writing straight into a registered output root.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::consts::{ALL_TAG, FULL_BUILD_TAG};
use crate::location::Location;
use crate::path;
use crate::pathset::PathResolver;
use crate::props::{OptionMap, OptionStore, PropertyError, PropertyStore};
use crate::state::StatePaths;
use crate::target::{PendingTarget, TargetEntry};

/// Characters never allowed in a target's output path, on every OS, so a
/// build file that works on unix cannot quietly break on windows.
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("{location}: illegal target path \"{name}\": {message}")]
  IllegalTargetName {
    name: String,
    message: String,
    location: Location,
  },

  #[error("{second}: duplicate target output path \"{path}\" (first declared at {first})")]
  DuplicateTargetPath {
    path: String,
    first: Location,
    second: Location,
  },

  #[error(
    "{location}: targets may not write output inside another target's output: \"{inner}\" lies beneath \"{outer}\""
  )]
  NestedOutputs {
    outer: String,
    inner: String,
    location: Location,
  },

  #[error("{location}: target \"{path}\" writes directly to a registered output root; use a dedicated directory")]
  OutputIsOutputRoot { path: String, location: Location },

  #[error("unknown target or tag \"{pattern}\"{}", format_suggestions(.suggestions))]
  UnknownSelector {
    pattern: String,
    suggestions: Vec<String>,
  },

  #[error("pattern \"{pattern}\" matches more than one target: {}", .matches.join(", "))]
  AmbiguousSelector { pattern: String, matches: Vec<String> },

  #[error(transparent)]
  Property(#[from] PropertyError),
}

fn format_suggestions(suggestions: &[String]) -> String {
  if suggestions.is_empty() {
    String::new()
  } else {
    format!(" (closest matches: {})", suggestions.join(", "))
  }
}

/// Case-insensitive literal containment over a target's path, raw name and
/// tags. `needle` must already be lowercased.
fn contains_substring(entry: &TargetEntry, needle: &str) -> bool {
  entry.path.to_lowercase().contains(needle)
    || entry.spec.name.to_lowercase().contains(needle)
    || entry.spec.tags.iter().any(|t| t.to_lowercase().contains(needle))
}

/// The frozen registry of targets.
#[derive(Debug)]
pub struct TargetGraph {
  entries: Vec<Arc<TargetEntry>>,
  by_path: BTreeMap<String, usize>,
  by_name: BTreeMap<String, usize>,
  tags: BTreeMap<String, Vec<usize>>,
}

impl TargetGraph {
  /// Resolve names and validate the registered targets. Called exactly once
  /// at end-of-parse.
  pub fn freeze(pending: Vec<PendingTarget>, props: &PropertyStore) -> Result<Self, GraphError> {
    let mut entries: Vec<Arc<TargetEntry>> = Vec::with_capacity(pending.len());
    let mut by_path = BTreeMap::new();
    let mut by_name = BTreeMap::new();
    let mut lower_paths: BTreeMap<String, usize> = BTreeMap::new();

    for target in pending {
      let PendingTarget { spec, imp } = target;
      let expanded = props.expand(&spec.name)?;
      let resolved = if path::is_absolute(&expanded) {
        path::normalize(&expanded)
      } else {
        match spec.location.dir() {
          Some(dir) => path::join_normalize(&dir, &expanded),
          None => {
            return Err(GraphError::IllegalTargetName {
              name: spec.name,
              message: "relative target path with no declaring build file".into(),
              location: spec.location,
            });
          }
        }
      };

      if let Some(bad) = resolved
        .char_indices()
        .find(|(i, c)| FORBIDDEN_NAME_CHARS.contains(c) && !(*c == ':' && *i == 1))
      {
        return Err(GraphError::IllegalTargetName {
          name: spec.name,
          message: format!("character '{}' is not permitted in output paths", bad.1),
          location: spec.location,
        });
      }
      if !(spec.priority >= 0.0) {
        return Err(GraphError::IllegalTargetName {
          name: spec.name,
          message: format!("priority must be a non-negative number, got {}", spec.priority),
          location: spec.location,
        });
      }

      for root in props.output_roots() {
        if resolved.trim_end_matches('/').eq_ignore_ascii_case(root.trim_end_matches('/')) {
          return Err(GraphError::OutputIsOutputRoot {
            path: resolved,
            location: spec.location,
          });
        }
      }

      let idx = entries.len();
      if let Some(&first) = lower_paths.get(&resolved.to_lowercase()) {
        return Err(GraphError::DuplicateTargetPath {
          path: resolved,
          first: entries[first].spec.location.clone(),
          second: spec.location,
        });
      }
      lower_paths.insert(resolved.to_lowercase(), idx);
      by_path.insert(resolved.clone(), idx);
      by_name.insert(spec.name.clone(), idx);
      entries.push(Arc::new(TargetEntry {
        path: resolved,
        spec,
        imp,
      }));
    }

    // nesting: in sorted order any containment shows up between neighbours
    let mut sorted: Vec<usize> = (0..entries.len()).collect();
    sorted.sort_by(|&a, &b| entries[a].path.to_lowercase().cmp(&entries[b].path.to_lowercase()));
    for pair in sorted.windows(2) {
      let outer = &entries[pair[0]];
      let inner = &entries[pair[1]];
      if path::is_beneath(&inner.path, &outer.path) {
        return Err(GraphError::NestedOutputs {
          outer: outer.path.clone(),
          inner: inner.path.clone(),
          location: inner.spec.location.clone(),
        });
      }
    }

    let mut tags: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, entry) in entries.iter().enumerate() {
      for tag in &entry.spec.tags {
        tags.entry(tag.clone()).or_default().push(idx);
      }
      if !entry.spec.disable_in_full_build {
        tags.entry(FULL_BUILD_TAG.to_string()).or_default().push(idx);
      }
    }
    tags.entry(FULL_BUILD_TAG.to_string()).or_default();

    debug!(targets = entries.len(), tags = tags.len(), "target graph frozen");
    Ok(Self {
      entries,
      by_path,
      by_name,
      tags,
    })
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<TargetEntry>> {
    self.entries.iter()
  }

  /// Look up a target by its resolved output path (dir-marked for dirs).
  pub fn by_output(&self, output_path: &str) -> Option<&Arc<TargetEntry>> {
    self.by_path.get(output_path).map(|&i| &self.entries[i])
  }

  /// Directory targets whose output encloses `p`.
  pub fn dir_target_enclosing(&self, p: &str) -> Option<&Arc<TargetEntry>> {
    self
      .entries
      .iter()
      .find(|e| e.is_dir_target() && path::is_beneath(p, &e.path))
  }

  fn canonical_tag<'t>(&self, tag: &'t str) -> &'t str {
    if tag == ALL_TAG { FULL_BUILD_TAG } else { tag }
  }

  pub fn targets_for_tag(&self, tag: &str) -> Option<Vec<&Arc<TargetEntry>>> {
    self
      .tags
      .get(self.canonical_tag(tag))
      .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
  }

  pub fn tags_for_target(&self, output_path: &str) -> Vec<&str> {
    let Some(&idx) = self.by_path.get(output_path) else {
      return Vec::new();
    };
    self
      .tags
      .iter()
      .filter(|(_, members)| members.contains(&idx))
      .map(|(tag, _)| tag.as_str())
      .collect()
  }

  /// Resolve selection patterns (target names, output paths, tags) to a
  /// target set. An empty selection means the `full` set. A pattern that
  /// matches nothing exactly falls back to substring/regex lookup and must
  /// identify exactly one target.
  pub fn select(&self, patterns: &[String]) -> Result<Vec<Arc<TargetEntry>>, GraphError> {
    let mut picked: Vec<usize> = Vec::new();
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let push = |idx: usize, picked: &mut Vec<usize>, seen: &mut BTreeSet<usize>| {
      if seen.insert(idx) {
        picked.push(idx);
      }
    };

    let full = vec![FULL_BUILD_TAG.to_string()];
    let patterns = if patterns.is_empty() { &full } else { patterns };

    for pattern in patterns {
      if let Some(members) = self.tags.get(self.canonical_tag(pattern)) {
        for &idx in members {
          push(idx, &mut picked, &mut seen);
        }
        continue;
      }
      if let Some(&idx) = self.by_name.get(pattern).or_else(|| self.by_path.get(pattern)) {
        push(idx, &mut picked, &mut seen);
        continue;
      }
      // tolerate a missing/extra trailing slash and relative forms
      let normalized = path::normalize(pattern);
      if let Some(&idx) = self
        .by_path
        .get(&normalized)
        .or_else(|| self.by_path.get(&format!("{normalized}/")))
      {
        push(idx, &mut picked, &mut seen);
        continue;
      }

      let matches = self.search(pattern);
      match matches.len() {
        1 => push(self.by_path[&matches[0].path], &mut picked, &mut seen),
        0 => {
          return Err(GraphError::UnknownSelector {
            pattern: pattern.clone(),
            suggestions: self.suggestions_for(pattern),
          });
        }
        _ => {
          return Err(GraphError::AmbiguousSelector {
            pattern: pattern.clone(),
            matches: matches.iter().map(|e| e.path.clone()).take(8).collect(),
          });
        }
      }
    }

    Ok(picked.into_iter().map(|i| self.entries[i].clone()).collect())
  }

  /// Case-insensitive literal substring lookup over names, paths and tags.
  /// This is the whole contract of `--find-target` and `--target-info`:
  /// no character is a metacharacter.
  pub fn find_by_substring(&self, substr: &str) -> Vec<&Arc<TargetEntry>> {
    let needle = substr.to_lowercase();
    self.entries.iter().filter(|e| contains_substring(e, &needle)).collect()
  }

  /// Lookup for `--search` and selection fallback: a literal substring
  /// match, or an anchored regex match against the full name or output
  /// path (a pattern selects a target, so partial regex hits would be
  /// ambiguous).
  pub fn search(&self, expr: &str) -> Vec<&Arc<TargetEntry>> {
    let needle = expr.to_lowercase();
    let regex = regex::Regex::new(&format!("^(?:{expr})$")).ok();
    self
      .entries
      .iter()
      .filter(|e| {
        contains_substring(e, &needle)
          || regex.as_ref().is_some_and(|re| re.is_match(&e.path) || re.is_match(&e.spec.name))
      })
      .collect()
  }

  fn suggestions_for(&self, pattern: &str) -> Vec<String> {
    let needle: String = pattern.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if needle.is_empty() {
      return Vec::new();
    }
    self
      .tags
      .keys()
      .filter(|t| t.contains(&needle.to_lowercase()))
      .cloned()
      .take(4)
      .collect()
  }

  pub fn tag_names(&self) -> Vec<&str> {
    self.tags.keys().map(String::as_str).collect()
  }
}

/// The frozen result of parsing: properties, options, the target graph and
/// the state layout. This is the engine's view of the world for the rest of
/// the run; the parse context it was built from is gone.
pub struct BuildModel {
  pub props: PropertyStore,
  pub options: OptionStore,
  pub graph: TargetGraph,
  pub state: StatePaths,
  /// Registered output roots (OutputDir properties plus `OUTPUT_DIR`).
  pub output_roots: Vec<String>,
  pub global_excludes: Vec<String>,
}

impl BuildModel {
  /// A target's effective options: defaults overlaid with global then
  /// per-target overrides. Computed via the frozen option store, so calling
  /// this during parse fails.
  pub fn effective_options(&self, entry: &TargetEntry) -> Result<OptionMap, PropertyError> {
    self.options.effective(&entry.spec.option_overrides)
  }

  /// True if `p` lies beneath any registered output root.
  pub fn within_output_root(&self, p: &str) -> bool {
    self.output_roots.iter().any(|root| path::is_beneath(p, root))
  }
}

impl PathResolver for BuildModel {
  fn expand(&self, input: &str) -> Result<String, PropertyError> {
    self.props.expand(input)
  }

  fn expand_path_list(&self, input: &str) -> Result<Vec<String>, PropertyError> {
    self.props.expand_list(input)
  }

  fn targets_with_tag(&self, tag: &str) -> Option<Vec<String>> {
    self
      .graph
      .targets_for_tag(tag)
      .map(|targets| targets.iter().map(|e| e.path.clone()).collect())
  }

  fn is_target(&self, p: &str) -> bool {
    self.graph.by_output(p).is_some()
  }

  fn global_excludes(&self) -> &[String] {
    &self.global_excludes
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pathset::{PathSet, PathSetRef};
  use crate::target::{Target, TargetError, TargetSpec};

  struct NullTarget {
    sources: PathSetRef,
  }

  impl NullTarget {
    fn pending(name: &str) -> PendingTarget {
      Self::pending_with(name, |_| {})
    }

    fn pending_with(name: &str, tweak: impl FnOnce(&mut TargetSpec)) -> PendingTarget {
      let location = Location::new("/proj/build.lua");
      let mut spec = TargetSpec::new(name, location.clone());
      tweak(&mut spec);
      PendingTarget {
        spec,
        imp: Box::new(NullTarget {
          sources: PathSet::of(vec![], location).unwrap(),
        }),
      }
    }
  }

  impl Target for NullTarget {
    fn kind(&self) -> &'static str {
      "null"
    }

    fn sources(&self) -> PathSetRef {
      self.sources.clone()
    }

    fn run(&self, _ctx: &crate::context::TargetContext<'_>) -> Result<(), TargetError> {
      Ok(())
    }
  }

  fn props() -> PropertyStore {
    PropertyStore::new()
  }

  #[test]
  fn freeze_resolves_relative_names() {
    let graph = TargetGraph::freeze(vec![NullTarget::pending("out/a.txt")], &props()).unwrap();
    assert!(graph.by_output("/proj/out/a.txt").is_some());
  }

  #[test]
  fn freeze_rejects_forbidden_characters() {
    for bad in ["out/a<b", "out/a>b", "out/a\"b", "out/a|b", "out/a?b", "out/a*b", "out/a:b"] {
      let err = TargetGraph::freeze(vec![NullTarget::pending(bad)], &props()).unwrap_err();
      assert!(matches!(err, GraphError::IllegalTargetName { .. }), "{bad}");
    }
  }

  #[test]
  fn freeze_allows_windows_drive_colon() {
    let graph = TargetGraph::freeze(vec![NullTarget::pending("C:/out/a.txt")], &props()).unwrap();
    assert!(graph.by_output("C:/out/a.txt").is_some());
  }

  #[test]
  fn freeze_rejects_duplicate_paths_case_insensitively() {
    let err = TargetGraph::freeze(
      vec![NullTarget::pending("out/A.txt"), NullTarget::pending("out/a.TXT")],
      &props(),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::DuplicateTargetPath { .. }));
  }

  #[test]
  fn freeze_rejects_output_nested_in_dir_target() {
    let err = TargetGraph::freeze(
      vec![NullTarget::pending("out/dir/"), NullTarget::pending("out/dir/inner.txt")],
      &props(),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::NestedOutputs { .. }));
  }

  #[test]
  fn freeze_rejects_negative_priority() {
    let err = TargetGraph::freeze(
      vec![NullTarget::pending_with("out/a", |s| s.priority = -1.0)],
      &props(),
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::IllegalTargetName { .. }));
  }

  #[test]
  fn full_tag_excludes_opt_outs_but_explicit_selection_wins() {
    let graph = TargetGraph::freeze(
      vec![
        NullTarget::pending("out/a"),
        NullTarget::pending_with("out/b", |s| {
          s.disable_in_full_build = true;
          s.tags = vec!["extras".into()];
        }),
      ],
      &props(),
    )
    .unwrap();

    let full: Vec<_> = graph.select(&[]).unwrap().iter().map(|e| e.path.clone()).collect();
    assert_eq!(full, vec!["/proj/out/a"]);

    // `all` is an alias for `full`
    let all: Vec<_> = graph
      .select(&["all".to_string()])
      .unwrap()
      .iter()
      .map(|e| e.path.clone())
      .collect();
    assert_eq!(all, full);

    // explicitly asking for the disabled target's tag includes it
    let extras = graph.select(&["extras".to_string()]).unwrap();
    assert_eq!(extras[0].path, "/proj/out/b");

    // ... as does naming it directly
    let direct = graph.select(&["out/b".to_string()]).unwrap();
    assert_eq!(direct[0].path, "/proj/out/b");
  }

  #[test]
  fn select_unknown_fails_with_error() {
    let graph = TargetGraph::freeze(vec![NullTarget::pending("out/a")], &props()).unwrap();
    assert!(matches!(
      graph.select(&["zzz".to_string()]),
      Err(GraphError::UnknownSelector { .. })
    ));
  }

  #[test]
  fn select_substring_must_be_unique() {
    let graph = TargetGraph::freeze(
      vec![NullTarget::pending("out/app.jar"), NullTarget::pending("out/app-src.zip")],
      &props(),
    )
    .unwrap();
    assert!(matches!(
      graph.select(&["app".to_string()]),
      Err(GraphError::AmbiguousSelector { .. })
    ));
    let one = graph.select(&["app.jar".to_string()]).unwrap();
    assert_eq!(one[0].path, "/proj/out/app.jar");
  }

  #[test]
  fn search_matches_substring_and_anchored_regex() {
    let graph = TargetGraph::freeze(
      vec![NullTarget::pending("out/app.jar"), NullTarget::pending("out/docs/")],
      &props(),
    )
    .unwrap();
    assert_eq!(graph.search("app").len(), 1);
    assert_eq!(graph.search(r".*\.jar").len(), 1);
    assert_eq!(graph.search("out").len(), 2);
    // the regex is anchored: a partial match selects nothing by itself
    assert_eq!(graph.search(r"\.jar$").len(), 0);
  }

  #[test]
  fn find_by_substring_is_literal() {
    let graph = TargetGraph::freeze(
      vec![NullTarget::pending("out/a.txt"), NullTarget::pending("out/aXtxt")],
      &props(),
    )
    .unwrap();
    // `.` is not a metacharacter here
    let found = graph.find_by_substring("a.txt");
    assert_eq!(found.len(), 1);
    assert!(found[0].path.ends_with("a.txt"));
    // ... and the anchored search regex cannot partial-match it either
    assert_eq!(graph.search("a.txt").len(), 1);
  }

  #[test]
  fn dir_target_enclosing_finds_owner() {
    let graph = TargetGraph::freeze(vec![NullTarget::pending("out/gen/")], &props()).unwrap();
    assert!(graph.dir_target_enclosing("/proj/out/gen/file.txt").is_some());
    assert!(graph.dir_target_enclosing("/proj/out/other.txt").is_none());
  }
}
