//! Lazy path-set algebra.
//!
//! A path-set is an immutable descriptor of a set of `(source path,
//! destination suffix)` pairs, resolved against the frozen build model and
//! memoized for the rest of the run. Path-sets constructed while a build file
//! is being parsed may use paths relative to that file; once parsing has
//! ended only absolute paths are legal.
//!
//! Sets that reference a directory produced by another target
//! ([`PathSetKind::DirFromTarget`], or a glob/dir set rooted on one) must
//! only be *walked* after the producing target has built; during dependency
//! resolution they contribute the producing directory itself via
//! [`PathSet::dependency_paths`].

pub mod glob;

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::location::Location;
use crate::path;
use crate::props::PropertyError;

pub type PathSetRef = Arc<PathSet>;

/// One resolved item: absolute source path and its destination suffix.
/// Directory sources carry the trailing `/` marker in both positions.
pub type Entry = (String, String);

#[derive(Debug, Clone, Error)]
pub enum PathSetError {
  #[error("{location}: {message}")]
  Invalid { message: String, location: Location },

  #[error(transparent)]
  Property(#[from] PropertyError),

  #[error(transparent)]
  Pattern(#[from] glob::BadPattern),

  #[error("relative path \"{input}\" is not permitted after parsing has ended")]
  RelativePathAfterParse { input: String },

  #[error("{location}: glob base directory does not exist: \"{dir}\"")]
  MissingGlobRoot { dir: String, location: Location },

  #[error("{location}: unknown tag \"{tag}\"")]
  UnknownTag { tag: String, location: Location },

  #[error("{location}: I/O error resolving path-set: {message}")]
  Io { message: String, location: Location },
}

/// A dependency path contributed by a path-set, with a flag for paths that
/// were discovered on disk during resolution (no point re-checking those for
/// existence).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepPath {
  pub path: String,
  pub skip_existence_check: bool,
}

/// The seam through which path-sets see the rest of the build model.
pub trait PathResolver {
  fn expand(&self, input: &str) -> Result<String, PropertyError>;
  fn expand_path_list(&self, input: &str) -> Result<Vec<String>, PropertyError>;
  /// Output paths of every target carrying `tag`, dir-marked.
  fn targets_with_tag(&self, tag: &str) -> Option<Vec<String>>;
  /// True if `p` is a registered target output path.
  fn is_target(&self, p: &str) -> bool;
  /// Glob patterns excluded from every walk.
  fn global_excludes(&self) -> &[String];
}

/// Base directory of a dir-rooted set: a literal (possibly relative) string
/// or another path-set that must resolve to exactly one directory.
#[derive(Debug)]
pub enum BaseDir {
  Literal(String),
  Set(PathSetRef),
}

#[derive(Debug)]
pub enum PathSetKind {
  /// Explicit paths; `${name[]}` list references multiply out.
  Static { paths: Vec<String> },
  /// Ordered union of other sets.
  Compound { parts: Vec<PathSetRef> },
  /// Statically named children under a base directory.
  DirBased { dir: BaseDir, children: Vec<String> },
  /// Ant-glob discovery under a base directory.
  Glob {
    dir: BaseDir,
    includes: Vec<String>,
    excludes: Vec<String>,
  },
  /// Union of the outputs of every target carrying a tag.
  Tagged { tag: String, allow_dirs: bool },
  /// A directory that is itself produced by another target. The only legal
  /// way to root a set on generated output.
  DirFromTarget { dir: String },
  /// Keep only entries whose source matches a glob pattern.
  Filtered { inner: PathSetRef, pattern: String },
  /// Prepend a prefix to every destination suffix.
  DestPrefixed { inner: PathSetRef, prefix: String },
  /// Collapse every destination to its base name.
  DestFlattened { inner: PathSetRef },
  /// Rename the destination of a single-entry set.
  DestRenamed { inner: PathSetRef, dest: String },
}

#[derive(Debug)]
pub struct PathSet {
  kind: PathSetKind,
  location: Location,
  resolved: OnceLock<Result<Vec<Entry>, PathSetError>>,
}

impl PathSet {
  pub fn new(kind: PathSetKind, location: Location) -> Result<PathSetRef, PathSetError> {
    if let PathSetKind::Glob { includes, excludes, .. } = &kind {
      for pattern in includes.iter().chain(excludes) {
        glob::validate_pattern(pattern)?;
      }
    }
    if let PathSetKind::DirFromTarget { dir } = &kind {
      if dir.contains('\\') {
        return Err(PathSetError::Invalid {
          message: format!("generated-directory reference must use forward slashes: \"{dir}\""),
          location,
        });
      }
      if !path::is_dir_path(dir) {
        return Err(PathSetError::Invalid {
          message: format!("generated-directory reference must end with /: \"{dir}\""),
          location,
        });
      }
    }
    if let PathSetKind::DestPrefixed { prefix, .. } = &kind
      && prefix.split('/').any(|seg| seg == "..")
    {
      return Err(PathSetError::Invalid {
        message: format!("destination prefix may not contain ..: \"{prefix}\""),
        location,
      });
    }
    if let PathSetKind::Filtered { pattern, .. } = &kind {
      glob::validate_pattern(pattern)?;
    }
    Ok(Arc::new(Self {
      kind,
      location,
      resolved: OnceLock::new(),
    }))
  }

  /// Convenience constructor for a static set.
  pub fn of(paths: Vec<String>, location: Location) -> Result<PathSetRef, PathSetError> {
    Self::new(PathSetKind::Static { paths }, location)
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  pub fn kind(&self) -> &PathSetKind {
    &self.kind
  }

  /// Resolve to an ordered (by source path) sequence of entries, collapsing
  /// duplicate sources with a warning. Memoized for the rest of the run.
  pub fn resolve(&self, ctx: &dyn PathResolver) -> Result<Vec<Entry>, PathSetError> {
    self
      .resolved
      .get_or_init(|| {
        let mut entries = self.resolve_uncached(ctx)?;
        entries.sort();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        entries.retain(|(src, _)| {
          let fresh = seen.insert(src.to_lowercase());
          if !fresh {
            warn!(source = %src, location = %self.location, "duplicate path-set entry collapsed");
          }
          fresh
        });
        Ok(entries)
      })
      .clone()
  }

  fn resolve_uncached(&self, ctx: &dyn PathResolver) -> Result<Vec<Entry>, PathSetError> {
    match &self.kind {
      PathSetKind::Static { paths } => {
        let mut out = Vec::new();
        for raw in paths {
          for p in ctx.expand_path_list(raw)? {
            if p.contains('*') || p.contains('?') {
              return Err(PathSetError::Invalid {
                message: format!("glob characters are not allowed in explicit paths (use a find set): \"{p}\""),
                location: self.location.clone(),
              });
            }
            let abs = self.absolutize(&p)?;
            let dest = path::base_name(&abs);
            out.push((abs, dest));
          }
        }
        Ok(out)
      }

      PathSetKind::Compound { parts } => {
        let mut out = Vec::new();
        for part in parts {
          out.extend(part.resolve(ctx)?);
        }
        Ok(out)
      }

      PathSetKind::DirBased { dir, children } => {
        let base = self.resolve_base(dir, ctx)?;
        let mut out = Vec::new();
        for raw in children {
          for child in ctx.expand_path_list(raw)? {
            let child = child.trim().to_string();
            if child.contains('*') || child.contains('?') {
              return Err(PathSetError::Invalid {
                message: format!("glob characters are not allowed here (use a find set): \"{child}\""),
                location: self.location.clone(),
              });
            }
            if path::is_absolute(&child) {
              return Err(PathSetError::Invalid {
                message: format!("children of a directory set must be relative: \"{child}\""),
                location: self.location.clone(),
              });
            }
            let src = path::join_normalize(&base, &child);
            let dest = path::normalize(&child);
            out.push((src, dest));
          }
        }
        Ok(out)
      }

      PathSetKind::Glob { dir, includes, excludes } => {
        let base = self.resolve_base(dir, ctx)?;
        self.resolve_glob(&base, includes, excludes, ctx)
      }

      PathSetKind::Tagged { tag, allow_dirs } => {
        let outputs = ctx.targets_with_tag(tag).ok_or_else(|| PathSetError::UnknownTag {
          tag: tag.clone(),
          location: self.location.clone(),
        })?;
        if !allow_dirs
          && let Some(dir) = outputs.iter().find(|p| path::is_dir_path(p))
        {
          return Err(PathSetError::Invalid {
            message: format!(
              "tag \"{tag}\" includes the directory target \"{dir}\" (set allow_dirs if intended)"
            ),
            location: self.location.clone(),
          });
        }
        Ok(outputs.into_iter().map(|p| {
          let dest = path::base_name(&p);
          (p, dest)
        }).collect())
      }

      PathSetKind::DirFromTarget { dir } => {
        let expanded = ctx.expand(dir)?;
        let abs = self.absolutize(&expanded)?;
        let dest = path::base_name(&abs);
        Ok(vec![(abs, dest)])
      }

      PathSetKind::Filtered { inner, pattern } => {
        let entries = inner.resolve(ctx)?;
        Ok(
          entries
            .into_iter()
            .filter(|(src, _)| glob_matches_path(pattern, src))
            .collect(),
        )
      }

      PathSetKind::DestPrefixed { inner, prefix } => {
        let prefix = ctx.expand(prefix)?;
        let prefix = prefix.trim_start_matches('/');
        let entries = inner.resolve(ctx)?;
        Ok(
          entries
            .into_iter()
            .map(|(src, dest)| {
              let new = path::normalize(&format!("{prefix}{dest}"));
              (src, new)
            })
            .collect(),
        )
      }

      PathSetKind::DestFlattened { inner } => {
        let entries = inner.resolve(ctx)?;
        Ok(entries.into_iter().map(|(src, _)| {
          let dest = path::base_name(&src);
          (src, dest)
        }).collect())
      }

      PathSetKind::DestRenamed { inner, dest } => {
        let entries = inner.resolve(ctx)?;
        if entries.len() != 1 {
          return Err(PathSetError::Invalid {
            message: format!("rename requires exactly one entry, found {}", entries.len()),
            location: self.location.clone(),
          });
        }
        let dest = ctx.expand(dest)?;
        Ok(vec![(entries.into_iter().next().unwrap().0, dest)])
      }
    }
  }

  /// The paths whose producers must exist before this set can be walked,
  /// delegating child-first so generated directories surface as themselves
  /// rather than as their (not yet existing) contents.
  pub fn dependency_paths(&self, ctx: &dyn PathResolver) -> Result<Vec<DepPath>, PathSetError> {
    match &self.kind {
      PathSetKind::Static { .. } | PathSetKind::DirBased { dir: BaseDir::Literal(_), .. } => Ok(
        self
          .resolve(ctx)?
          .into_iter()
          .map(|(src, _)| DepPath {
            path: src,
            skip_existence_check: false,
          })
          .collect(),
      ),

      PathSetKind::DirBased { dir: BaseDir::Set(base), .. } => base.dependency_paths(ctx),

      PathSetKind::Glob { dir, .. } => match dir {
        BaseDir::Literal(_) => Ok(
          self
            .resolve(ctx)?
            .into_iter()
            .map(|(src, _)| DepPath {
              path: src,
              skip_existence_check: true,
            })
            .collect(),
        ),
        BaseDir::Set(base) => base.dependency_paths(ctx),
      },

      PathSetKind::Compound { parts } => {
        let mut out = Vec::new();
        for part in parts {
          out.extend(part.dependency_paths(ctx)?);
        }
        Ok(out)
      }

      PathSetKind::Tagged { tag, .. } => {
        let outputs = ctx.targets_with_tag(tag).ok_or_else(|| PathSetError::UnknownTag {
          tag: tag.clone(),
          location: self.location.clone(),
        })?;
        Ok(
          outputs
            .into_iter()
            .map(|p| DepPath {
              path: p,
              skip_existence_check: false,
            })
            .collect(),
        )
      }

      PathSetKind::DirFromTarget { dir } => {
        let expanded = ctx.expand(dir)?;
        let abs = self.absolutize(&expanded)?;
        if !ctx.is_target(&abs) {
          return Err(PathSetError::Invalid {
            message: format!("generated-directory reference names no known target: \"{abs}\""),
            location: self.location.clone(),
          });
        }
        Ok(vec![DepPath {
          path: abs,
          skip_existence_check: false,
        }])
      }

      PathSetKind::Filtered { inner, pattern } => {
        // keep directories: a generated dir may contain matches once built
        Ok(
          inner
            .dependency_paths(ctx)?
            .into_iter()
            .filter(|d| path::is_dir_path(&d.path) || glob_matches_path(pattern, &d.path))
            .collect(),
        )
      }

      PathSetKind::DestPrefixed { inner, .. }
      | PathSetKind::DestFlattened { inner }
      | PathSetKind::DestRenamed { inner, .. } => inner.dependency_paths(ctx),
    }
  }

  fn absolutize(&self, p: &str) -> Result<String, PathSetError> {
    if path::is_absolute(p) {
      return Ok(path::normalize(p));
    }
    match self.location.dir() {
      Some(base) => Ok(path::join_normalize(&base, p)),
      None => Err(PathSetError::RelativePathAfterParse { input: p.to_string() }),
    }
  }

  fn resolve_base(&self, dir: &BaseDir, ctx: &dyn PathResolver) -> Result<String, PathSetError> {
    let base = match dir {
      BaseDir::Literal(raw) => {
        let expanded = ctx.expand(raw)?;
        self.absolutize(&expanded)?
      }
      BaseDir::Set(set) => {
        let entries = set.resolve(ctx)?;
        if entries.len() != 1 {
          return Err(PathSetError::Invalid {
            message: format!("base directory set must resolve to exactly one path, found {}", entries.len()),
            location: self.location.clone(),
          });
        }
        entries.into_iter().next().unwrap().0
      }
    };
    if !path::is_dir_path(&base) {
      return Err(PathSetError::Invalid {
        message: format!("directory paths must end with an explicit /: \"{base}\""),
        location: self.location.clone(),
      });
    }
    Ok(base)
  }

  fn resolve_glob(
    &self,
    base: &str,
    includes: &[String],
    excludes: &[String],
    ctx: &dyn PathResolver,
  ) -> Result<Vec<Entry>, PathSetError> {
    let root = path::to_fs(base);
    if !root.is_dir() {
      return Err(PathSetError::MissingGlobRoot {
        dir: base.to_string(),
        location: self.location.clone(),
      });
    }

    let global_excludes = ctx.global_excludes().to_vec();
    let started = std::time::Instant::now();
    let mut matches: Vec<Entry> = Vec::new();
    let mut used_includes: BTreeSet<&String> = BTreeSet::new();
    let mut visited = 0usize;

    let excludes_for_prune = excludes.to_vec();
    let root_clone = root.clone();
    let walker = WalkDir::new(&root).follow_links(false).into_iter().filter_entry(move |e| {
      if e.depth() == 0 || !e.file_type().is_dir() {
        return true;
      }
      let rel = e
        .path()
        .strip_prefix(&root_clone)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
      !glob::excluded_dir(&excludes_for_prune, &rel)
    });

    for entry in walker {
      let entry = entry.map_err(|e| PathSetError::Io {
        message: e.to_string(),
        location: self.location.clone(),
      })?;
      if entry.depth() == 0 {
        continue;
      }
      visited += 1;
      let is_dir = entry.file_type().is_dir();
      let mut rel = entry
        .path()
        .strip_prefix(&root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
      if is_dir {
        rel.push('/');
      }

      if global_excludes.iter().any(|e| glob::glob_match(e, &rel)) {
        continue;
      }
      if excludes.iter().any(|e| glob::glob_match(e, &rel)) {
        continue;
      }

      if includes.is_empty() {
        // default is every file; bare directories only by explicit include
        if !is_dir {
          matches.push((format!("{base}{rel}"), rel));
        }
      } else if let Some(m) = includes.iter().find(|i| glob::glob_match(i, &rel)) {
        used_includes.insert(m);
        matches.push((format!("{base}{rel}"), rel));
      }
    }

    debug!(
      base = %base,
      found = matches.len(),
      visited,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "glob resolution finished"
    );

    if matches.is_empty() {
      return Err(PathSetError::Invalid {
        message: format!("no files matched under \"{base}\""),
        location: self.location.clone(),
      });
    }
    if used_includes.len() < includes.len() {
      let unused: Vec<&str> = includes
        .iter()
        .filter(|i| !used_includes.contains(i))
        .map(String::as_str)
        .collect();
      return Err(PathSetError::Invalid {
        message: format!("some include patterns matched no files: {}", unused.join(", ")),
        location: self.location.clone(),
      });
    }
    Ok(matches)
  }
}

/// Match a validated glob pattern against an absolute path by testing the
/// pattern against every suffix of the path's components.
fn glob_matches_path(pattern: &str, p: &str) -> bool {
  if pattern.starts_with("**") {
    return glob::glob_match(pattern, p.trim_start_matches('/'));
  }
  glob::glob_match(&format!("**/{pattern}"), p.trim_start_matches('/'))
}

/// Reject destination suffixes that climb out of the target's output via
/// `..`, unless the consuming target has opted in.
pub fn ensure_dest_within(entries: &[Entry], location: &Location) -> Result<(), PathSetError> {
  for (_, dest) in entries {
    if dest.split('/').any(|seg| seg == "..") {
      return Err(PathSetError::Invalid {
        message: format!("destination suffix escapes the output directory: \"{dest}\""),
        location: location.clone(),
      });
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  /// Minimal resolver used by path-set tests.
  pub(crate) struct TestResolver {
    pub props: BTreeMap<String, String>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub targets: BTreeSet<String>,
    pub global_excludes: Vec<String>,
  }

  impl Default for TestResolver {
    fn default() -> Self {
      Self {
        props: BTreeMap::new(),
        tags: BTreeMap::new(),
        targets: BTreeSet::new(),
        global_excludes: crate::consts::DEFAULT_GLOBAL_EXCLUDES
          .iter()
          .map(|s| s.to_string())
          .collect(),
      }
    }
  }

  impl PathResolver for TestResolver {
    fn expand(&self, input: &str) -> Result<String, PropertyError> {
      let mut out = input.to_string();
      for (k, v) in &self.props {
        out = out.replace(&format!("${{{k}}}"), v);
      }
      Ok(out)
    }

    fn expand_path_list(&self, input: &str) -> Result<Vec<String>, PropertyError> {
      Ok(vec![self.expand(input)?])
    }

    fn targets_with_tag(&self, tag: &str) -> Option<Vec<String>> {
      self.tags.get(tag).cloned()
    }

    fn is_target(&self, p: &str) -> bool {
      self.targets.contains(p)
    }

    fn global_excludes(&self) -> &[String] {
      &self.global_excludes
    }
  }

  fn loc() -> Location {
    Location::new("/build/build.lua")
  }

  #[test]
  fn static_paths_resolve_relative_to_build_file() {
    let set = PathSet::of(vec!["a.txt".into(), "sub/b.txt".into()], loc()).unwrap();
    let ctx = TestResolver::default();
    let entries = set.resolve(&ctx).unwrap();
    assert_eq!(
      entries,
      vec![
        ("/build/a.txt".to_string(), "a.txt".to_string()),
        ("/build/sub/b.txt".to_string(), "b.txt".to_string()),
      ]
    );
  }

  #[test]
  fn static_rejects_glob_chars() {
    let set = PathSet::of(vec!["src/*.c".into()], loc()).unwrap();
    let ctx = TestResolver::default();
    assert!(matches!(set.resolve(&ctx), Err(PathSetError::Invalid { .. })));
  }

  #[test]
  fn relative_path_without_location_fails() {
    let set = PathSet::of(vec!["a.txt".into()], Location::unknown()).unwrap();
    let ctx = TestResolver::default();
    assert!(matches!(
      set.resolve(&ctx),
      Err(PathSetError::RelativePathAfterParse { .. })
    ));
  }

  #[test]
  fn duplicates_collapse_by_source() {
    let set = PathSet::of(vec!["a.txt".into(), "a.txt".into()], loc()).unwrap();
    let ctx = TestResolver::default();
    assert_eq!(set.resolve(&ctx).unwrap().len(), 1);
  }

  #[test]
  fn dir_based_children_keep_relative_dest() {
    let set = PathSet::new(
      PathSetKind::DirBased {
        dir: BaseDir::Literal("${SRC}/".into()),
        children: vec!["a".into(), "b/c/".into()],
      },
      loc(),
    )
    .unwrap();
    let mut ctx = TestResolver::default();
    ctx.props.insert("SRC".into(), "/data/src".into());
    let entries = set.resolve(&ctx).unwrap();
    assert_eq!(
      entries,
      vec![
        ("/data/src/a".to_string(), "a".to_string()),
        ("/data/src/b/c/".to_string(), "b/c/".to_string()),
      ]
    );
  }

  #[test]
  fn dir_based_requires_trailing_slash_on_base() {
    let set = PathSet::new(
      PathSetKind::DirBased {
        dir: BaseDir::Literal("/data/src".into()),
        children: vec!["a".into()],
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    assert!(matches!(set.resolve(&ctx), Err(PathSetError::Invalid { .. })));
  }

  #[test]
  fn glob_walks_and_sorts() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
    std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
    std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
    std::fs::write(tmp.path().join("sub/c.txt"), "c").unwrap();
    std::fs::write(tmp.path().join("skip.bin"), "x").unwrap();

    let base = path::from_fs(tmp.path(), true);
    let set = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Literal(base.clone()),
        includes: vec!["**/*.txt".into()],
        excludes: vec![],
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    let entries = set.resolve(&ctx).unwrap();
    let dests: Vec<&str> = entries.iter().map(|(_, d)| d.as_str()).collect();
    assert_eq!(dests, vec!["a.txt", "b.txt", "sub/c.txt"]);
  }

  #[test]
  fn glob_excludes_and_global_excludes() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("keep.txt"), "k").unwrap();
    std::fs::write(tmp.path().join("drop.txt"), "d").unwrap();
    std::fs::write(tmp.path().join(".nfs0001"), "n").unwrap();

    let base = path::from_fs(tmp.path(), true);
    let set = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Literal(base),
        includes: vec![],
        excludes: vec!["drop.*".into()],
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    let entries = set.resolve(&ctx).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].0.ends_with("keep.txt"));
  }

  #[test]
  fn glob_unused_include_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
    let base = path::from_fs(tmp.path(), true);
    let set = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Literal(base),
        includes: vec!["*.txt".into(), "*.md".into()],
        excludes: vec![],
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    let err = set.resolve(&ctx).unwrap_err();
    assert!(err.to_string().contains("*.md"), "{err}");
  }

  #[test]
  fn glob_missing_root_is_an_error() {
    let set = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Literal("/no/such/dir/".into()),
        includes: vec![],
        excludes: vec![],
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    assert!(matches!(set.resolve(&ctx), Err(PathSetError::MissingGlobRoot { .. })));
  }

  #[test]
  fn trailing_double_star_slash_star_dir_rejected() {
    let err = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Literal("/x/".into()),
        includes: vec!["**/*/".into()],
        excludes: vec![],
      },
      loc(),
    )
    .unwrap_err();
    assert!(matches!(err, PathSetError::Pattern(_)));
  }

  #[test]
  fn tagged_resolves_target_outputs() {
    let set = PathSet::new(
      PathSetKind::Tagged {
        tag: "jars".into(),
        allow_dirs: false,
      },
      loc(),
    )
    .unwrap();
    let mut ctx = TestResolver::default();
    ctx
      .tags
      .insert("jars".into(), vec!["/out/a.jar".into(), "/out/b.jar".into()]);
    let entries = set.resolve(&ctx).unwrap();
    assert_eq!(entries[0], ("/out/a.jar".to_string(), "a.jar".to_string()));
  }

  #[test]
  fn tagged_rejects_dirs_unless_allowed() {
    let mut ctx = TestResolver::default();
    ctx.tags.insert("t".into(), vec!["/out/dir/".into()]);

    let strict = PathSet::new(
      PathSetKind::Tagged {
        tag: "t".into(),
        allow_dirs: false,
      },
      loc(),
    )
    .unwrap();
    assert!(strict.resolve(&ctx).is_err());

    let lax = PathSet::new(
      PathSetKind::Tagged {
        tag: "t".into(),
        allow_dirs: true,
      },
      loc(),
    )
    .unwrap();
    assert_eq!(lax.resolve(&ctx).unwrap().len(), 1);
  }

  #[test]
  fn unknown_tag_fails() {
    let set = PathSet::new(
      PathSetKind::Tagged {
        tag: "nope".into(),
        allow_dirs: false,
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    assert!(matches!(set.resolve(&ctx), Err(PathSetError::UnknownTag { .. })));
  }

  #[test]
  fn dir_from_target_contributes_itself_as_dependency() {
    let set = PathSet::new(PathSetKind::DirFromTarget { dir: "/out/gen/".into() }, loc()).unwrap();
    let mut ctx = TestResolver::default();
    ctx.targets.insert("/out/gen/".into());
    let deps = set.dependency_paths(&ctx).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].path, "/out/gen/");
    assert!(!deps[0].skip_existence_check);
  }

  #[test]
  fn dir_from_target_unknown_target_fails() {
    let set = PathSet::new(PathSetKind::DirFromTarget { dir: "/out/gen/".into() }, loc()).unwrap();
    let ctx = TestResolver::default();
    assert!(set.dependency_paths(&ctx).is_err());
  }

  #[test]
  fn glob_rooted_on_generated_dir_depends_on_the_dir_only() {
    let inner = PathSet::new(PathSetKind::DirFromTarget { dir: "/out/gen/".into() }, loc()).unwrap();
    let set = PathSet::new(
      PathSetKind::Glob {
        dir: BaseDir::Set(inner),
        includes: vec!["**".into()],
        excludes: vec![],
      },
      loc(),
    )
    .unwrap();
    let mut ctx = TestResolver::default();
    ctx.targets.insert("/out/gen/".into());
    let deps = set.dependency_paths(&ctx).unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].path, "/out/gen/");
  }

  #[test]
  fn dest_prefix_and_flatten() {
    let inner = PathSet::new(
      PathSetKind::DirBased {
        dir: BaseDir::Literal("/data/src/".into()),
        children: vec!["d/e".into()],
      },
      loc(),
    )
    .unwrap();

    let prefixed = PathSet::new(
      PathSetKind::DestPrefixed {
        inner: inner.clone(),
        prefix: "lib/bar/".into(),
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    assert_eq!(
      prefixed.resolve(&ctx).unwrap(),
      vec![("/data/src/d/e".to_string(), "lib/bar/d/e".to_string())]
    );

    let flattened = PathSet::new(PathSetKind::DestFlattened { inner }, loc()).unwrap();
    assert_eq!(
      flattened.resolve(&ctx).unwrap(),
      vec![("/data/src/d/e".to_string(), "e".to_string())]
    );
  }

  #[test]
  fn dest_prefix_rejects_parent_refs() {
    let inner = PathSet::of(vec!["a".into()], loc()).unwrap();
    assert!(
      PathSet::new(
        PathSetKind::DestPrefixed {
          inner,
          prefix: "../up/".into(),
        },
        loc(),
      )
      .is_err()
    );
  }

  #[test]
  fn rename_requires_single_entry() {
    let inner = PathSet::of(vec!["a".into(), "b".into()], loc()).unwrap();
    let renamed = PathSet::new(
      PathSetKind::DestRenamed {
        inner,
        dest: "meta/manifest.txt".into(),
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    assert!(renamed.resolve(&ctx).is_err());
  }

  #[test]
  fn filtered_keeps_matching_sources() {
    let inner = PathSet::of(vec!["a.txt".into(), "b.bin".into()], loc()).unwrap();
    let filtered = PathSet::new(
      PathSetKind::Filtered {
        inner,
        pattern: "*.txt".into(),
      },
      loc(),
    )
    .unwrap();
    let ctx = TestResolver::default();
    let entries = filtered.resolve(&ctx).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].0.ends_with("a.txt"));
  }

  #[test]
  fn ensure_dest_within_rejects_escapes() {
    let entries = vec![("/s/a".to_string(), "../a".to_string())];
    assert!(ensure_dest_within(&entries, &loc()).is_err());
    let ok = vec![("/s/a".to_string(), "sub/a".to_string())];
    assert!(ensure_dest_within(&ok, &loc()).is_ok());
  }
}
