//! The target contract.
//!
//! The engine is polymorphic over target classes: all it needs is the kind
//! tag, the explicit dependency set, `clean`/`run`, and the hooks that
//! contribute implicit inputs to the cache. Concrete classes live in
//! [`crate::targets`]; anything else (compilers, packagers) plugs in through
//! the same trait.

use std::collections::BTreeMap;
use std::io;

use thiserror::Error;

use crate::context::TargetContext;
use crate::location::Location;
use crate::pathset::{PathSetError, PathSetRef};
use crate::props::{OptionValue, PropertyError};

/// A failure inside a target's `clean` or `run`.
#[derive(Debug, Error)]
pub enum TargetError {
  #[error("io error: {0}")]
  Io(#[from] io::Error),

  #[error("{0}")]
  Message(String),

  /// Classified as retryable regardless of the target's retry budget
  /// (e.g. a transient access-denied from a virus scanner).
  #[error("transient error: {0}")]
  Transient(String),

  #[error("cancelled")]
  Cancelled,

  #[error(transparent)]
  PathSet(#[from] PathSetError),

  #[error(transparent)]
  Property(#[from] PropertyError),
}

impl TargetError {
  pub fn is_transient(&self) -> bool {
    matches!(self, TargetError::Transient(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, TargetError::Cancelled)
  }
}

/// Declarative data captured at registration time, common to every target
/// class.
#[derive(Debug, Clone)]
pub struct TargetSpec {
  /// The primary output path as written in the build file; may contain
  /// `${...}` references and be relative to the declaring file. A trailing
  /// `/` declares a directory output.
  pub name: String,
  /// Selection aliases.
  pub tags: Vec<String>,
  /// Non-negative; higher runs earlier when several targets are runnable.
  pub priority: f64,
  /// Per-target option overlay.
  pub option_overrides: BTreeMap<String, OptionValue>,
  /// Additional dependencies given as target names rather than path-sets.
  pub extra_deps: Vec<String>,
  /// Excluded from the implicit `full` tag.
  pub disable_in_full_build: bool,
  /// Allow destination suffixes containing `..`.
  pub permit_dest_up_paths: bool,
  /// Declaring build file.
  pub location: Location,
}

impl TargetSpec {
  pub fn new(name: impl Into<String>, location: Location) -> Self {
    Self {
      name: name.into(),
      tags: Vec::new(),
      priority: 0.0,
      option_overrides: BTreeMap::new(),
      extra_deps: Vec::new(),
      disable_in_full_build: false,
      permit_dest_up_paths: false,
      location,
    }
  }
}

/// What the core requires of a target class.
pub trait Target: Send + Sync {
  /// Opaque class identifier, used in error reports and for cache
  /// invalidation when a target's implementation class changes.
  fn kind(&self) -> &'static str;

  /// The explicit dependency set.
  fn sources(&self) -> PathSetRef;

  /// Produce the declared output. On success the output must exist; on
  /// failure partial outputs are permitted (they are swept by the next
  /// clean or rebuild).
  fn run(&self, ctx: &TargetContext<'_>) -> Result<(), TargetError>;

  /// Delete declared outputs and scratch space. Idempotent; must not fail
  /// when outputs are already absent. The default removes the declared
  /// output, the stamp file and the work directory.
  fn clean(&self, ctx: &TargetContext<'_>) -> Result<(), TargetError> {
    ctx.clean_declared_outputs()
  }

  /// Extra strings folded into the input hash at resolve time (expanded
  /// file contents, tool versions, and similar).
  fn implicit_inputs(&self, _ctx: &TargetContext<'_>) -> Result<Vec<String>, TargetError> {
    Ok(Vec::new())
  }

  /// Names of options whose values this target's behavior depends on;
  /// their values are folded into the input hash.
  fn significant_options(&self) -> Vec<&'static str> {
    Vec::new()
  }
}

/// A target as registered during parse, before names are resolved.
pub struct PendingTarget {
  pub spec: TargetSpec,
  pub imp: Box<dyn Target>,
}

impl std::fmt::Debug for PendingTarget {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingTarget")
      .field("spec", &self.spec)
      .field("kind", &self.imp.kind())
      .finish()
  }
}

/// A target after freeze: resolved output path plus the registration data.
pub struct TargetEntry {
  /// Absolute normalized output path, dir-marked for directory targets.
  pub path: String,
  pub spec: TargetSpec,
  pub imp: Box<dyn Target>,
}

impl TargetEntry {
  pub fn is_dir_target(&self) -> bool {
    crate::path::is_dir_path(&self.path)
  }

  /// Display form used in logs and errors: `<Kind> /path`.
  pub fn display_name(&self) -> String {
    format!("<{}> {}", self.imp.kind(), self.path)
  }
}

impl std::fmt::Debug for TargetEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TargetEntry")
      .field("path", &self.path)
      .field("kind", &self.imp.kind())
      .finish()
  }
}
