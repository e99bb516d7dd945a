//! Build-file evaluation: the parse phase.
//!
//! A [`ParseState`] plays the role of the build initialization context: a
//! single mutable registry that build-file code populates through the `bake`
//! global while the evaluator runs. It is shared as `Rc<RefCell<..>>` with
//! the Lua callbacks (parsing is single-threaded), consumed by
//! [`ParseState::freeze`], and replaced by the immutable [`BuildModel`] for
//! the rest of the run.

use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::DEFAULT_GLOBAL_EXCLUDES;
use crate::error::BuildError;
use crate::graph::{BuildModel, TargetGraph};
use crate::location::Location;
use crate::lua::{loaders, runtime};
use crate::path;
use crate::props::{OptionStore, OptionValue, PropertyKind, PropertyStore, PropertyValue};
use crate::state::StatePaths;
use crate::target::PendingTarget;

#[derive(Debug, Error)]
pub enum EvalError {
  #[error("lua error: {0}")]
  Lua(#[from] mlua::Error),

  #[error("cannot read build file \"{file}\": {source}")]
  ReadFile {
    file: String,
    #[source]
    source: io::Error,
  },
}

/// The mutable registry populated while build files run.
#[derive(Debug)]
pub struct ParseState {
  pub props: PropertyStore,
  pub options: OptionStore,
  pub pending: Vec<PendingTarget>,
  /// Build files currently being evaluated, innermost last. Registrations
  /// capture the top entry as their location.
  pub include_stack: Vec<String>,
  /// Directory of the root build file, dir-marked.
  pub root_dir: String,
  pub global_excludes: Vec<String>,
}

impl ParseState {
  pub fn new(root_file: &str, overrides: impl IntoIterator<Item = (String, String)>) -> Self {
    let root_dir = Location::new(root_file).dir().unwrap_or_else(|| "/".to_string());
    let mut props = PropertyStore::new();
    props.set_overrides(overrides);

    let mut options = OptionStore::new();
    let builtin = Location::unknown();
    // options every target understands
    options
      .define("failureRetries", OptionValue::Int(0), None, builtin.clone())
      .expect("fresh store");
    options
      .define("retryBackoffMillis", OptionValue::Int(15_000), None, builtin.clone())
      .expect("fresh store");
    options
      .define("cleanBeforeBuild", OptionValue::Bool(false), None, builtin.clone())
      .expect("fresh store");
    options
      .define("workers", OptionValue::Int(0), None, builtin)
      .expect("fresh store");

    Self {
      props,
      options,
      pending: Vec::new(),
      include_stack: vec![root_file.to_string()],
      root_dir,
      global_excludes: DEFAULT_GLOBAL_EXCLUDES.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// The innermost build file being evaluated.
  pub fn current_location(&self) -> Location {
    match self.include_stack.last() {
      Some(file) => Location::new(file.clone()),
      None => Location::unknown(),
    }
  }

  pub fn current_dir(&self) -> Option<String> {
    self.current_location().dir()
  }

  pub fn register(&mut self, target: PendingTarget) {
    debug!(name = %target.spec.name, kind = %target.imp.kind(), "target registered");
    self.pending.push(target);
  }

  /// End of parse: validate everything, resolve target names, freeze the
  /// option store and hand back the immutable model.
  pub fn freeze(mut self) -> Result<BuildModel, BuildError> {
    // every build gets an output root, overridable by defining OUTPUT_DIR
    if !self.props.is_defined("OUTPUT_DIR") {
      self.props.define(
        "OUTPUT_DIR",
        PropertyKind::OutputDir,
        PropertyValue::Str("output".into()),
        None,
        Some(&self.root_dir),
        Location::new(format!("{}build.lua", self.root_dir)),
      )?;
    }

    for name in self.props.unused_overrides() {
      warn!(property = %name, "command-line override matches no defined property");
    }

    self.options.freeze();
    let graph = TargetGraph::freeze(self.pending, &self.props)?;

    let mut output_root = self.props.value("OUTPUT_DIR")?;
    if !output_root.ends_with('/') {
      output_root.push('/');
    }
    output_root = path::normalize(&output_root);

    let mut output_roots: Vec<String> = self.props.output_roots().to_vec();
    if !output_roots.contains(&output_root) {
      output_roots.push(output_root.clone());
    }

    Ok(BuildModel {
      state: StatePaths::for_output_root(&output_root),
      props: self.props,
      options: self.options,
      graph,
      output_roots,
      global_excludes: self.global_excludes,
    })
  }
}

/// Evaluate the root build file and return the populated parse state.
///
/// Property overrides (`NAME=value` from the command line) are installed
/// before evaluation so definitions pick them up. The Lua runtime lives only
/// for the duration of this call.
pub fn evaluate_build_file(
  file: &Path,
  overrides: impl IntoIterator<Item = (String, String)>,
) -> Result<ParseState, EvalError> {
  let canonical = file.canonicalize().map_err(|source| EvalError::ReadFile {
    file: file.display().to_string(),
    source,
  })?;
  let root = path::from_fs(&canonical, false);

  let state = Rc::new(RefCell::new(ParseState::new(&root, overrides)));
  {
    let lua = runtime::create_runtime(state.clone())?;
    loaders::load_build_file(&lua, &state, &canonical)?;
    // lua dropped here, releasing its clones of the state
  }

  Ok(
    Rc::try_unwrap(state)
      .map(RefCell::into_inner)
      .unwrap_or_else(|_| panic!("parse state still referenced after evaluation")),
  )
}
