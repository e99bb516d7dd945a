//! Top-level error aggregation and exit-code categories.
//!
//! Each module defines its own error enum; this module folds them into one
//! [`BuildError`] for callers that need a single type (the CLI), and maps
//! every error onto an [`ErrorCategory`] so exit codes stay stable.

use thiserror::Error;

use crate::cache::CacheError;
use crate::eval::EvalError;
use crate::executor::ExecuteError;
use crate::graph::GraphError;
use crate::lock::StateLockError;
use crate::pathset::PathSetError;
use crate::props::PropertyError;
use crate::resolver::ResolveError;

/// Coarse classification used for process exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
  /// A mistake in the build files or selection: fails fast, never retried.
  Configuration,
  /// One or more targets failed to build.
  Build,
  /// The run was cancelled by the user or a fatal-error shutdown.
  Cancelled,
  /// The engine itself could not proceed (cache write failure, lock I/O).
  Fatal,
}

impl ErrorCategory {
  /// Stable process exit code for this category.
  pub fn exit_code(self) -> i32 {
    match self {
      ErrorCategory::Build => 1,
      ErrorCategory::Configuration => 2,
      ErrorCategory::Cancelled => 3,
      ErrorCategory::Fatal => 4,
    }
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Eval(#[from] EvalError),

  #[error(transparent)]
  Property(#[from] PropertyError),

  #[error(transparent)]
  PathSet(#[from] PathSetError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error(transparent)]
  Lock(#[from] StateLockError),
}

impl BuildError {
  pub fn category(&self) -> ErrorCategory {
    match self {
      BuildError::Eval(_)
      | BuildError::Property(_)
      | BuildError::PathSet(_)
      | BuildError::Graph(_)
      | BuildError::Resolve(_) => ErrorCategory::Configuration,
      BuildError::Cache(e) => e.category(),
      BuildError::Execute(e) => e.category(),
      BuildError::Lock(_) => ErrorCategory::Fatal,
    }
  }
}
