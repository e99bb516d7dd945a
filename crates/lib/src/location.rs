//! Build-file locations attached to configuration errors.

use serde::{Deserialize, Serialize};

/// Where in the build files something was declared.
///
/// Captured from the parse include stack at registration time, so errors
/// surfaced long after parsing (dependency resolution, path-set evaluation)
/// still point at the build file that caused them rather than at engine
/// internals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
  /// Absolute path of the build file, if known.
  pub file: Option<String>,
  /// 1-based line within the file, when the evaluator can supply it.
  pub line: Option<u32>,
}

impl Location {
  pub fn new(file: impl Into<String>) -> Self {
    Self {
      file: Some(file.into()),
      line: None,
    }
  }

  pub fn with_line(file: impl Into<String>, line: u32) -> Self {
    Self {
      file: Some(file.into()),
      line: Some(line),
    }
  }

  /// An unknown location, used for programmatic registrations.
  pub fn unknown() -> Self {
    Self::default()
  }

  pub fn is_known(&self) -> bool {
    self.file.is_some()
  }

  /// Directory of the declaring build file, used to resolve relative paths
  /// captured during parse. `None` after parse has ended.
  pub fn dir(&self) -> Option<String> {
    let file = self.file.as_ref()?;
    let trimmed = file.trim_end_matches('/');
    trimmed.rfind('/').map(|i| format!("{}/", &trimmed[..i]))
  }
}

impl std::fmt::Display for Location {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (&self.file, self.line) {
      (Some(file), Some(line)) => write!(f, "{file}:{line}"),
      (Some(file), None) => write!(f, "{file}"),
      (None, _) => write!(f, "<unknown build file>"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_forms() {
    assert_eq!(Location::with_line("/b/build.lua", 4).to_string(), "/b/build.lua:4");
    assert_eq!(Location::new("/b/build.lua").to_string(), "/b/build.lua");
    assert_eq!(Location::unknown().to_string(), "<unknown build file>");
  }

  #[test]
  fn dir_of_file() {
    assert_eq!(Location::new("/b/sub/build.lua").dir().as_deref(), Some("/b/sub/"));
    assert_eq!(Location::unknown().dir(), None);
  }
}
