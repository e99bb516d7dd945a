//! Shared helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// Path to a fixture build file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Isolated build tree: every test gets its own directory holding the build
/// file, sources and output root.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Copy a fixture in as `build.lua`.
  pub fn from_fixture(name: &str) -> Self {
    let env = Self::new();
    let content = std::fs::read_to_string(fixture_path(name))
      .unwrap_or_else(|e| panic!("failed to load fixture {name}: {e}"));
    env.write("build.lua", &content);
    env
  }

  pub fn new() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  pub fn write(&self, rel: &str, content: &str) {
    let p = self.temp.path().join(rel);
    std::fs::create_dir_all(p.parent().unwrap()).unwrap();
    std::fs::write(p, content).unwrap();
  }

  pub fn read(&self, rel: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(rel))
      .unwrap_or_else(|e| panic!("failed to read {rel}: {e}"))
  }

  pub fn exists(&self, rel: &str) -> bool {
    self.temp.path().join(rel).exists()
  }

  /// A `bake` command rooted in this build tree.
  pub fn bake(&self) -> Command {
    let mut cmd = Command::cargo_bin("bake").unwrap();
    cmd.current_dir(self.temp.path());
    cmd
  }
}
