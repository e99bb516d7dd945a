//! On-disk state layout.
//!
//! Every build output root owns a single state directory holding the
//! incremental cache, per-target work directories, stamp files for directory
//! targets, and the build lock:
//!
//! ```text
//! <OUTPUT_DIR>/.bake/
//! ├── cache.json        incremental cache (versioned)
//! ├── .lock             exclusive while a build runs
//! ├── stamps/<id>       one stamp file per directory target
//! └── work/<id>/        per-target scratch space
//! ```
//!
//! Target paths are mangled into short, filesystem-safe ids: the base name
//! plus a truncated SHA-256 of the full path, so distinct targets can never
//! collide after sanitization.

use std::io;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::consts::{HASH_PREFIX_LEN, STATE_DIR_NAME};
use crate::path;

#[derive(Debug, Clone)]
pub struct StatePaths {
  /// Absolute state directory, dir-marked.
  root: String,
}

impl StatePaths {
  /// The state directory for a build output root (a dir-marked absolute
  /// path).
  pub fn for_output_root(output_root: &str) -> Self {
    let root = format!("{}/{STATE_DIR_NAME}/", output_root.trim_end_matches('/'));
    Self { root }
  }

  pub fn root(&self) -> &str {
    &self.root
  }

  pub fn cache_file(&self) -> PathBuf {
    path::to_fs(&self.root).join("cache.json")
  }

  pub fn lock_file(&self) -> PathBuf {
    path::to_fs(&self.root).join(".lock")
  }

  pub fn work_dir(&self, target_path: &str) -> PathBuf {
    path::to_fs(&self.root).join("work").join(mangle(target_path))
  }

  pub fn stamp_file(&self, target_path: &str) -> PathBuf {
    path::to_fs(&self.root).join("stamps").join(mangle(target_path))
  }

  /// Create the fixed parts of the layout.
  pub fn ensure_layout(&self) -> io::Result<()> {
    let root = path::to_fs(&self.root);
    std::fs::create_dir_all(root.join("work"))?;
    std::fs::create_dir_all(root.join("stamps"))?;
    Ok(())
  }
}

/// Mangle a target path into a stable directory-entry name.
pub fn mangle(target_path: &str) -> String {
  let base = path::base_name(target_path);
  let base = base.trim_end_matches('/');
  let sanitized: String = base
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
    .collect();
  let mut hasher = Sha256::new();
  hasher.update(target_path.as_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("{sanitized}.{}", &digest[..HASH_PREFIX_LEN])
}
