//! The facade handed to targets while they build.
//!
//! [`BuildContext`] is the run-wide view: frozen model, artifact collection
//! and the cooperative cancellation flag. [`TargetContext`] narrows it to a
//! single target execution: effective options, the buffered log, the
//! lazily-created work directory and atomic output writing.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::executor::logbuffer::TargetLog;
use crate::graph::BuildModel;
use crate::path;
use crate::pathset::{self, Entry};
use crate::props::{OptionMap, PropertyError};
use crate::target::{TargetEntry, TargetError};

/// An output published by a target for surfacing after the run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Artifact {
  pub category: String,
  pub path: String,
}

/// Run-wide shared state.
pub struct BuildContext {
  pub model: std::sync::Arc<BuildModel>,
  cancelled: AtomicBool,
  cancel_notify: Notify,
  artifacts: Mutex<Vec<Artifact>>,
}

impl BuildContext {
  pub fn new(model: std::sync::Arc<BuildModel>) -> Self {
    Self {
      model,
      cancelled: AtomicBool::new(false),
      cancel_notify: Notify::new(),
      artifacts: Mutex::new(Vec::new()),
    }
  }

  /// Ask the run to stop: no new targets dispatch, running targets observe
  /// the flag at their next check.
  pub fn request_cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
    self.cancel_notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// Wait until cancellation is requested.
  pub async fn cancelled_wait(&self) {
    while !self.is_cancelled() {
      self.cancel_notify.notified().await;
    }
  }

  pub fn publish_artifact(&self, category: impl Into<String>, artifact_path: impl Into<String>) {
    self.artifacts.lock().unwrap().push(Artifact {
      category: category.into(),
      path: artifact_path.into(),
    });
  }

  /// Published artifacts, sorted by (category, path): ordering across
  /// parallel targets is unspecified, so the report is made deterministic
  /// here.
  pub fn artifacts(&self) -> Vec<Artifact> {
    let mut artifacts = self.artifacts.lock().unwrap().clone();
    artifacts.sort();
    artifacts
  }
}

/// Per-target execution facade.
pub struct TargetContext<'a> {
  build: &'a BuildContext,
  entry: &'a TargetEntry,
  options: &'a OptionMap,
  log: &'a TargetLog,
}

impl<'a> TargetContext<'a> {
  pub fn new(build: &'a BuildContext, entry: &'a TargetEntry, options: &'a OptionMap, log: &'a TargetLog) -> Self {
    Self {
      build,
      entry,
      options,
      log,
    }
  }

  /// Recursive property substitution.
  pub fn expand(&self, input: &str) -> Result<String, PropertyError> {
    self.build.model.props.expand(input)
  }

  /// Expand and absolutize a path, resolving relative input against the
  /// target's declaring build file.
  pub fn resolve_path(&self, input: &str) -> Result<String, PropertyError> {
    let expanded = self.expand(input)?;
    if path::is_absolute(&expanded) {
      return Ok(path::normalize(&expanded));
    }
    match self.entry.spec.location.dir() {
      Some(dir) => Ok(path::join_normalize(&dir, &expanded)),
      None => Err(PropertyError::RelativePathAfterParse { input: expanded }),
    }
  }

  /// Effective options (defaults overlaid with global and per-target
  /// overrides), immutable.
  pub fn options(&self) -> &OptionMap {
    self.options
  }

  /// The target's resolved output path (dir-marked for directory targets).
  pub fn output_path(&self) -> &str {
    &self.entry.path
  }

  pub fn log(&self) -> &TargetLog {
    self.log
  }

  pub fn publish_artifact(&self, category: impl Into<String>, artifact_path: impl Into<String>) {
    self.build.publish_artifact(category, artifact_path);
  }

  pub fn is_cancelled(&self) -> bool {
    self.build.is_cancelled()
  }

  /// Bail out if cancellation was requested. Long-running targets should
  /// call this between units of work.
  pub fn check_cancelled(&self) -> Result<(), TargetError> {
    if self.is_cancelled() {
      Err(TargetError::Cancelled)
    } else {
      Ok(())
    }
  }

  /// The per-target scratch directory, created on first use and removed
  /// only by clean.
  pub fn work_dir(&self) -> Result<PathBuf, TargetError> {
    let dir = self.build.model.state.work_dir(&self.entry.path);
    fs::create_dir_all(&dir)?;
    Ok(dir)
  }

  /// The stamp file anchoring a directory target's mtime.
  pub fn stamp_file(&self) -> PathBuf {
    self.build.model.state.stamp_file(&self.entry.path)
  }

  /// Resolve the target's explicit dependency set, enforcing the
  /// destination-suffix policy unless the target opted out.
  pub fn sources_resolved(&self) -> Result<Vec<Entry>, TargetError> {
    let sources = self.entry.imp.sources();
    let entries = sources.resolve(self.build.model.as_ref())?;
    if !self.entry.spec.permit_dest_up_paths {
      pathset::ensure_dest_within(&entries, sources.location())?;
    }
    Ok(entries)
  }

  /// Open `dest` for atomic writing: bytes land in a sibling temp file that
  /// replaces `dest` only on [`AtomicFile::commit`], so a partial write can
  /// never become another target's input.
  pub fn open_for_write(&self, dest: &Path) -> Result<AtomicFile, TargetError> {
    AtomicFile::create(dest).map_err(TargetError::Io)
  }

  /// Default clean: remove the declared output, the stamp file and the
  /// work directory. Idempotent.
  pub fn clean_declared_outputs(&self) -> Result<(), TargetError> {
    let output = path::to_fs(&self.entry.path);
    if self.entry.is_dir_target() {
      remove_dir_if_present(&output)?;
    } else {
      remove_file_if_present(&output)?;
    }
    remove_file_if_present(&self.stamp_file())?;
    remove_dir_if_present(&self.build.model.state.work_dir(&self.entry.path))?;
    Ok(())
  }
}

fn remove_file_if_present(p: &Path) -> io::Result<()> {
  match fs::remove_file(p) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

fn remove_dir_if_present(p: &Path) -> io::Result<()> {
  match fs::remove_dir_all(p) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e),
  }
}

/// Write-to-temp-then-rename file handle.
pub struct AtomicFile {
  tmp: PathBuf,
  dest: PathBuf,
  file: Option<File>,
}

impl AtomicFile {
  pub fn create(dest: &Path) -> io::Result<Self> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let file_name = dest
      .file_name()
      .ok_or_else(|| io::Error::other(format!("not a file path: {}", dest.display())))?
      .to_string_lossy();
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));
    let file = File::create(&tmp)?;
    Ok(Self {
      tmp,
      dest: dest.to_path_buf(),
      file: Some(file),
    })
  }

  /// Flush and rename over the destination.
  pub fn commit(mut self) -> io::Result<()> {
    let mut file = self.file.take().expect("commit called twice");
    file.flush()?;
    file.sync_all()?;
    drop(file);
    fs::rename(&self.tmp, &self.dest)
  }

  pub fn dest(&self) -> &Path {
    &self.dest
  }
}

impl Write for AtomicFile {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.file.as_mut().expect("file already committed").write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.file.as_mut().expect("file already committed").flush()
  }
}

impl Drop for AtomicFile {
  fn drop(&mut self) {
    if self.file.take().is_some() {
      let _ = fs::remove_file(&self.tmp);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn atomic_file_commits_via_rename() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("sub").join("out.txt");
    let mut writer = AtomicFile::create(&dest).unwrap();
    writer.write_all(b"content").unwrap();
    assert!(!dest.exists(), "dest must not exist before commit");
    writer.commit().unwrap();
    assert_eq!(fs::read_to_string(&dest).unwrap(), "content");
  }

  #[test]
  fn atomic_file_discards_on_drop() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("out.txt");
    {
      let mut writer = AtomicFile::create(&dest).unwrap();
      writer.write_all(b"junk").unwrap();
    }
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0, "temp file must be gone");
  }
}
