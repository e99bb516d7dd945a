//! The incremental cache: per-target input fingerprints persisted across
//! runs.
//!
//! A record stores the target's kind tag, a hash of its significant options
//! and implicit inputs, a hash of the sorted input path list, and one
//! fingerprint per input. Unchanged inputs are detected by `(size, mtime)`
//! alone; content digests are recomputed only when those differ, so a
//! no-change run stats files but hashes nothing.
//!
//! The cache file is a versioned JSON document. It is read once at
//! start-of-run (a missing, corrupt or version-mismatched file simply forces
//! a full rebuild), updated through a single writer task fed by a channel,
//! and flushed atomically (write to temp, rename) at end-of-run.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::CACHE_FORMAT_VERSION;
use crate::error::ErrorCategory;
use crate::path;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to serialize cache: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write cache file {file}: {source}")]
  Write {
    file: String,
    #[source]
    source: io::Error,
  },
}

impl CacheError {
  pub fn category(&self) -> ErrorCategory {
    ErrorCategory::Fatal
  }
}

/// Per-input fingerprint. Directory inputs use a recursive content digest
/// with zeroed size/mtime (directory mtimes are not trustworthy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub size: u64,
  pub mtime_ns: u128,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
  /// Kind tag of the producing target class; a change invalidates.
  pub kind: String,
  /// Hash over significant option values and implicit inputs.
  pub options_hash: String,
  /// Hash over the sorted list of absolute input paths.
  pub inputs_hash: String,
  /// Fingerprint per input path.
  pub fingerprints: BTreeMap<String, Fingerprint>,
  /// Unix seconds of the last successful build.
  pub last_success_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
  pub version: u32,
  pub records: BTreeMap<String, CacheRecord>,
}

impl Default for CacheFile {
  fn default() -> Self {
    Self {
      version: CACHE_FORMAT_VERSION,
      records: BTreeMap::new(),
    }
  }
}

impl CacheFile {
  /// Load the cache, degrading to an empty cache (full rebuild) on any
  /// problem. Version mismatches never attempt a partial upgrade.
  pub fn load(file: &Path) -> Self {
    let content = match fs::read_to_string(file) {
      Ok(c) => c,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
      Err(e) => {
        warn!(file = %file.display(), error = %e, "could not read cache, forcing full rebuild");
        return Self::default();
      }
    };
    match serde_json::from_str::<CacheFile>(&content) {
      Ok(cache) if cache.version == CACHE_FORMAT_VERSION => cache,
      Ok(cache) => {
        warn!(
          found = cache.version,
          expected = CACHE_FORMAT_VERSION,
          "cache format version mismatch, forcing full rebuild"
        );
        Self::default()
      }
      Err(e) => {
        warn!(file = %file.display(), error = %e, "corrupt cache, forcing full rebuild");
        Self::default()
      }
    }
  }

  /// Atomically persist the cache (write temp sibling, rename over).
  pub fn flush(&self, file: &Path) -> Result<(), CacheError> {
    if let Some(parent) = file.parent() {
      fs::create_dir_all(parent).map_err(|source| CacheError::Write {
        file: file.display().to_string(),
        source,
      })?;
    }
    let tmp = file.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(self).map_err(CacheError::Serialize)?;
    fs::write(&tmp, &content).map_err(|source| CacheError::Write {
      file: tmp.display().to_string(),
      source,
    })?;
    fs::rename(&tmp, file).map_err(|source| CacheError::Write {
      file: file.display().to_string(),
      source,
    })?;
    Ok(())
  }
}

/// An update submitted by a worker after a target completes.
#[derive(Debug)]
pub enum CacheUpdate {
  Record { target: String, record: CacheRecord },
  Remove { target: String },
}

/// Spawn the single cache-writer task. Workers submit [`CacheUpdate`]s; the
/// task serializes them into the in-memory cache and hands it back when the
/// last sender is dropped.
pub fn spawn_writer(
  mut cache: CacheFile,
) -> (mpsc::UnboundedSender<CacheUpdate>, tokio::task::JoinHandle<CacheFile>) {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let handle = tokio::spawn(async move {
    while let Some(update) = rx.recv().await {
      match update {
        CacheUpdate::Record { target, record } => {
          cache.records.insert(target, record);
        }
        CacheUpdate::Remove { target } => {
          cache.records.remove(&target);
        }
      }
    }
    cache
  });
  (tx, handle)
}

// ---------------------------------------------------------------------------
// Digests

/// SHA-256 of a file's bytes, hex-encoded.
pub fn digest_file(file: &Path) -> io::Result<String> {
  let mut reader = BufReader::new(File::open(file)?);
  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];
  loop {
    let n = reader.read(&mut buffer)?;
    if n == 0 {
      break;
    }
    hasher.update(&buffer[..n]);
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Digest a directory as the hash of its sorted `(relative path, digest)`
/// stream.
pub fn digest_dir(dir: &Path) -> io::Result<String> {
  let mut entries: Vec<(String, String)> = Vec::new();
  for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(io::Error::other)?;
    if !entry.file_type().is_file() {
      continue;
    }
    let rel = entry
      .path()
      .strip_prefix(dir)
      .map(|p| p.to_string_lossy().replace('\\', "/"))
      .unwrap_or_default();
    entries.push((rel, digest_file(entry.path())?));
  }
  entries.sort();
  let mut hasher = Sha256::new();
  for (rel, digest) in entries {
    hasher.update(rel.as_bytes());
    hasher.update(b"\0");
    hasher.update(digest.as_bytes());
    hasher.update(b"\n");
  }
  Ok(hex::encode(hasher.finalize()))
}

/// Digest an input path, dispatching on the dir-marking convention.
pub fn digest_input(input: &str) -> io::Result<String> {
  let fs_path = path::to_fs(input);
  if path::is_dir_path(input) {
    digest_dir(&fs_path)
  } else {
    digest_file(&fs_path)
  }
}

/// Like [`digest_input`], but a vanished input is `None` rather than an
/// error (it just means the target must rebuild).
fn digest_if_present(input: &str) -> io::Result<Option<String>> {
  match digest_input(input) {
    Ok(digest) => Ok(Some(digest)),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  }
}

/// Hash a list of lines (used for the input path list and the significant
/// options).
pub fn hash_lines<S: AsRef<str>>(lines: &[S]) -> String {
  let mut hasher = Sha256::new();
  for line in lines {
    hasher.update(line.as_ref().as_bytes());
    hasher.update(b"\n");
  }
  hex::encode(hasher.finalize())
}

/// Stat-only fingerprint of a file (no digest).
pub fn stat_fingerprint(file: &Path) -> io::Result<Fingerprint> {
  let meta = fs::metadata(file)?;
  Ok(Fingerprint {
    size: meta.len(),
    mtime_ns: mtime_ns(&meta)?,
    digest: None,
  })
}

pub fn mtime_ns(meta: &fs::Metadata) -> io::Result<u128> {
  let mtime = meta.modified()?;
  Ok(
    mtime
      .duration_since(UNIX_EPOCH)
      .map_err(|e| io::Error::other(format!("mtime before epoch: {e}")))?
      .as_nanos(),
  )
}

fn now_unix() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

// ---------------------------------------------------------------------------
// Up-to-date decisions

/// Why a target must rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
  NoRecord,
  KindChanged,
  OptionsChanged,
  InputSetChanged,
  InputChanged(String),
  OutputMissing,
  OutputOlderThan(String),
  Forced,
  MarkedDirty(String),
}

impl std::fmt::Display for RebuildReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RebuildReason::NoRecord => write!(f, "no cache record"),
      RebuildReason::KindChanged => write!(f, "target implementation changed"),
      RebuildReason::OptionsChanged => write!(f, "significant options changed"),
      RebuildReason::InputSetChanged => write!(f, "set of input paths changed"),
      RebuildReason::InputChanged(p) => write!(f, "input content changed: {p}"),
      RebuildReason::OutputMissing => write!(f, "output is missing"),
      RebuildReason::OutputOlderThan(p) => write!(f, "output is older than input {p}"),
      RebuildReason::Forced => write!(f, "rebuild requested"),
      RebuildReason::MarkedDirty(dep) => write!(f, "dependency rebuilt: {dep}"),
    }
  }
}

/// What the up-to-date check concluded.
#[derive(Debug)]
pub enum UpToDate {
  /// Skip the target. If stat data moved while content did not, `refreshed`
  /// carries the record to write back.
  Yes { refreshed: Option<CacheRecord> },
  No(RebuildReason),
}

/// Everything the decision needs about the target's current shape.
#[derive(Debug)]
pub struct Probe<'a> {
  pub kind: &'a str,
  pub options_hash: &'a str,
  /// Sorted absolute input paths (target deps already mapped to stamp
  /// files).
  pub input_paths: &'a [String],
  /// Output file, or the stamp file for directory targets.
  pub output_anchor: &'a Path,
}

/// Decide skip vs rebuild per the cache contract.
pub fn check_up_to_date(record: Option<&CacheRecord>, probe: &Probe<'_>) -> io::Result<UpToDate> {
  let Some(record) = record else {
    return Ok(UpToDate::No(RebuildReason::NoRecord));
  };
  if record.kind != probe.kind {
    return Ok(UpToDate::No(RebuildReason::KindChanged));
  }
  if record.options_hash != probe.options_hash {
    return Ok(UpToDate::No(RebuildReason::OptionsChanged));
  }
  if record.inputs_hash != hash_lines(probe.input_paths) {
    return Ok(UpToDate::No(RebuildReason::InputSetChanged));
  }

  let output_meta = match fs::metadata(probe.output_anchor) {
    Ok(m) => m,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      return Ok(UpToDate::No(RebuildReason::OutputMissing));
    }
    Err(e) => return Err(e),
  };
  let output_mtime = mtime_ns(&output_meta)?;

  let mut refreshed: Option<CacheRecord> = None;
  for input in probe.input_paths {
    let recorded = record.fingerprints.get(input);
    if path::is_dir_path(input) {
      // directory input: mtime is meaningless, compare content digests
      let Some(digest) = digest_if_present(input)? else {
        return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone())));
      };
      match recorded.and_then(|f| f.digest.as_ref()) {
        Some(prev) if *prev == digest => continue,
        _ => return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone()))),
      }
    }

    let meta = match fs::metadata(path::to_fs(input)) {
      Ok(m) => m,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone())));
      }
      Err(e) => return Err(e),
    };
    let mtime = mtime_ns(&meta)?;
    if mtime > output_mtime {
      return Ok(UpToDate::No(RebuildReason::OutputOlderThan(input.clone())));
    }

    let Some(recorded) = recorded else {
      return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone())));
    };
    if recorded.size == meta.len() && recorded.mtime_ns == mtime {
      continue;
    }
    // stat moved: fall back to content comparison
    let Some(digest) = digest_if_present(input)? else {
      return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone())));
    };
    if recorded.digest.as_deref() != Some(digest.as_str()) {
      return Ok(UpToDate::No(RebuildReason::InputChanged(input.clone())));
    }
    debug!(input = %input, "stat changed but content identical, refreshing fingerprint");
    let target_record = refreshed.get_or_insert_with(|| record.clone());
    target_record.fingerprints.insert(
      input.clone(),
      Fingerprint {
        size: meta.len(),
        mtime_ns: mtime,
        digest: Some(digest),
      },
    );
  }

  Ok(UpToDate::Yes { refreshed })
}

/// Build the record for a target that just succeeded: digest every input at
/// this moment so the cache is coherent with what the build consumed.
pub fn capture_record(kind: &str, options_hash: &str, input_paths: &[String]) -> io::Result<CacheRecord> {
  let mut fingerprints = BTreeMap::new();
  for input in input_paths {
    let fp = if path::is_dir_path(input) {
      Fingerprint {
        size: 0,
        mtime_ns: 0,
        digest: Some(digest_input(input)?),
      }
    } else {
      let meta = fs::metadata(path::to_fs(input))?;
      Fingerprint {
        size: meta.len(),
        mtime_ns: mtime_ns(&meta)?,
        digest: Some(digest_file(&path::to_fs(input))?),
      }
    };
    fingerprints.insert(input.clone(), fp);
  }
  Ok(CacheRecord {
    kind: kind.to_string(),
    options_hash: options_hash.to_string(),
    inputs_hash: hash_lines(input_paths),
    fingerprints,
    last_success_unix: now_unix(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let p = dir.join(name);
    let mut f = File::create(&p).unwrap();
    f.write_all(content.as_bytes()).unwrap();
    p
  }

  #[test]
  fn digest_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let f = write_file(tmp.path(), "x.txt", "hello world");
    assert_eq!(
      digest_file(&f).unwrap(),
      "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
  }

  #[test]
  fn dir_digest_tracks_content_and_names() {
    let tmp = tempfile::tempdir().unwrap();
    write_file(tmp.path(), "a.txt", "a");
    write_file(tmp.path(), "b.txt", "b");
    let d1 = digest_dir(tmp.path()).unwrap();

    write_file(tmp.path(), "b.txt", "B");
    let d2 = digest_dir(tmp.path()).unwrap();
    assert_ne!(d1, d2);

    write_file(tmp.path(), "b.txt", "b");
    assert_eq!(digest_dir(tmp.path()).unwrap(), d1);
  }

  #[test]
  fn load_missing_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = CacheFile::load(&tmp.path().join("cache.json"));
    assert!(cache.records.is_empty());
  }

  #[test]
  fn load_version_mismatch_forces_full_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("cache.json");
    std::fs::write(&file, r#"{"version": 1, "records": {"x": {"kind":"k","options_hash":"","inputs_hash":"","fingerprints":{},"last_success_unix":0}}}"#).unwrap();
    let cache = CacheFile::load(&file);
    assert!(cache.records.is_empty());
  }

  #[test]
  fn load_corrupt_forces_full_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("cache.json");
    std::fs::write(&file, "{not json").unwrap();
    assert!(CacheFile::load(&file).records.is_empty());
  }

  #[test]
  fn flush_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("cache.json");
    let mut cache = CacheFile::default();
    cache.records.insert(
      "/out/a".into(),
      CacheRecord {
        kind: "copy".into(),
        options_hash: "oh".into(),
        inputs_hash: "ih".into(),
        fingerprints: BTreeMap::new(),
        last_success_unix: 1,
      },
    );
    cache.flush(&file).unwrap();
    let loaded = CacheFile::load(&file);
    assert_eq!(loaded.records, cache.records);
  }

  fn probe_inputs(tmp: &Path, content: &str) -> (String, std::path::PathBuf, std::path::PathBuf) {
    let input = write_file(tmp, "in.txt", content);
    let output = write_file(tmp, "out.txt", "built");
    (path::from_fs(&input, false), input, output)
  }

  #[test]
  fn no_record_rebuilds() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, _, output) = probe_inputs(tmp.path(), "v1");
    let inputs = vec![input];
    let probe = Probe {
      kind: "copy",
      options_hash: "oh",
      input_paths: &inputs,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(None, &probe).unwrap(),
      UpToDate::No(RebuildReason::NoRecord)
    ));
  }

  #[test]
  fn unchanged_inputs_skip() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, _, output) = probe_inputs(tmp.path(), "v1");
    let inputs = vec![input];
    let record = capture_record("copy", "oh", &inputs).unwrap();
    // output must be at least as new as the input
    filetime_touch(&output);
    let probe = Probe {
      kind: "copy",
      options_hash: "oh",
      input_paths: &inputs,
      output_anchor: &output,
    };
    match check_up_to_date(Some(&record), &probe).unwrap() {
      UpToDate::Yes { refreshed } => assert!(refreshed.is_none()),
      UpToDate::No(reason) => panic!("expected skip, got {reason}"),
    }
  }

  #[test]
  fn kind_and_options_changes_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, _, output) = probe_inputs(tmp.path(), "v1");
    let inputs = vec![input];
    let record = capture_record("copy", "oh", &inputs).unwrap();

    let probe = Probe {
      kind: "archive",
      options_hash: "oh",
      input_paths: &inputs,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(Some(&record), &probe).unwrap(),
      UpToDate::No(RebuildReason::KindChanged)
    ));

    let probe = Probe {
      kind: "copy",
      options_hash: "other",
      input_paths: &inputs,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(Some(&record), &probe).unwrap(),
      UpToDate::No(RebuildReason::OptionsChanged)
    ));
  }

  #[test]
  fn changed_content_rebuilds_touched_content_refreshes() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, input_fs, output) = probe_inputs(tmp.path(), "v1");
    let inputs = vec![input.clone()];
    let record = capture_record("copy", "oh", &inputs).unwrap();

    // rewrite with different content
    std::fs::write(&input_fs, "v2").unwrap();
    filetime_touch(&output);
    let probe = Probe {
      kind: "copy",
      options_hash: "oh",
      input_paths: &inputs,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(Some(&record), &probe).unwrap(),
      UpToDate::No(RebuildReason::InputChanged(p)) if p == input
    ));

    // rewrite with identical content but a new mtime: refresh, no rebuild
    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::write(&input_fs, "v1").unwrap();
    filetime_touch(&output);
    match check_up_to_date(Some(&record), &probe).unwrap() {
      UpToDate::Yes { refreshed } => {
        let refreshed = refreshed.expect("fingerprint refresh expected");
        assert!(refreshed.fingerprints[&input].digest.is_some());
      }
      UpToDate::No(reason) => panic!("expected refresh-skip, got {reason}"),
    }
  }

  #[test]
  fn missing_output_rebuilds() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, _, output) = probe_inputs(tmp.path(), "v1");
    let inputs = vec![input];
    let record = capture_record("copy", "oh", &inputs).unwrap();
    std::fs::remove_file(&output).unwrap();
    let probe = Probe {
      kind: "copy",
      options_hash: "oh",
      input_paths: &inputs,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(Some(&record), &probe).unwrap(),
      UpToDate::No(RebuildReason::OutputMissing)
    ));
  }

  #[test]
  fn removed_input_changes_input_set() {
    let tmp = tempfile::tempdir().unwrap();
    let (input, _, output) = probe_inputs(tmp.path(), "v1");
    let record = capture_record("copy", "oh", &[input]).unwrap();
    let fewer: Vec<String> = Vec::new();
    let probe = Probe {
      kind: "copy",
      options_hash: "oh",
      input_paths: &fewer,
      output_anchor: &output,
    };
    assert!(matches!(
      check_up_to_date(Some(&record), &probe).unwrap(),
      UpToDate::No(RebuildReason::InputSetChanged)
    ));
  }

  /// Bump a file's mtime to now (content unchanged).
  fn filetime_touch(p: &Path) {
    let content = std::fs::read(p).unwrap();
    std::fs::write(p, content).unwrap();
  }
}
