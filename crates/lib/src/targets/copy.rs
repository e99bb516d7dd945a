//! Copy target: mirror a path-set into a destination file or directory.

use std::fs;
use std::io::{Read, Write};

use crate::context::TargetContext;
use crate::path;
use crate::pathset::PathSetRef;
use crate::target::{Target, TargetError};

/// Copies each resolved `(source, destination suffix)` pair beneath the
/// output directory, or a single source onto a file output. File writes go
/// through the atomic writer, and source modification times are preserved
/// where the platform allows so an unchanged file keeps its timestamp across
/// rebuilds of its sibling.
pub struct Copy {
  sources: PathSetRef,
}

impl Copy {
  pub fn new(sources: PathSetRef) -> Self {
    Self { sources }
  }

  fn copy_file(&self, ctx: &TargetContext<'_>, src: &str, dest: &std::path::Path) -> Result<(), TargetError> {
    let src_fs = path::to_fs(src);
    let mut reader = fs::File::open(&src_fs)?;
    let mut writer = ctx.open_for_write(dest)?;
    let mut buffer = [0u8; 8192];
    loop {
      ctx.check_cancelled()?;
      let n = reader.read(&mut buffer)?;
      if n == 0 {
        break;
      }
      writer.write_all(&buffer[..n])?;
    }
    writer.commit()?;
    preserve_mtime(&src_fs, dest)?;
    Ok(())
  }
}

impl Target for Copy {
  fn kind(&self) -> &'static str {
    "copy"
  }

  fn sources(&self) -> PathSetRef {
    self.sources.clone()
  }

  fn run(&self, ctx: &TargetContext<'_>) -> Result<(), TargetError> {
    let entries = ctx.sources_resolved()?;
    let output = ctx.output_path();

    if path::is_dir_path(output) {
      let out_root = path::to_fs(output);
      fs::create_dir_all(&out_root)?;
      for (src, dest) in &entries {
        let dest_path = out_root.join(dest.trim_end_matches('/'));
        if path::is_dir_path(src) {
          fs::create_dir_all(&dest_path)?;
        } else {
          self.copy_file(ctx, src, &dest_path)?;
        }
      }
      Ok(())
    } else {
      let files: Vec<&(String, String)> = entries.iter().filter(|(src, _)| !path::is_dir_path(src)).collect();
      if files.len() != 1 {
        return Err(TargetError::Message(format!(
          "a file copy needs exactly one source file, found {}",
          files.len()
        )));
      }
      self.copy_file(ctx, &files[0].0, &path::to_fs(output))
    }
  }
}

#[cfg(unix)]
fn preserve_mtime(src: &std::path::Path, dest: &std::path::Path) -> std::io::Result<()> {
  use rustix::fs::{AtFlags, CWD, Timespec, Timestamps, utimensat};
  use std::os::unix::fs::MetadataExt;

  let meta = fs::metadata(src)?;
  let stamps = Timestamps {
    last_access: Timespec {
      tv_sec: meta.atime(),
      tv_nsec: meta.atime_nsec() as _,
    },
    last_modification: Timespec {
      tv_sec: meta.mtime(),
      tv_nsec: meta.mtime_nsec() as _,
    },
  };
  utimensat(CWD, dest, &stamps, AtFlags::empty()).map_err(std::io::Error::from)?;
  Ok(())
}

#[cfg(not(unix))]
fn preserve_mtime(_src: &std::path::Path, _dest: &std::path::Path) -> std::io::Result<()> {
  Ok(())
}
