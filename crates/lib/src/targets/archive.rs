//! Archive target: pack a path-set into a tar archive.

use crate::context::TargetContext;
use crate::path;
use crate::pathset::PathSetRef;
use crate::target::{Target, TargetError};

/// Builds a tar archive of the resolved entries, addressed by their
/// destination suffixes. Entries arrive sorted from path-set resolution, so
/// archive layout is stable run to run. The archive is written through the
/// atomic writer and only renamed into place once complete.
pub struct Archive {
  sources: PathSetRef,
}

impl Archive {
  pub fn new(sources: PathSetRef) -> Self {
    Self { sources }
  }
}

impl Target for Archive {
  fn kind(&self) -> &'static str {
    "archive"
  }

  fn sources(&self) -> PathSetRef {
    self.sources.clone()
  }

  fn run(&self, ctx: &TargetContext<'_>) -> Result<(), TargetError> {
    let entries = ctx.sources_resolved()?;
    let writer = ctx.open_for_write(&path::to_fs(ctx.output_path()))?;
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for (src, dest) in &entries {
      ctx.check_cancelled()?;
      let src_fs = path::to_fs(src);
      if path::is_dir_path(src) {
        builder.append_dir(dest.trim_end_matches('/'), &src_fs)?;
      } else {
        builder.append_path_with_name(&src_fs, dest)?;
      }
    }

    let writer = builder.into_inner()?;
    writer.commit()?;
    ctx.publish_artifact("archive", ctx.output_path());
    Ok(())
  }
}
