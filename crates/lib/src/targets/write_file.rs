//! WriteFile target: generate a file from a property-expanded template.

use std::io::Write;

use crate::context::TargetContext;
use crate::path;
use crate::pathset::PathSetRef;
use crate::target::{Target, TargetError};

/// Writes the expanded template to the output file. The expanded content is
/// registered as an implicit input, so editing the template in the build
/// file (or changing a property it references) rebuilds the target even
/// though it has no file inputs.
pub struct WriteFile {
  content: String,
  sources: PathSetRef,
}

impl WriteFile {
  pub fn new(content: impl Into<String>, sources: PathSetRef) -> Self {
    Self {
      content: content.into(),
      sources,
    }
  }
}

impl Target for WriteFile {
  fn kind(&self) -> &'static str {
    "write-file"
  }

  fn sources(&self) -> PathSetRef {
    self.sources.clone()
  }

  fn run(&self, ctx: &TargetContext<'_>) -> Result<(), TargetError> {
    let content = ctx.expand(&self.content)?;
    let mut writer = ctx.open_for_write(&path::to_fs(ctx.output_path()))?;
    writer.write_all(content.as_bytes())?;
    writer.commit()?;
    Ok(())
  }

  fn implicit_inputs(&self, ctx: &TargetContext<'_>) -> Result<Vec<String>, TargetError> {
    Ok(vec![ctx.expand(&self.content)?])
  }
}
