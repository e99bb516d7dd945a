mod build;
mod query;

use anyhow::Result;

use crate::Cli;

/// Dispatch the parsed command line. Returns the process exit code.
pub fn run(cli: &Cli) -> Result<u8> {
  build::cmd_build(cli)
}

pub(crate) use query::run_query;
