//! Build-file loading.
//!
//! Each loaded file is pushed onto the parse include stack for the duration
//! of its execution, so registrations and errors carry the location of the
//! file actually being evaluated, including through nested `bake.include`
//! calls.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;
use tracing::debug;

use crate::eval::ParseState;
use crate::path;

/// Load and execute one build file.
pub fn load_build_file(lua: &Lua, state: &Rc<RefCell<ParseState>>, file: &Path) -> LuaResult<()> {
  let canonical = file
    .canonicalize()
    .map_err(|e| LuaError::external(format!("cannot resolve build file '{}': {e}", file.display())))?;
  let content = fs::read_to_string(&canonical)
    .map_err(|e| LuaError::external(format!("cannot read build file '{}': {e}", canonical.display())))?;

  let normalized = path::from_fs(&canonical, false);
  debug!(file = %normalized, "evaluating build file");

  state.borrow_mut().include_stack.push(normalized);
  let result = lua
    .load(&content)
    .set_name(format!("@{}", canonical.display()))
    .exec();
  state.borrow_mut().include_stack.pop();
  result
}

/// Resolve an include path against the including build file's directory.
pub fn resolve_include(state: &Rc<RefCell<ParseState>>, include: &str) -> LuaResult<std::path::PathBuf> {
  if path::is_absolute(include) {
    return Ok(path::to_fs(include));
  }
  let dir = state
    .borrow()
    .current_dir()
    .ok_or_else(|| LuaError::external(format!("cannot resolve relative include '{include}'")))?;
  Ok(path::to_fs(&path::join_normalize(&dir, include)))
}
