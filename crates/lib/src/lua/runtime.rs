use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use crate::eval::ParseState;
use crate::lua::globals;

/// Create a Lua VM with the `bake` global registered against `state`.
pub fn create_runtime(state: Rc<RefCell<ParseState>>) -> LuaResult<Lua> {
  let lua = Lua::new();
  globals::register_globals(&lua, state)?;
  Ok(lua)
}
