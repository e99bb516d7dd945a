//! Path-set userdata and conversions from Lua values.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use crate::eval::ParseState;
use crate::location::Location;
use crate::pathset::{BaseDir, PathSet, PathSetKind, PathSetRef};

/// A path-set handle exposed to build files. Derivation methods return new
/// handles; the underlying sets stay immutable.
#[derive(Clone)]
pub struct LuaPathSet(pub PathSetRef);

impl LuaUserData for LuaPathSet {
  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method("prefix", |_, this, prefix: String| {
      PathSet::new(
        PathSetKind::DestPrefixed {
          inner: this.0.clone(),
          prefix,
        },
        this.0.location().clone(),
      )
      .map(LuaPathSet)
      .map_err(LuaError::external)
    });

    methods.add_method("flatten", |_, this, ()| {
      PathSet::new(
        PathSetKind::DestFlattened { inner: this.0.clone() },
        this.0.location().clone(),
      )
      .map(LuaPathSet)
      .map_err(LuaError::external)
    });

    methods.add_method("filter", |_, this, pattern: String| {
      PathSet::new(
        PathSetKind::Filtered {
          inner: this.0.clone(),
          pattern,
        },
        this.0.location().clone(),
      )
      .map(LuaPathSet)
      .map_err(LuaError::external)
    });

    methods.add_method("rename", |_, this, dest: String| {
      PathSet::new(
        PathSetKind::DestRenamed {
          inner: this.0.clone(),
          dest,
        },
        this.0.location().clone(),
      )
      .map(LuaPathSet)
      .map_err(LuaError::external)
    });
  }
}

fn current_location(state: &Rc<RefCell<ParseState>>) -> Location {
  state.borrow().current_location()
}

/// Convert a Lua value (string, list table, or path-set userdata) into a
/// path-set, preserving declaration order.
pub fn to_pathset(state: &Rc<RefCell<ParseState>>, value: LuaValue) -> LuaResult<PathSetRef> {
  let location = current_location(state);
  let mut parts: Vec<PathSetRef> = Vec::new();
  let mut literals: Vec<String> = Vec::new();
  collect(state, value, &mut parts, &mut literals, &location)?;
  flush_literals(&mut parts, &mut literals, &location)?;

  match parts.len() {
    1 => Ok(parts.into_iter().next().unwrap()),
    _ => PathSet::new(PathSetKind::Compound { parts }, location).map_err(LuaError::external),
  }
}

fn flush_literals(parts: &mut Vec<PathSetRef>, literals: &mut Vec<String>, location: &Location) -> LuaResult<()> {
  if literals.is_empty() {
    return Ok(());
  }
  let set = PathSet::of(std::mem::take(literals), location.clone()).map_err(LuaError::external)?;
  parts.push(set);
  Ok(())
}

fn collect(
  state: &Rc<RefCell<ParseState>>,
  value: LuaValue,
  parts: &mut Vec<PathSetRef>,
  literals: &mut Vec<String>,
  location: &Location,
) -> LuaResult<()> {
  match value {
    LuaValue::String(s) => {
      literals.push(s.to_str()?.to_string());
      Ok(())
    }
    LuaValue::UserData(ud) => {
      let set = ud.borrow::<LuaPathSet>()?;
      flush_literals(parts, literals, location)?;
      parts.push(set.0.clone());
      Ok(())
    }
    LuaValue::Table(table) => {
      for item in table.sequence_values::<LuaValue>() {
        collect(state, item?, parts, literals, location)?;
      }
      Ok(())
    }
    LuaValue::Nil => Ok(()),
    other => Err(LuaError::external(format!(
      "expected a path string, path-set or list, found {}",
      other.type_name()
    ))),
  }
}

/// Parse a value that is either a string or a list of strings.
pub fn string_list(value: LuaValue) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(table) => {
      let mut out = Vec::new();
      for item in table.sequence_values::<String>() {
        out.push(item?);
      }
      Ok(out)
    }
    other => Err(LuaError::external(format!(
      "expected a string or list of strings, found {}",
      other.type_name()
    ))),
  }
}

/// Register the path-set constructors on the `bake` table.
pub fn register(lua: &Lua, bake: &LuaTable, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let st = state.clone();
  let paths_fn = lua.create_function(move |_, args: LuaMultiValue| {
    let location = current_location(&st);
    let mut parts = Vec::new();
    let mut literals = Vec::new();
    for value in args {
      collect(&st, value, &mut parts, &mut literals, &location)?;
    }
    flush_literals(&mut parts, &mut literals, &location)?;
    let set = match parts.len() {
      1 => parts.into_iter().next().unwrap(),
      _ => PathSet::new(PathSetKind::Compound { parts }, location).map_err(LuaError::external)?,
    };
    Ok(LuaPathSet(set))
  })?;
  bake.set("paths", paths_fn)?;

  let st = state.clone();
  let find_fn = lua.create_function(move |_, spec: LuaTable| {
    let location = current_location(&st);
    let dir = base_dir(&st, spec.get::<LuaValue>("dir")?)?;
    let includes = string_list(spec.get::<LuaValue>("includes")?)?;
    let excludes = string_list(spec.get::<LuaValue>("excludes")?)?;
    PathSet::new(
      PathSetKind::Glob {
        dir,
        includes,
        excludes,
      },
      location,
    )
    .map(LuaPathSet)
    .map_err(LuaError::external)
  })?;
  bake.set("find", find_fn)?;

  let st = state.clone();
  let under_fn = lua.create_function(move |_, spec: LuaTable| {
    let location = current_location(&st);
    let dir = base_dir(&st, spec.get::<LuaValue>("dir")?)?;
    let children = string_list(spec.get::<LuaValue>("paths")?)?;
    PathSet::new(PathSetKind::DirBased { dir, children }, location)
      .map(LuaPathSet)
      .map_err(LuaError::external)
  })?;
  bake.set("under", under_fn)?;

  let st = state.clone();
  let tagged_fn = lua.create_function(move |_, (tag, opts): (String, Option<LuaTable>)| {
    let location = current_location(&st);
    let allow_dirs = match &opts {
      Some(t) => t.get::<Option<bool>>("allow_dirs")?.unwrap_or(false),
      None => false,
    };
    PathSet::new(PathSetKind::Tagged { tag, allow_dirs }, location)
      .map(LuaPathSet)
      .map_err(LuaError::external)
  })?;
  bake.set("tagged", tagged_fn)?;

  let st = state;
  let from_target_fn = lua.create_function(move |_, dir: String| {
    let location = current_location(&st);
    PathSet::new(PathSetKind::DirFromTarget { dir }, location)
      .map(LuaPathSet)
      .map_err(LuaError::external)
  })?;
  bake.set("from_target", from_target_fn)?;

  Ok(())
}

/// A base directory argument: literal string or a path-set (typically a
/// generated-directory reference).
fn base_dir(_state: &Rc<RefCell<ParseState>>, value: LuaValue) -> LuaResult<BaseDir> {
  match value {
    LuaValue::String(s) => Ok(BaseDir::Literal(s.to_str()?.to_string())),
    LuaValue::UserData(ud) => {
      let set = ud.borrow::<LuaPathSet>()?;
      Ok(BaseDir::Set(set.0.clone()))
    }
    other => Err(LuaError::external(format!(
      "dir must be a string or a path-set, found {}",
      other.type_name()
    ))),
  }
}
