//! The `bake` global table.
//!
//! Registration vocabulary exposed to build files:
//! - `bake.define_property{}` / `bake.property()` / `bake.expand()`
//! - `bake.define_option{}` / `bake.set_option()`
//! - `bake.include()`
//! - path-sets: `bake.paths()`, `bake.find{}`, `bake.under{}`,
//!   `bake.tagged()`, `bake.from_target()`
//! - target constructors: `bake.copy{}`, `bake.write_file{}`,
//!   `bake.archive{}`; each returns the target's name string so other
//!   declarations can reference it
//! - `bake.os`, `bake.arch`, `bake.path.*` helpers

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::prelude::*;

use crate::eval::ParseState;
use crate::lua::loaders;
use crate::lua::pathset::{string_list, to_pathset};
use crate::pathset::{PathSet, PathSetRef};
use crate::props::{OptionValue, PropertyKind, PropertyValue};
use crate::target::{PendingTarget, Target, TargetSpec};
use crate::targets::{Archive, Copy, WriteFile};

pub fn register_globals(lua: &Lua, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let bake = lua.create_table()?;

  bake.set("os", std::env::consts::OS)?;
  bake.set("arch", std::env::consts::ARCH)?;
  bake.set("path", path_helpers(lua)?)?;

  register_properties(lua, &bake, state.clone())?;
  register_options(lua, &bake, state.clone())?;
  register_include(lua, &bake, state.clone())?;
  crate::lua::pathset::register(lua, &bake, state.clone())?;
  register_targets(lua, &bake, state)?;

  lua.globals().set("bake", bake)?;
  Ok(())
}

fn path_helpers(lua: &Lua) -> LuaResult<LuaTable> {
  let table = lua.create_table()?;

  table.set(
    "join",
    lua.create_function(|_, parts: LuaMultiValue| {
      let mut segments = Vec::new();
      for part in parts {
        if let LuaValue::String(s) = part {
          segments.push(s.to_str()?.to_string());
        }
      }
      Ok(segments.join("/"))
    })?,
  )?;

  table.set(
    "basename",
    lua.create_function(|_, p: String| Ok(crate::path::base_name(&p)))?,
  )?;

  table.set(
    "dirname",
    lua.create_function(|_, p: String| {
      let trimmed = p.trim_end_matches('/');
      Ok(trimmed.rfind('/').map(|i| trimmed[..i].to_string()).unwrap_or_default())
    })?,
  )?;

  Ok(table)
}

// ---------------------------------------------------------------------------
// Properties

fn register_properties(lua: &Lua, bake: &LuaTable, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let st = state.clone();
  let define_fn = lua.create_function(move |_, spec: LuaTable| {
    let name: String = spec
      .get::<Option<String>>("name")?
      .ok_or_else(|| LuaError::external("define_property requires a name"))?;
    let default: LuaValue = spec.get("default")?;
    let kind_name: Option<String> = spec.get("kind")?;
    let values: Option<Vec<String>> = match spec.get::<LuaValue>("values")? {
      LuaValue::Nil => None,
      v => Some(string_list(v)?),
    };

    let kind = match kind_name.as_deref() {
      Some("string") => PropertyKind::String,
      Some("path") => PropertyKind::Path,
      Some("outputdir") => PropertyKind::OutputDir,
      Some("bool") => PropertyKind::Bool,
      Some("list") => PropertyKind::List,
      Some("enum") => PropertyKind::Enumeration,
      Some(other) => {
        return Err(LuaError::external(format!("unknown property kind \"{other}\"")));
      }
      None => match &default {
        LuaValue::Boolean(_) => PropertyKind::Bool,
        LuaValue::Table(_) => PropertyKind::List,
        _ => PropertyKind::String,
      },
    };

    let value = match (&kind, default) {
      (PropertyKind::Bool, LuaValue::Boolean(b)) => PropertyValue::Bool(b),
      (PropertyKind::List, v @ LuaValue::Table(_)) => PropertyValue::List(string_list(v)?),
      (_, LuaValue::String(s)) => PropertyValue::Str(s.to_str()?.to_string()),
      (_, LuaValue::Integer(i)) => PropertyValue::Str(i.to_string()),
      (_, LuaValue::Number(x)) => PropertyValue::Str(x.to_string()),
      (_, other) => {
        return Err(LuaError::external(format!(
          "unsupported default for property \"{name}\": {}",
          other.type_name()
        )));
      }
    };

    let mut parse = st.borrow_mut();
    let location = parse.current_location();
    let base_dir = parse.current_dir();
    parse
      .props
      .define(&name, kind, value, values, base_dir.as_deref(), location)
      .map_err(LuaError::external)?;
    Ok(())
  })?;
  bake.set("define_property", define_fn)?;

  let st = state.clone();
  let get_fn = lua.create_function(move |_, name: String| {
    st.borrow().props.value(&name).map_err(LuaError::external)
  })?;
  bake.set("property", get_fn)?;

  let st = state.clone();
  let expand_fn = lua.create_function(move |_, input: String| {
    st.borrow().props.expand(&input).map_err(LuaError::external)
  })?;
  bake.set("expand", expand_fn)?;

  let st = state;
  let excludes_fn = lua.create_function(move |_, patterns: LuaValue| {
    let patterns = string_list(patterns)?;
    for pattern in &patterns {
      crate::pathset::glob::validate_pattern(pattern).map_err(LuaError::external)?;
    }
    st.borrow_mut().global_excludes = patterns;
    Ok(())
  })?;
  bake.set("set_global_excludes", excludes_fn)?;

  Ok(())
}

// ---------------------------------------------------------------------------
// Options

fn lua_option_value(value: LuaValue) -> LuaResult<OptionValue> {
  match value {
    LuaValue::Boolean(b) => Ok(OptionValue::Bool(b)),
    LuaValue::Integer(i) => Ok(OptionValue::Int(i)),
    LuaValue::Number(x) => Ok(OptionValue::Float(x)),
    LuaValue::String(s) => Ok(OptionValue::Str(s.to_str()?.to_string())),
    other => Err(LuaError::external(format!(
      "option values must be scalars, found {}",
      other.type_name()
    ))),
  }
}

fn register_options(lua: &Lua, bake: &LuaTable, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let st = state.clone();
  let define_fn = lua.create_function(move |_, spec: LuaTable| {
    let name: String = spec
      .get::<Option<String>>("name")?
      .ok_or_else(|| LuaError::external("define_option requires a name"))?;
    let default = lua_option_value(spec.get("default")?)?;
    let domain = match spec.get::<LuaValue>("values")? {
      LuaValue::Nil => None,
      LuaValue::Table(table) => {
        let mut out = Vec::new();
        for item in table.sequence_values::<LuaValue>() {
          out.push(lua_option_value(item?)?);
        }
        Some(out)
      }
      other => {
        return Err(LuaError::external(format!(
          "values must be a list, found {}",
          other.type_name()
        )));
      }
    };

    let mut parse = st.borrow_mut();
    let location = parse.current_location();
    parse
      .options
      .define(&name, default, domain, location)
      .map_err(LuaError::external)?;
    Ok(())
  })?;
  bake.set("define_option", define_fn)?;

  let st = state;
  let set_fn = lua.create_function(move |_, (name, value): (String, LuaValue)| {
    let value = lua_option_value(value)?;
    st.borrow_mut()
      .options
      .set_global(&name, value)
      .map_err(LuaError::external)?;
    Ok(())
  })?;
  bake.set("set_option", set_fn)?;

  Ok(())
}

// ---------------------------------------------------------------------------
// Includes

fn register_include(lua: &Lua, bake: &LuaTable, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let st = state;
  let include_fn = lua.create_function(move |lua, include: String| {
    let file = loaders::resolve_include(&st, &include)?;
    loaders::load_build_file(lua, &st, &file)
  })?;
  bake.set("include", include_fn)?;
  Ok(())
}

// ---------------------------------------------------------------------------
// Target constructors

/// Read the fields shared by every target constructor.
fn parse_spec(state: &Rc<RefCell<ParseState>>, name: String, table: &LuaTable) -> LuaResult<TargetSpec> {
  let mut spec = TargetSpec::new(name, state.borrow().current_location());

  spec.tags = string_list(table.get::<LuaValue>("tags")?)?;
  if let Some(priority) = table.get::<Option<f64>>("priority")? {
    spec.priority = priority;
  }
  if let Some(disable) = table.get::<Option<bool>>("disable_in_full_build")? {
    spec.disable_in_full_build = disable;
  }
  if let Some(permit) = table.get::<Option<bool>>("permit_dest_up_paths")? {
    spec.permit_dest_up_paths = permit;
  }
  spec.extra_deps = string_list(table.get::<LuaValue>("deps")?)?;

  if let Some(options) = table.get::<Option<LuaTable>>("options")? {
    let mut overrides = BTreeMap::new();
    for pair in options.pairs::<String, LuaValue>() {
      let (key, value) = pair?;
      overrides.insert(key, lua_option_value(value)?);
    }
    spec.option_overrides = overrides;
  }

  Ok(spec)
}

fn dest_of(table: &LuaTable) -> LuaResult<String> {
  table
    .get::<Option<String>>("dest")?
    .ok_or_else(|| LuaError::external("target requires a dest"))
}

fn src_of(state: &Rc<RefCell<ParseState>>, table: &LuaTable) -> LuaResult<PathSetRef> {
  let value: LuaValue = table.get("src")?;
  if matches!(value, LuaValue::Nil) {
    return Err(LuaError::external("target requires a src"));
  }
  to_pathset(state, value)
}

fn register_target(state: &Rc<RefCell<ParseState>>, spec: TargetSpec, imp: Box<dyn Target>) -> String {
  let name = spec.name.clone();
  state.borrow_mut().register(PendingTarget { spec, imp });
  name
}

fn register_targets(lua: &Lua, bake: &LuaTable, state: Rc<RefCell<ParseState>>) -> LuaResult<()> {
  let st = state.clone();
  let copy_fn = lua.create_function(move |_, table: LuaTable| {
    let dest = dest_of(&table)?;
    let sources = src_of(&st, &table)?;
    let spec = parse_spec(&st, dest, &table)?;
    Ok(register_target(&st, spec, Box::new(Copy::new(sources))))
  })?;
  bake.set("copy", copy_fn)?;

  let st = state.clone();
  let write_file_fn = lua.create_function(move |_, table: LuaTable| {
    let dest = dest_of(&table)?;
    let content: String = table
      .get::<Option<String>>("content")?
      .ok_or_else(|| LuaError::external("write_file requires content"))?;
    let spec = parse_spec(&st, dest, &table)?;
    // a generated file has no file inputs unless the build file adds some
    let sources: PathSetRef = match table.get::<LuaValue>("src")? {
      LuaValue::Nil => PathSet::of(Vec::new(), st.borrow().current_location()).map_err(LuaError::external)?,
      value => to_pathset(&st, value)?,
    };
    Ok(register_target(&st, spec, Box::new(WriteFile::new(content, sources))))
  })?;
  bake.set("write_file", write_file_fn)?;

  let st = state;
  let archive_fn = lua.create_function(move |_, table: LuaTable| {
    let dest = dest_of(&table)?;
    let sources = src_of(&st, &table)?;
    let spec = parse_spec(&st, dest, &table)?;
    Ok(register_target(&st, spec, Box::new(Archive::new(sources))))
  })?;
  bake.set("archive", archive_fn)?;

  Ok(())
}
