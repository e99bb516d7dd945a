//! Property and option stores.
//!
//! Properties are immutable named values defined once while build files are
//! being parsed; `${name}` references are expanded on access with cycle
//! detection. Options are tunables resolved with overlay semantics: defaults,
//! then global overrides, then per-target overrides, computed exactly once
//! after the parse phase has ended.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::Location;
use crate::path;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PropertyError {
  #[error("{location}: property \"{name}\" is already defined at {previous}")]
  DuplicateDefinition {
    name: String,
    location: Location,
    previous: Location,
  },

  #[error("property \"{name}\" is not defined")]
  Undefined { name: String },

  #[error("incorrectly formatted property string \"{input}\"")]
  Malformed { input: String },

  #[error("property substitution cycle: {chain}")]
  PropertyCycle { chain: String },

  #[error("{location}: illegal value for property \"{name}\": {message}")]
  IllegalValue {
    name: String,
    message: String,
    location: Location,
  },

  #[error("cannot expand a string containing multiple list variables: \"{input}\"")]
  MultipleListVars { input: String },

  #[error("relative path \"{input}\" cannot be resolved after parsing has ended")]
  RelativePathAfterParse { input: String },

  #[error("effective options cannot be read before the end of the parse phase")]
  OptionsPrematureAccess,

  #[error("unknown option \"{name}\"")]
  UnknownOption { name: String },

  #[error("illegal value for option \"{name}\": {message}")]
  IllegalOptionValue { name: String, message: String },
}

/// The kind a property was declared with. Paths and output dirs are
/// normalized to absolute form at definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
  String,
  Path,
  OutputDir,
  Bool,
  List,
  Enumeration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
  Str(String),
  Bool(bool),
  List(Vec<String>),
}

impl PropertyValue {
  fn render(&self) -> String {
    match self {
      PropertyValue::Str(s) => s.clone(),
      PropertyValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
      PropertyValue::List(items) => items.join(", "),
    }
  }
}

#[derive(Debug, Clone)]
struct PropertyDef {
  kind: PropertyKind,
  value: PropertyValue,
  allowed: Option<Vec<String>>,
  location: Location,
}

/// Immutable named values with `${...}` substitution.
#[derive(Debug, Default)]
pub struct PropertyStore {
  props: BTreeMap<String, PropertyDef>,
  output_roots: Vec<String>,
  overrides: BTreeMap<String, String>,
  used_overrides: BTreeSet<String>,
}

impl PropertyStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Install command-line `NAME=value` overrides. Must happen before any
  /// definitions; an override replaces the default at definition time.
  pub fn set_overrides(&mut self, overrides: impl IntoIterator<Item = (String, String)>) {
    self.overrides = overrides.into_iter().collect();
  }

  /// Overrides that never matched a definition, reported at end of parse.
  pub fn unused_overrides(&self) -> Vec<String> {
    self
      .overrides
      .keys()
      .filter(|k| !self.used_overrides.contains(*k))
      .cloned()
      .collect()
  }

  /// Define a property. `base_dir` is the directory of the defining build
  /// file, used to absolutize Path/OutputDir values.
  pub fn define(
    &mut self,
    name: &str,
    kind: PropertyKind,
    default: PropertyValue,
    allowed: Option<Vec<String>>,
    base_dir: Option<&str>,
    location: Location,
  ) -> Result<(), PropertyError> {
    if let Some(existing) = self.props.get(name) {
      return Err(PropertyError::DuplicateDefinition {
        name: name.to_string(),
        location,
        previous: existing.location.clone(),
      });
    }

    let mut value = match self.overrides.get(name) {
      Some(raw) => {
        self.used_overrides.insert(name.to_string());
        coerce_override(name, kind, raw, &location)?
      }
      None => default,
    };

    match kind {
      PropertyKind::Path | PropertyKind::OutputDir => {
        let PropertyValue::Str(raw) = &value else {
          return Err(illegal(name, "path properties take string values", &location));
        };
        let mut abs = if path::is_absolute(raw) {
          path::normalize(raw)
        } else {
          let Some(base) = base_dir else {
            return Err(PropertyError::RelativePathAfterParse { input: raw.clone() });
          };
          path::join_normalize(base, raw)
        };
        if kind == PropertyKind::OutputDir {
          if !abs.ends_with('/') {
            abs.push('/');
          }
          self.output_roots.push(abs.clone());
        }
        value = PropertyValue::Str(abs);
      }
      PropertyKind::Enumeration => {
        let Some(allowed) = &allowed else {
          return Err(illegal(name, "enumeration properties need an allowed-value list", &location));
        };
        let PropertyValue::Str(v) = &value else {
          return Err(illegal(name, "enumeration properties take string values", &location));
        };
        if !allowed.contains(v) {
          return Err(illegal(
            name,
            &format!("\"{v}\" is not one of [{}]", allowed.join(", ")),
            &location,
          ));
        }
      }
      PropertyKind::Bool => {
        if !matches!(value, PropertyValue::Bool(_)) {
          return Err(illegal(name, "boolean properties take true/false", &location));
        }
      }
      PropertyKind::List => {
        if !matches!(value, PropertyValue::List(_)) {
          return Err(illegal(name, "list properties take a list of strings", &location));
        }
      }
      PropertyKind::String => {}
    }

    self.props.insert(
      name.to_string(),
      PropertyDef {
        kind,
        value,
        allowed,
        location,
      },
    );
    Ok(())
  }

  pub fn is_defined(&self, name: &str) -> bool {
    self.props.contains_key(name)
  }

  pub fn kind_of(&self, name: &str) -> Option<PropertyKind> {
    self.props.get(name).map(|d| d.kind)
  }

  /// Directories registered as build output roots (OutputDir properties).
  pub fn output_roots(&self) -> &[String] {
    &self.output_roots
  }

  /// The raw (unexpanded) value of a property.
  pub fn raw_value(&self, name: &str) -> Result<&PropertyValue, PropertyError> {
    self
      .props
      .get(name)
      .map(|d| &d.value)
      .ok_or_else(|| PropertyError::Undefined { name: name.to_string() })
  }

  /// The fully expanded value of a property.
  pub fn value(&self, name: &str) -> Result<String, PropertyError> {
    let def = self
      .props
      .get(name)
      .ok_or_else(|| PropertyError::Undefined { name: name.to_string() })?;
    let mut active = vec![name.to_string()];
    self.expand_inner(&def.value.render(), &mut active)
  }

  /// Expand every `${name}` reference in `input`. `$${` escapes a literal
  /// `${`. Unknown names and substitution cycles are errors.
  pub fn expand(&self, input: &str) -> Result<String, PropertyError> {
    self.expand_inner(input, &mut Vec::new())
  }

  fn expand_inner(&self, input: &str, active: &mut Vec<String>) -> Result<String, PropertyError> {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
      if bytes[i] == b'$' && input[i..].starts_with("$${") {
        out.push_str("${");
        i += 3;
        continue;
      }
      if bytes[i] == b'$' && input[i..].starts_with("${") {
        let close = input[i..].find('}').ok_or_else(|| PropertyError::Malformed {
          input: input.to_string(),
        })?;
        let name = &input[i + 2..i + close];
        if name.is_empty() {
          return Err(PropertyError::Malformed {
            input: input.to_string(),
          });
        }
        if active.iter().any(|n| n == name) {
          let mut chain = active.clone();
          chain.push(name.to_string());
          return Err(PropertyError::PropertyCycle {
            chain: chain.join(" -> "),
          });
        }
        // `${X[]}` in a plain expansion renders the whole list
        let lookup = name.strip_suffix("[]").unwrap_or(name);
        let def = self.props.get(lookup).ok_or_else(|| PropertyError::Undefined {
          name: name.to_string(),
        })?;
        active.push(name.to_string());
        let expanded = self.expand_inner(&def.value.render(), active)?;
        active.pop();
        out.push_str(&expanded);
        i += close + 1;
        continue;
      }
      let ch = input[i..].chars().next().unwrap();
      out.push(ch);
      i += ch.len_utf8();
    }
    Ok(out)
  }

  /// Expand `input` into a list, multiplying out at most one `${name[]}`
  /// list reference. Strings with no list reference expand to one item.
  pub fn expand_list(&self, input: &str) -> Result<Vec<String>, PropertyError> {
    let Some(start) = find_list_var(input) else {
      return Ok(vec![self.expand(input)?]);
    };
    let close = input[start..]
      .find('}')
      .ok_or_else(|| PropertyError::Malformed {
        input: input.to_string(),
      })?;
    let name = &input[start + 2..start + close - 2];
    let prefix = &input[..start];
    let suffix = &input[start + close + 1..];
    if find_list_var(suffix).is_some() {
      return Err(PropertyError::MultipleListVars {
        input: input.to_string(),
      });
    }

    let def = self.props.get(name).ok_or_else(|| PropertyError::Undefined {
      name: name.to_string(),
    })?;
    let items: Vec<String> = match &def.value {
      PropertyValue::List(items) => items.clone(),
      other => other.render().split(',').map(|s| s.trim().to_string()).collect(),
    };

    let prefix = self.expand(prefix)?;
    let suffix = self.expand(suffix)?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
      out.push(format!("{prefix}{}{suffix}", self.expand(&item)?));
    }
    Ok(out)
  }

  /// Snapshot of all property names for listings.
  pub fn names(&self) -> Vec<&str> {
    self.props.keys().map(String::as_str).collect()
  }
}

/// Scan for a `${NAME[]}` list reference, skipping `$${` escapes.
fn find_list_var(input: &str) -> Option<usize> {
  let mut i = 0;
  let bytes = input.as_bytes();
  while i < bytes.len() {
    if bytes[i] == b'$' && input[i..].starts_with("$${") {
      i += 3;
      continue;
    }
    if bytes[i] == b'$' && input[i..].starts_with("${") {
      if let Some(close) = input[i..].find('}') {
        if input[i..i + close].ends_with("[]") {
          return Some(i);
        }
        i += close + 1;
        continue;
      }
      return None;
    }
    i += 1;
  }
  None
}

fn coerce_override(
  name: &str,
  kind: PropertyKind,
  raw: &str,
  location: &Location,
) -> Result<PropertyValue, PropertyError> {
  Ok(match kind {
    PropertyKind::Bool => match raw {
      "true" | "1" => PropertyValue::Bool(true),
      "false" | "0" => PropertyValue::Bool(false),
      other => {
        return Err(illegal(name, &format!("\"{other}\" is not a boolean"), location));
      }
    },
    PropertyKind::List => PropertyValue::List(raw.split(',').map(|s| s.trim().to_string()).collect()),
    _ => PropertyValue::Str(raw.to_string()),
  })
}

fn illegal(name: &str, message: &str, location: &Location) -> PropertyError {
  PropertyError::IllegalValue {
    name: name.to_string(),
    message: message.to_string(),
    location: location.clone(),
  }
}

// ---------------------------------------------------------------------------
// Options

/// A single option value. Options are scalars; anything richer belongs in a
/// property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(String),
}

impl std::fmt::Display for OptionValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      OptionValue::Bool(b) => write!(f, "{b}"),
      OptionValue::Int(i) => write!(f, "{i}"),
      OptionValue::Float(x) => write!(f, "{x}"),
      OptionValue::Str(s) => write!(f, "{s}"),
    }
  }
}

#[derive(Debug, Clone)]
struct OptionDef {
  default: OptionValue,
  domain: Option<Vec<OptionValue>>,
  location: Location,
}

/// Two-level option store: defaults plus a global overlay. Per-target
/// overlays live on the target specs and are merged by
/// [`OptionStore::effective`].
#[derive(Debug, Default)]
pub struct OptionStore {
  defined: BTreeMap<String, OptionDef>,
  global: BTreeMap<String, OptionValue>,
  frozen: AtomicBool,
}

impl OptionStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn define(
    &mut self,
    name: &str,
    default: OptionValue,
    domain: Option<Vec<OptionValue>>,
    location: Location,
  ) -> Result<(), PropertyError> {
    if let Some(existing) = self.defined.get(name) {
      return Err(PropertyError::DuplicateDefinition {
        name: name.to_string(),
        location,
        previous: existing.location.clone(),
      });
    }
    if let Some(domain) = &domain
      && !domain.contains(&default)
    {
      return Err(PropertyError::IllegalOptionValue {
        name: name.to_string(),
        message: format!("default {default} is outside the allowed domain"),
      });
    }
    self.defined.insert(
      name.to_string(),
      OptionDef {
        default,
        domain,
        location,
      },
    );
    Ok(())
  }

  pub fn is_defined(&self, name: &str) -> bool {
    self.defined.contains_key(name)
  }

  pub fn set_global(&mut self, name: &str, value: OptionValue) -> Result<(), PropertyError> {
    let def = self.defined.get(name).ok_or_else(|| PropertyError::UnknownOption {
      name: name.to_string(),
    })?;
    self.check_domain(name, def, &value)?;
    self.global.insert(name.to_string(), value);
    Ok(())
  }

  fn check_domain(&self, name: &str, def: &OptionDef, value: &OptionValue) -> Result<(), PropertyError> {
    if let Some(domain) = &def.domain
      && !domain.contains(value)
    {
      return Err(PropertyError::IllegalOptionValue {
        name: name.to_string(),
        message: format!("{value} is outside the allowed domain"),
      });
    }
    Ok(())
  }

  /// Mark end-of-parse; effective option resolution is legal from here on.
  pub fn freeze(&self) {
    self.frozen.store(true, Ordering::SeqCst);
  }

  /// Merge defaults, the global overlay and a target's overrides. Fails
  /// before end-of-parse because global overrides may still be incoming.
  pub fn effective(&self, target_overrides: &BTreeMap<String, OptionValue>) -> Result<OptionMap, PropertyError> {
    if !self.frozen.load(Ordering::SeqCst) {
      return Err(PropertyError::OptionsPrematureAccess);
    }
    let mut merged: BTreeMap<String, OptionValue> =
      self.defined.iter().map(|(k, d)| (k.clone(), d.default.clone())).collect();
    for (k, v) in &self.global {
      merged.insert(k.clone(), v.clone());
    }
    for (k, v) in target_overrides {
      let def = self.defined.get(k).ok_or_else(|| PropertyError::UnknownOption {
        name: k.clone(),
      })?;
      self.check_domain(k, def, v)?;
      merged.insert(k.clone(), v.clone());
    }
    Ok(OptionMap(merged))
  }

  pub fn names(&self) -> Vec<&str> {
    self.defined.keys().map(String::as_str).collect()
  }
}

/// A frozen, merged option mapping with typed accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionMap(BTreeMap<String, OptionValue>);

impl OptionMap {
  pub fn get(&self, name: &str) -> Option<&OptionValue> {
    self.0.get(name)
  }

  pub fn get_int(&self, name: &str) -> Result<i64, PropertyError> {
    match self.0.get(name) {
      Some(OptionValue::Int(i)) => Ok(*i),
      Some(OptionValue::Float(x)) if x.fract() == 0.0 => Ok(*x as i64),
      Some(other) => Err(PropertyError::IllegalOptionValue {
        name: name.to_string(),
        message: format!("expected an integer, found {other}"),
      }),
      None => Err(PropertyError::UnknownOption { name: name.to_string() }),
    }
  }

  pub fn get_bool(&self, name: &str) -> Result<bool, PropertyError> {
    match self.0.get(name) {
      Some(OptionValue::Bool(b)) => Ok(*b),
      Some(other) => Err(PropertyError::IllegalOptionValue {
        name: name.to_string(),
        message: format!("expected a boolean, found {other}"),
      }),
      None => Err(PropertyError::UnknownOption { name: name.to_string() }),
    }
  }

  pub fn get_str(&self, name: &str) -> Result<&str, PropertyError> {
    match self.0.get(name) {
      Some(OptionValue::Str(s)) => Ok(s),
      Some(other) => Err(PropertyError::IllegalOptionValue {
        name: name.to_string(),
        message: format!("expected a string, found {other}"),
      }),
      None => Err(PropertyError::UnknownOption { name: name.to_string() }),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
    self.0.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn loc() -> Location {
    Location::new("/build/build.lua")
  }

  fn store_with(entries: &[(&str, &str)]) -> PropertyStore {
    let mut store = PropertyStore::new();
    for (name, value) in entries {
      store
        .define(
          name,
          PropertyKind::String,
          PropertyValue::Str(value.to_string()),
          None,
          Some("/build/"),
          loc(),
        )
        .unwrap();
    }
    store
  }

  #[test]
  fn expand_simple_and_repeated() {
    let store = store_with(&[("MODE", "release")]);
    assert_eq!(store.expand(" ${MODE} x ${MODE} ").unwrap(), " release x release ");
  }

  #[test]
  fn expand_escapes_double_dollar() {
    let store = store_with(&[("A", "a")]);
    assert_eq!(store.expand("x${A}x$${A}x${A}x").unwrap(), "xax${A}xax");
  }

  #[test]
  fn expand_nested_values() {
    let store = store_with(&[("A", "${B}/sub"), ("B", "base")]);
    assert_eq!(store.expand("${A}").unwrap(), "base/sub");
  }

  #[test]
  fn expand_unknown_fails() {
    let store = store_with(&[]);
    assert!(matches!(
      store.expand("${NOPE}"),
      Err(PropertyError::Undefined { name }) if name == "NOPE"
    ));
  }

  #[test]
  fn expand_unterminated_fails() {
    let store = store_with(&[("A", "a")]);
    assert!(matches!(store.expand("${A"), Err(PropertyError::Malformed { .. })));
  }

  #[test]
  fn expand_cycle_fails_with_chain() {
    let store = store_with(&[("A", "${B}"), ("B", "${A}")]);
    let err = store.expand("${A}").unwrap_err();
    match err {
      PropertyError::PropertyCycle { chain } => assert_eq!(chain, "A -> B -> A"),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn duplicate_definition_fails() {
    let mut store = store_with(&[("A", "a")]);
    let err = store
      .define(
        "A",
        PropertyKind::String,
        PropertyValue::Str("again".into()),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap_err();
    assert!(matches!(err, PropertyError::DuplicateDefinition { .. }));
  }

  #[test]
  fn path_property_absolutized_at_definition() {
    let mut store = PropertyStore::new();
    store
      .define(
        "SRC",
        PropertyKind::Path,
        PropertyValue::Str("srcdir/sub".into()),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert_eq!(store.value("SRC").unwrap(), "/build/srcdir/sub");
  }

  #[test]
  fn output_dir_registered_as_root() {
    let mut store = PropertyStore::new();
    store
      .define(
        "OUTPUT_DIR",
        PropertyKind::OutputDir,
        PropertyValue::Str("output".into()),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert_eq!(store.output_roots(), &["/build/output/".to_string()]);
  }

  #[test]
  fn bool_renders_lowercase() {
    let mut store = PropertyStore::new();
    store
      .define(
        "VERBOSE",
        PropertyKind::Bool,
        PropertyValue::Bool(true),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert_eq!(store.expand("v=${VERBOSE}").unwrap(), "v=true");
  }

  #[test]
  fn enumeration_validates_value() {
    let mut store = PropertyStore::new();
    let err = store
      .define(
        "MODE",
        PropertyKind::Enumeration,
        PropertyValue::Str("fast".into()),
        Some(vec!["debug".into(), "release".into()]),
        Some("/build/"),
        loc(),
      )
      .unwrap_err();
    assert!(matches!(err, PropertyError::IllegalValue { .. }));
  }

  #[test]
  fn override_replaces_default() {
    let mut store = PropertyStore::new();
    store.set_overrides([("MODE".to_string(), "debug".to_string())]);
    store
      .define(
        "MODE",
        PropertyKind::String,
        PropertyValue::Str("release".into()),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert_eq!(store.value("MODE").unwrap(), "debug");
    assert!(store.unused_overrides().is_empty());
  }

  #[test]
  fn list_expansion_multiplies_items() {
    let mut store = store_with(&[("DIR", "lib"), ("SUFFIX", ".jar")]);
    store
      .define(
        "NAMES",
        PropertyKind::List,
        PropertyValue::List(vec!["a".into(), "b".into(), "c".into()]),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert_eq!(
      store.expand_list("${DIR}/${NAMES[]}${SUFFIX}").unwrap(),
      vec!["lib/a.jar", "lib/b.jar", "lib/c.jar"]
    );
  }

  #[test]
  fn list_expansion_rejects_two_list_vars() {
    let mut store = PropertyStore::new();
    store
      .define(
        "L",
        PropertyKind::List,
        PropertyValue::List(vec!["a".into(), "b".into()]),
        None,
        Some("/build/"),
        loc(),
      )
      .unwrap();
    assert!(matches!(
      store.expand_list("${L[]}${L[]}"),
      Err(PropertyError::MultipleListVars { .. })
    ));
  }

  #[test]
  fn options_overlay_and_premature_access() {
    let mut opts = OptionStore::new();
    opts.define("failureRetries", OptionValue::Int(0), None, loc()).unwrap();
    opts.define("flavor", OptionValue::Str("plain".into()), None, loc()).unwrap();

    let overrides = BTreeMap::from([("failureRetries".to_string(), OptionValue::Int(2))]);
    assert!(matches!(
      opts.effective(&overrides),
      Err(PropertyError::OptionsPrematureAccess)
    ));

    opts.set_global("flavor", OptionValue::Str("spicy".into())).unwrap();
    opts.freeze();

    let map = opts.effective(&overrides).unwrap();
    assert_eq!(map.get_int("failureRetries").unwrap(), 2);
    assert_eq!(map.get_str("flavor").unwrap(), "spicy");
  }

  #[test]
  fn unknown_option_rejected() {
    let mut opts = OptionStore::new();
    assert!(matches!(
      opts.set_global("nope", OptionValue::Int(1)),
      Err(PropertyError::UnknownOption { .. })
    ));
  }

  #[test]
  fn option_domain_enforced() {
    let mut opts = OptionStore::new();
    opts
      .define(
        "level",
        OptionValue::Str("low".into()),
        Some(vec![OptionValue::Str("low".into()), OptionValue::Str("high".into())]),
        loc(),
      )
      .unwrap();
    assert!(matches!(
      opts.set_global("level", OptionValue::Str("medium".into())),
      Err(PropertyError::IllegalOptionValue { .. })
    ));
  }
}
