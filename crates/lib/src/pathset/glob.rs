//! Ant-style glob matching for path-set includes and excludes.
//!
//! Patterns are `/`-separated: `*` matches within a single component, `?`
//! matches exactly one character, and `**` matches zero or more whole
//! components. A pattern ending with `/` matches only directory paths, and a
//! pattern without matches only files, mirroring the trailing-slash path
//! convention used everywhere else.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid glob pattern \"{pattern}\": {reason}")]
pub struct BadPattern {
  pub pattern: String,
  pub reason: String,
}

fn bad(pattern: &str, reason: &str) -> BadPattern {
  BadPattern {
    pattern: pattern.to_string(),
    reason: reason.to_string(),
  }
}

/// Reject patterns that cannot behave: backslashes, leading slashes,
/// unexpanded properties, `**` glued to other characters, and the trailing
/// `**/*/` form (which would force a full re-walk per directory and is
/// disallowed to keep globbing linear in the number of files).
pub fn validate_pattern(pattern: &str) -> Result<(), BadPattern> {
  if pattern.contains('\\') {
    return Err(bad(pattern, "use forward slashes"));
  }
  if pattern.starts_with('/') {
    return Err(bad(pattern, "patterns are relative to the base directory"));
  }
  if pattern.contains("${") {
    return Err(bad(pattern, "patterns may not contain property references"));
  }
  if pattern.contains("//") {
    return Err(bad(pattern, "empty path component"));
  }
  if pattern.ends_with("**/*/") {
    return Err(bad(pattern, "a trailing **/*/ is not supported"));
  }
  for element in pattern.trim_end_matches('/').split('/') {
    if element.contains("**") && element != "**" {
      return Err(bad(pattern, "** must be a whole path component"));
    }
  }
  Ok(())
}

/// Match `path` against `pattern`. Directory paths (trailing `/`) only match
/// directory patterns and vice versa. Matching is case-sensitive.
pub fn glob_match(pattern: &str, path: &str) -> bool {
  if pattern.ends_with('/') != path.ends_with('/') {
    return false;
  }
  let mut pattern = pattern.trim_end_matches('/');
  let path = path.trim_end_matches('/');

  // a trailing **/* selects everything ** already selects
  if pattern.ends_with("**/*") {
    pattern = &pattern[..pattern.len() - 2];
  }

  let pat: Vec<&str> = if pattern.is_empty() {
    Vec::new()
  } else {
    pattern.split('/').collect()
  };
  let segs: Vec<&str> = if path.is_empty() { Vec::new() } else { path.split('/').collect() };
  match_components(&pat, &segs)
}

fn match_components(pat: &[&str], path: &[&str]) -> bool {
  let Some(first) = pat.first() else {
    return path.is_empty();
  };
  if *first == "**" {
    // ** may swallow zero or more leading components
    (0..=path.len()).any(|k| match_components(&pat[1..], &path[k..]))
  } else {
    !path.is_empty() && element_match(first, path[0]) && match_components(&pat[1..], &path[1..])
  }
}

/// Single-component wildcard match with `*` and `?`, iterative with
/// backtracking over the last `*`.
fn element_match(pattern: &str, element: &str) -> bool {
  let p: Vec<char> = pattern.chars().collect();
  let e: Vec<char> = element.chars().collect();
  let (mut pi, mut ei) = (0usize, 0usize);
  let mut star: Option<usize> = None;
  let mut mark = 0usize;

  while ei < e.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == e[ei]) {
      pi += 1;
      ei += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some(pi);
      mark = ei;
      pi += 1;
    } else if let Some(sp) = star {
      pi = sp + 1;
      mark += 1;
      ei = mark;
    } else {
      return false;
    }
  }
  while pi < p.len() && p[pi] == '*' {
    pi += 1;
  }
  pi == p.len()
}

/// True if walking into directory `dir_rel` (no trailing slash) cannot
/// produce matches because an exclude already covers it.
pub fn excluded_dir(excludes: &[String], dir_rel: &str) -> bool {
  let as_dir = format!("{dir_rel}/");
  excludes
    .iter()
    .any(|e| glob_match(e, dir_rel) || glob_match(e, &as_dir))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_matches_empty() {
    assert!(glob_match("", ""));
  }

  #[test]
  fn star_within_component() {
    assert!(glob_match("*", "a"));
    assert!(!glob_match("*.b", "a"));
    assert!(glob_match("*.b", "a.b"));
    assert!(!glob_match("b.*", "b"));
    assert!(glob_match("b.*", "b.a"));
    assert!(glob_match("a*b", "ab"));
    assert!(glob_match("a*b", "axxxb"));
    assert!(!glob_match("a*b", "axxx"));
    assert!(!glob_match("a*b", "xxxb"));
    assert!(!glob_match("a*b", ""));
  }

  #[test]
  fn question_mark_matches_one_char() {
    assert!(glob_match("a?c", "abc"));
    assert!(!glob_match("a?c", "ac"));
    assert!(!glob_match("a?c", "abbc"));
    assert!(glob_match("??", "ab"));
  }

  #[test]
  fn multi_component_literals() {
    assert!(glob_match("a/b.*/c", "a/b.x/c"));
    assert!(!glob_match("a/b.*/c", "a/b/c"));
    assert!(!glob_match("a/b", "a/b/c/d"));
  }

  #[test]
  fn double_star_spans_components() {
    assert!(glob_match("**", "a"));
    assert!(glob_match("**", "a/b/c"));
    assert!(glob_match("**/c", "a/b/c"));
    assert!(glob_match("**/*c", "c"));
    assert!(glob_match("**/b/c", "a/b/c"));
    assert!(!glob_match("**/d", "a/b/c"));
    assert!(!glob_match("a/**/b", "a/b/c"));
    assert!(glob_match("a/b/**", "a/b/c/d"));
    assert!(glob_match("a/b/**/*", "a/b/c/d"));
    assert!(glob_match("a/**/b", "a/b"));
    assert!(glob_match("a/b/**", "a/b"));
    assert!(glob_match("a/**/d/e", "a/b/c/d/e"));
    assert!(glob_match("**/*.x", "a/b.x/c.x"));
    assert!(glob_match("**/**/*.x", "a/y/c.x/d.x"));
  }

  #[test]
  fn dir_and_file_forms_are_distinct() {
    assert!(glob_match("*x/**/", "x/a/b/"));
    assert!(glob_match("*x/**", "x/a/b"));
    assert!(!glob_match("*x/**/", "x/a/b"));
    assert!(!glob_match("*x/**", "x/a/b/"));
    assert!(glob_match("**/*.x/", "a/y/c.x/d.x/"));
  }

  #[test]
  fn validate_rejects_bad_forms() {
    assert!(validate_pattern("a/**/b").is_ok());
    assert!(validate_pattern("src/**/*.c").is_ok());
    assert!(validate_pattern("**/*/").is_err());
    assert!(validate_pattern("a\\b").is_err());
    assert!(validate_pattern("/abs/**").is_err());
    assert!(validate_pattern("a/${X}/b").is_err());
    assert!(validate_pattern("a**/b").is_err());
  }

  #[test]
  fn excluded_dir_prunes_matching_dirs() {
    let excludes = vec!["**/target".to_string(), "build/".to_string()];
    assert!(excluded_dir(&excludes, "sub/target"));
    assert!(excluded_dir(&excludes, "build"));
    assert!(!excluded_dir(&excludes, "src"));
  }
}
