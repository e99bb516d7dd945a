//! Graph queries: `--search`, `--find-target`, `--target-info`.

use anyhow::Result;

use bakelua_lib::graph::BuildModel;
use bakelua_lib::target::TargetEntry;

use crate::Cli;
use crate::output::OutputFormat;

/// Handle any query flag present. Returns true if a query ran (the build is
/// skipped). `--search` accepts substrings and anchored regular
/// expressions; `--find-target` and `--target-info` are literal substring
/// lookups.
pub fn run_query(cli: &Cli, model: &BuildModel) -> Result<bool> {
  if let Some(expr) = &cli.search {
    list_matches(model, expr, model.graph.search(expr), cli.format, false);
    return Ok(true);
  }
  if let Some(substr) = &cli.find_target {
    list_matches(model, substr, model.graph.find_by_substring(substr), cli.format, false);
    return Ok(true);
  }
  if let Some(substr) = &cli.target_info {
    list_matches(model, substr, model.graph.find_by_substring(substr), cli.format, true);
    return Ok(true);
  }
  Ok(false)
}

fn list_matches(
  model: &BuildModel,
  expr: &str,
  matches: Vec<&std::sync::Arc<TargetEntry>>,
  format: OutputFormat,
  detailed: bool,
) {
  match format {
    OutputFormat::Json => {
      let value: Vec<_> = matches.iter().map(|e| target_json(model, e)).collect();
      println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    }
    OutputFormat::Text => {
      if matches.is_empty() {
        println!("No targets match \"{expr}\"");
        return;
      }
      for entry in &matches {
        if detailed {
          print_detail(model, entry);
        } else {
          println!("{}", entry.display_name());
        }
      }
      println!("{} target(s)", matches.len());
    }
  }
}

fn print_detail(model: &BuildModel, entry: &TargetEntry) {
  println!("{}", entry.display_name());
  println!("  name:     {}", entry.spec.name);
  println!("  kind:     {}", entry.imp.kind());
  println!("  declared: {}", entry.spec.location);
  let tags = model.graph.tags_for_target(&entry.path);
  if !tags.is_empty() {
    println!("  tags:     {}", tags.join(", "));
  }
  if entry.spec.priority != 0.0 {
    println!("  priority: {}", entry.spec.priority);
  }
  println!();
}

fn target_json(model: &BuildModel, entry: &TargetEntry) -> serde_json::Value {
  serde_json::json!({
    "name": entry.spec.name,
    "path": entry.path,
    "kind": entry.imp.kind(),
    "tags": model.graph.tags_for_target(&entry.path),
    "priority": entry.spec.priority,
    "location": entry.spec.location.to_string(),
  })
}
