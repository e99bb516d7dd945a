//! Console output formatting.

use std::time::Duration;

use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use bakelua_lib::executor::RunReport;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const ARROW: &str = "→";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();
  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{millis}ms")
  }
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_report(report: &RunReport, format: OutputFormat) {
  match format {
    OutputFormat::Json => print_report_json(report),
    OutputFormat::Text => print_report_text(report),
  }
}

fn print_report_text(report: &RunReport) {
  println!();
  if !report.would_build.is_empty() {
    println!("Dry run: {} target(s) would build", report.would_build.len());
    for (target, reason) in &report.would_build {
      println!("  {} {target} ({reason})", symbols::ARROW);
    }
  }

  for (target, error) in &report.failed {
    println!(
      "  {} {target}: {error}",
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red())
    );
  }
  for (target, dep) in &report.skipped {
    println!(
      "  {} {target} skipped ({dep})",
      symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow())
    );
  }

  if !report.artifacts.is_empty() {
    println!("Published artifacts:");
    for artifact in &report.artifacts {
      println!("  {} [{}] {}", symbols::ARROW, artifact.category, artifact.path);
    }
  }

  let headline = if report.cancelled {
    format!("Build CANCELLED after {}", format_duration(report.elapsed))
  } else if report.failed.is_empty() {
    format!(
      "Build complete: {} built, {} up to date in {}",
      report.built.len(),
      report.up_to_date.len(),
      format_duration(report.elapsed)
    )
  } else {
    format!(
      "Build FAILED: {} failed, {} skipped, {} built in {}",
      report.failed.len(),
      report.skipped.len(),
      report.built.len(),
      format_duration(report.elapsed)
    )
  };

  if report.success() {
    println!(
      "{} {headline}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
    );
  } else {
    println!(
      "{} {headline}",
      symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red())
    );
  }
}

fn print_report_json(report: &RunReport) {
  let value = serde_json::json!({
    "success": report.success(),
    "cancelled": report.cancelled,
    "elapsedMillis": report.elapsed.as_millis() as u64,
    "built": report.built,
    "upToDate": report.up_to_date,
    "failed": report.failed.iter().map(|(t, e)| serde_json::json!({"target": t, "error": e})).collect::<Vec<_>>(),
    "skipped": report.skipped.iter().map(|(t, d)| serde_json::json!({"target": t, "reason": d})).collect::<Vec<_>>(),
    "wouldBuild": report.would_build.iter().map(|(t, r)| serde_json::json!({"target": t, "reason": r})).collect::<Vec<_>>(),
    "artifacts": report.artifacts.iter().map(|a| serde_json::json!({"category": a.category, "path": a.path})).collect::<Vec<_>>(),
  });
  println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
}
