//! Per-target log buffering.
//!
//! Workers run concurrently but the run log must stay readable: each
//! target's records are buffered in memory and flushed contiguously through
//! a single drain task when the target completes. The only exception is the
//! `*** Building <name>` banner, emitted immediately so a hung target is
//! diagnosable while it hangs.
//!
//! When a failed attempt is later retried successfully, its buffered ERROR
//! records are demoted to WARN so severity-scanning CI systems do not flag
//! the run.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
  Info,
  Warn,
  Error,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
  pub level: LogLevel,
  pub message: String,
}

#[derive(Debug)]
enum LogEvent {
  /// Emitted as soon as it is sent.
  Immediate(String),
  /// A completed target's records, written without interleaving.
  Flush(Vec<LogRecord>),
}

/// Cloneable handle feeding the single drain task.
#[derive(Clone)]
pub struct LogSink {
  tx: mpsc::UnboundedSender<LogEvent>,
}

impl LogSink {
  /// Spawn the drain task. The task exits when every sink clone is dropped.
  pub fn spawn() -> (Self, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        match event {
          LogEvent::Immediate(line) => info!("{line}"),
          LogEvent::Flush(records) => {
            for record in records {
              match record.level {
                LogLevel::Info => info!("{}", record.message),
                LogLevel::Warn => warn!("{}", record.message),
                LogLevel::Error => error!("{}", record.message),
              }
            }
          }
        }
      }
    });
    (Self { tx }, handle)
  }

  fn send(&self, event: LogEvent) {
    // a closed drain means the run is tearing down; drop silently
    let _ = self.tx.send(event);
  }
}

/// The buffer for one target execution. Shared with the target's context so
/// target code can log through it.
pub struct TargetLog {
  target: String,
  sink: LogSink,
  records: Mutex<Vec<LogRecord>>,
}

impl TargetLog {
  pub fn new(sink: LogSink, target: impl Into<String>) -> Self {
    Self {
      target: target.into(),
      sink,
      records: Mutex::new(Vec::new()),
    }
  }

  /// Emit the immediate banner announcing execution.
  pub fn banner(&self, phase: &str) {
    self.sink.send(LogEvent::Immediate(format!("*** {phase} {}", self.target)));
  }

  pub fn record(&self, level: LogLevel, message: impl Into<String>) {
    self.records.lock().unwrap().push(LogRecord {
      level,
      message: format!("{}: {}", self.target, message.into()),
    });
  }

  pub fn info(&self, message: impl Into<String>) {
    self.record(LogLevel::Info, message);
  }

  pub fn warn(&self, message: impl Into<String>) {
    self.record(LogLevel::Warn, message);
  }

  pub fn error(&self, message: impl Into<String>) {
    self.record(LogLevel::Error, message);
  }

  /// Demote buffered ERROR records to WARN (failed attempt superseded by a
  /// retry).
  pub fn demote_errors(&self) {
    for record in self.records.lock().unwrap().iter_mut() {
      if record.level == LogLevel::Error {
        record.level = LogLevel::Warn;
      }
    }
  }

  /// Number of buffered records (used by retry logging).
  pub fn len(&self) -> usize {
    self.records.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Append the terminal `***` line and flush everything contiguously.
  pub fn finish(&self, level: LogLevel, outcome: &str) {
    let mut records = std::mem::take(&mut *self.records.lock().unwrap());
    records.push(LogRecord {
      level,
      message: format!("*** {}: {outcome}", self.target),
    });
    self.sink.send(LogEvent::Flush(records));
  }

  /// Snapshot of the buffered records, for tests and failure reporting.
  pub fn snapshot(&self) -> Vec<LogRecord> {
    self.records.lock().unwrap().clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn demote_turns_errors_into_warnings() {
    let (sink, handle) = LogSink::spawn();
    let log = TargetLog::new(sink.clone(), "/out/x");
    log.error("attempt 1 failed");
    log.info("retrying");
    log.demote_errors();

    let records = log.snapshot();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].level, LogLevel::Warn);
    assert_eq!(records[1].level, LogLevel::Info);

    log.finish(LogLevel::Info, "done in 0.1 seconds");
    assert!(log.is_empty());
    drop(log);
    drop(sink);
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn finish_appends_terminal_line() {
    let (sink, handle) = LogSink::spawn();
    let log = TargetLog::new(sink.clone(), "/out/y");
    log.info("working");
    log.finish(LogLevel::Error, "FAILED");
    assert!(log.is_empty());
    drop(log);
    drop(sink);
    handle.await.unwrap();
  }
}
