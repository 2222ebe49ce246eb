//! User-facing notification collaborator.
//!
//! The mutation coordinator announces commit and rollback outcomes here. The
//! collaborator receives only a severity and a message string, never engine
//! state.

use std::fmt;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
  Info,
  Success,
  Warning,
  Error,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Severity::Info => "info",
      Severity::Success => "success",
      Severity::Warning => "warning",
      Severity::Error => "error",
    };
    write!(f, "{}", s)
  }
}

/// Alert surface invoked on mutation commit and rollback.
pub trait Notifier: Send + Sync {
  fn notify(&self, severity: Severity, message: &str);
}

/// Prints notifications to stderr. Used by the CLI.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, severity: Severity, message: &str) {
    eprintln!("[{}] {}", severity, message);
  }
}

/// Collects notifications for later inspection. Used by tests and embedders
/// that render alerts themselves.
#[derive(Default)]
pub struct RecordingNotifier {
  entries: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drain everything recorded so far.
  pub fn take(&self) -> Vec<(Severity, String)> {
    std::mem::take(&mut self.entries.lock().expect("notifier lock poisoned"))
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, severity: Severity, message: &str) {
    self
      .entries
      .lock()
      .expect("notifier lock poisoned")
      .push((severity, message.to_string()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_recording_notifier_drains() {
    let notifier = RecordingNotifier::new();
    notifier.notify(Severity::Warning, "restoring previous values");

    let entries = notifier.take();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Severity::Warning);
    assert!(notifier.take().is_empty());
  }
}
