//! Background task registry and progress tracking.
//!
//! Each import request runs detached on its own tokio task, keyed by an
//! opaque session token. Callers poll the shared progress store instead of
//! blocking on the run. Entries are owned by one run at a time and never
//! expire; there is no cancellation primitive, so a run only ends by
//! reaching a terminal status or failing a bounded wait.

use crate::config::Config;
use crate::scrape::{self, Credentials, DateRange};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Caller-visible status of one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Running,
    Complete,
    CompleteWithInfo,
    CompleteWithWarnings,
    Error,
}

impl TaskStatus {
    /// Returns true once the run can no longer change this record.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete
                | TaskStatus::CompleteWithInfo
                | TaskStatus::CompleteWithWarnings
                | TaskStatus::Error
        )
    }
}

/// Progress record for one in-flight or completed import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    pub percentage: u8,
    pub status: TaskStatus,
}

impl Progress {
    /// Record returned for tokens with no known run.
    pub fn not_started() -> Self {
        Self {
            message: "No import in progress".to_string(),
            percentage: 0,
            status: TaskStatus::NotStarted,
        }
    }

    fn starting() -> Self {
        Self {
            message: "Starting import process...".to_string(),
            percentage: 0,
            status: TaskStatus::Running,
        }
    }
}

/// Thread-safe progress store, one entry per session token.
///
/// Uses DashMap for concurrent access without external locking. Entries are
/// never evicted; growth is bounded only by process lifetime.
pub struct TaskRegistry {
    tasks: DashMap<String, Progress>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Issues a fresh opaque session token.
    pub fn new_token(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// Returns the current progress for `token`, or a default not-started
    /// record if the token is unknown.
    pub fn progress(&self, token: &str) -> Progress {
        self.tasks
            .get(token)
            .map(|entry| entry.clone())
            .unwrap_or_else(Progress::not_started)
    }

    /// Registers a running record for `token` and launches the import
    /// detached from the caller.
    ///
    /// Starting a second import under an in-flight token overwrites the
    /// record's visibility but does not cancel the first run.
    pub fn start_import(
        self: &Arc<Self>,
        token: &str,
        credentials: Credentials,
        range: DateRange,
        config: Arc<Config>,
    ) {
        self.tasks.insert(token.to_string(), Progress::starting());
        let handle = ProgressHandle::new(Arc::clone(self), token.to_string());
        // Entries are never evicted; tracked count grows with process lifetime.
        info!(token = %redact(token), tracked = self.tasks.len(), "import scheduled");
        tokio::spawn(async move {
            scrape::run_import(handle, credentials, range, config).await;
        });
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Write handle for the single run that owns a token's record.
pub struct ProgressHandle {
    registry: Arc<TaskRegistry>,
    token: String,
}

impl ProgressHandle {
    pub(crate) fn new(registry: Arc<TaskRegistry>, token: String) -> Self {
        Self { registry, token }
    }

    /// Records a non-terminal stage transition.
    pub fn update(&self, message: impl Into<String>, percentage: u8) {
        self.set(message.into(), percentage, TaskStatus::Running);
    }

    /// Records a terminal status.
    pub fn finish(&self, message: impl Into<String>, percentage: u8, status: TaskStatus) {
        self.set(message.into(), percentage, status);
    }

    /// Percentage currently recorded for this run.
    pub fn percentage(&self) -> u8 {
        self.registry
            .tasks
            .get(&self.token)
            .map(|entry| entry.percentage)
            .unwrap_or(0)
    }

    fn set(&self, message: String, percentage: u8, status: TaskStatus) {
        info!(
            token = %redact(&self.token),
            percentage,
            status = ?status,
            "{message}"
        );
        self.registry.tasks.insert(
            self.token.clone(),
            Progress {
                message,
                percentage,
                status,
            },
        );
    }
}

/// Shortens a token for logging.
fn redact(token: &str) -> &str {
    &token[..8.min(token.len())]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_reads_as_not_started() {
        let registry = TaskRegistry::new();
        let progress = registry.progress("no-such-token");
        assert_eq!(progress.status, TaskStatus::NotStarted);
        assert_eq!(progress.percentage, 0);
    }

    #[test]
    fn tokens_are_fresh_and_opaque() {
        let registry = TaskRegistry::new();
        let a = registry.new_token();
        let b = registry.new_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn handle_mutates_only_its_own_record() {
        let registry = Arc::new(TaskRegistry::new());
        let handle = ProgressHandle::new(Arc::clone(&registry), "token-a".to_string());

        handle.update("Scraping week 1/3...", 43);
        assert_eq!(registry.progress("token-a").percentage, 43);
        assert_eq!(registry.progress("token-a").status, TaskStatus::Running);
        assert_eq!(registry.progress("token-b").status, TaskStatus::NotStarted);

        handle.finish("Done", 100, TaskStatus::Complete);
        let done = registry.progress("token-a");
        assert_eq!(done.percentage, 100);
        assert!(done.status.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let progress = Progress {
            message: "done".to_string(),
            percentage: 100,
            status: TaskStatus::CompleteWithWarnings,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["status"], "complete_with_warnings");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::NotStarted.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::CompleteWithInfo.is_terminal());
        assert!(TaskStatus::CompleteWithWarnings.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }
}
