//! The slice of async-task bookkeeping the orchestrator relies on.

use std::sync::{Mutex, PoisonError};

use tracing::info;

/// The enclosing unit of work. Its id owns any scope lock the work takes.
pub trait TaskContext: Send + Sync {
    fn id(&self) -> &str;

    /// Record human-readable progress.
    fn log_status(&self, message: &str);
}

/// In-memory task context: status lines are kept and mirrored to tracing.
#[derive(Debug)]
pub struct TaskLog {
    id: String,
    lines: Mutex<Vec<String>>,
}

impl TaskLog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    /// A context with a fresh random id.
    pub fn generate(kind: &str) -> Self {
        Self::new(format!("{kind}-{:08x}", rand::random::<u32>()))
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl TaskContext for TaskLog {
    fn id(&self) -> &str {
        &self.id
    }

    fn log_status(&self, message: &str) {
        info!(task = %self.id, "{message}");
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_status_lines_in_order() {
        let task = TaskLog::new("deploy-1");
        task.log_status("choosing hosts");
        task.log_status("deployed 1/1");
        assert_eq!(task.id(), "deploy-1");
        assert_eq!(task.lines(), vec!["choosing hosts", "deployed 1/1"]);
    }

    #[test]
    fn generated_ids_carry_the_kind() {
        let a = TaskLog::generate("teardown");
        let b = TaskLog::generate("teardown");
        assert!(a.id().starts_with("teardown-"));
        assert_ne!(a.id(), b.id());
    }
}
