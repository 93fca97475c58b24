use std::fmt;

use crate::stored_object;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Success => write!(f, "SUCCESS"),
            TaskStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

// The record id is the progress topic, so the table holds the latest value
// per topic.
stored_object!(TaskProgress, "task_progress", {
    task_id: String,
    graph_scope: String,
    status: TaskStatus,
    #[serde(default)]
    chunks_total: usize,
    #[serde(default)]
    chunks_done: usize,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    answer: Option<String>
});

impl TaskProgress {
    fn with_status(topic: &str, task_id: &str, graph_scope: &str, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            id: topic.to_owned(),
            created_at: now,
            updated_at: now,
            task_id: task_id.to_owned(),
            graph_scope: graph_scope.to_owned(),
            status,
            chunks_total: 0,
            chunks_done: 0,
            error: None,
            answer: None,
        }
    }

    pub fn running(topic: &str, task_id: &str, graph_scope: &str) -> Self {
        Self::with_status(topic, task_id, graph_scope, TaskStatus::Running)
    }

    pub fn success(topic: &str, task_id: &str, graph_scope: &str) -> Self {
        Self::with_status(topic, task_id, graph_scope, TaskStatus::Success)
    }

    pub fn failure(topic: &str, task_id: &str, graph_scope: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(topic, task_id, graph_scope, TaskStatus::Failure)
        }
    }

    pub fn with_chunks(mut self, chunks_done: usize, chunks_total: usize) -> Self {
        self.chunks_done = chunks_done;
        self.chunks_total = chunks_total;
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn topic(&self) -> &str {
        &self.id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let progress = TaskProgress::running("graph:t1", "t1", "g1").with_chunks(1, 3);
        let json = serde_json::to_value(&progress).expect("serialize");

        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["chunks_total"], 3);
        assert_eq!(json["chunks_done"], 1);
        assert!(!progress.is_terminal());
    }

    #[test]
    fn test_failure_carries_error() {
        let progress = TaskProgress::failure("answer:t1", "t1", "g1", "boom");

        assert_eq!(progress.status, TaskStatus::Failure);
        assert_eq!(progress.error.as_deref(), Some("boom"));
        assert_eq!(progress.topic(), "answer:t1");
        assert!(progress.is_terminal());
    }
}
