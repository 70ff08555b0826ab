use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one download task.
///
/// `Preparing -> Running -> {Completed, Failed, Cancelled}`. Preparing may also
/// jump straight to a terminal state when the transfer is skipped or the task
/// is cancelled before launch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Preparing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        match self {
            Self::Preparing => next != Self::Preparing,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub task_id: Uuid,
    pub title: String,
    pub percent: f64,
    pub state: TaskState,
}

pub trait EventEmitter: Send + Sync + Clone + 'static {
    fn emit_progress(&self, progress: &TaskProgress);
}
