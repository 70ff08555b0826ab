use std::io::Write;

use medialoader_core::core::events::{EventEmitter, TaskProgress, TaskState};

/// Prints task progress as a single updating line on stderr.
#[derive(Clone, Default)]
pub struct ConsoleEventEmitter;

impl ConsoleEventEmitter {
    pub fn new() -> Self {
        Self
    }
}

pub fn progress_line(progress: &TaskProgress) -> String {
    match progress.state {
        TaskState::Running | TaskState::Preparing => {
            format!("{:>5.1}%  {}", progress.percent.clamp(0.0, 100.0), progress.title)
        }
        state => format!("{:>6}  {}", state.to_string(), progress.title),
    }
}

impl EventEmitter for ConsoleEventEmitter {
    fn emit_progress(&self, progress: &TaskProgress) {
        let mut err = std::io::stderr().lock();
        if progress.state.is_terminal() {
            let _ = writeln!(err, "\r{}", progress_line(progress));
        } else {
            let _ = write!(err, "\r{}", progress_line(progress));
        }
        let _ = err.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn running_shows_percent() {
        let progress = TaskProgress {
            task_id: Uuid::nil(),
            title: "Band - Track".into(),
            percent: 42.0,
            state: TaskState::Running,
        };
        assert_eq!(progress_line(&progress), " 42.0%  Band - Track");
    }

    #[test]
    fn terminal_shows_state() {
        let progress = TaskProgress {
            task_id: Uuid::nil(),
            title: "x".into(),
            percent: 100.0,
            state: TaskState::Completed,
        };
        assert!(progress_line(&progress).contains("completed"));
    }
}
