use crate::catalog::Task;

/// Interaction state for one conversation: the task currently shown to the
/// user. Lives as long as the caller keeps it; nothing here is persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    current_task: Option<Task>,
}

impl Session {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            current_task: None,
        }
    }

    pub fn present(&mut self, task: Task) {
        self.current_task = Some(task);
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current_task.as_ref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.current_task.as_ref()?.hint.as_deref()
    }

    pub fn solution(&self) -> Option<&str> {
        self.current_task.as_ref()?.solution.as_deref()
    }

    /// Drops the active task. Returns whether one was active.
    pub fn cancel(&mut self) -> bool {
        self.current_task.take().is_some()
    }

    pub(crate) fn take_task(&mut self) -> Option<Task> {
        self.current_task.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::task;

    #[test]
    fn new_session_has_no_task() {
        let session = Session::new(1);
        assert!(session.current_task().is_none());
        assert!(session.hint().is_none());
        assert!(session.solution().is_none());
    }

    #[test]
    fn present_exposes_hint_and_solution() {
        let mut session = Session::new(1);
        session.present(task("t1", "logic", 2));
        assert_eq!(session.hint(), Some("Hint for t1"));
        assert_eq!(session.solution(), Some("Solution for t1"));
    }

    #[test]
    fn task_without_hint() {
        let mut session = Session::new(1);
        let mut t = task("t1", "logic", 2);
        t.hint = None;
        session.present(t);
        assert!(session.hint().is_none());
    }

    #[test]
    fn cancel_clears_task() {
        let mut session = Session::new(1);
        session.present(task("t1", "logic", 2));
        assert!(session.cancel());
        assert!(!session.cancel());
        assert!(session.current_task().is_none());
    }
}
