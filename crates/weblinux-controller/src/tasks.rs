//! Task catalogue.
//!
//! Maps every live task to the runner hosting it. The kernel names tasks
//! by their control-block pointer inside kernel memory; the controller
//! never interprets the value beyond identity.

use std::collections::HashMap;

pub(crate) type RunnerId = u32;
pub(crate) type TaskId = u32;

pub(crate) struct TaskTable {
    by_task: HashMap<TaskId, RunnerId>,
    init_task: Option<TaskId>,
    next_runner: RunnerId,
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            by_task: HashMap::new(),
            init_task: None,
            next_runner: 1,
        }
    }

    pub fn alloc_runner_id(&mut self) -> RunnerId {
        let id = self.next_runner;
        self.next_runner += 1;
        id
    }

    /// Bind a task to the runner hosting it.
    pub fn bind(&mut self, task: TaskId, runner: RunnerId) {
        self.by_task.insert(task, runner);
    }

    pub fn runner_of(&self, task: TaskId) -> Option<RunnerId> {
        self.by_task.get(&task).copied()
    }

    /// Drop a dead task; returns its runner when it was known.
    pub fn release(&mut self, task: TaskId) -> Option<RunnerId> {
        self.by_task.remove(&task)
    }

    pub fn set_init_task(&mut self, task: TaskId) {
        self.init_task = Some(task);
    }

    pub fn init_task(&self) -> Option<TaskId> {
        self.init_task
    }

    pub fn len(&self) -> usize {
        self.by_task.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_to_init_catalogue() {
        // After the primary runner reports init_task = 0xCAFE, the
        // catalogue holds exactly that task, mapped to the primary runner.
        let mut tasks = TaskTable::new();
        let primary = tasks.alloc_runner_id();
        tasks.set_init_task(0xCAFE);
        tasks.bind(0xCAFE, primary);

        assert_eq!(tasks.init_task(), Some(0xCAFE));
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks.runner_of(0xCAFE), Some(primary));
    }

    #[test]
    fn release_forgets_the_task() {
        let mut tasks = TaskTable::new();
        let runner = tasks.alloc_runner_id();
        tasks.bind(7, runner);
        assert_eq!(tasks.release(7), Some(runner));
        assert_eq!(tasks.runner_of(7), None);
        assert_eq!(tasks.release(7), None);
    }

    #[test]
    fn runner_ids_are_unique() {
        let mut tasks = TaskTable::new();
        let a = tasks.alloc_runner_id();
        let b = tasks.alloc_runner_id();
        assert_ne!(a, b);
    }
}
