//! Resource accountant (C4): tracks global CPU-core and memory-GiB pools and
//! decides which pending tasks are admissible right now.

use std::collections::HashMap;

use crate::task::ExecutableTask;

/// Owned, not shared: touched only from the scheduler's loop, so no
/// synchronization is needed (see the concurrency notes in the design doc).
pub struct ResourceManager {
    available_cores: u32,
    available_memory_gib: u32,
    total_cores: u32,
    total_memory_gib: u32,
    allocations: HashMap<String, (u32, u32)>,
}

impl ResourceManager {
    pub fn new(total_cores: u32, total_memory_gib: u32) -> Self {
        Self {
            available_cores: total_cores,
            available_memory_gib: total_memory_gib,
            total_cores,
            total_memory_gib,
            allocations: HashMap::new(),
        }
    }

    pub fn available_cores(&self) -> u32 {
        self.available_cores
    }

    pub fn available_memory_gib(&self) -> u32 {
        self.available_memory_gib
    }

    pub fn can_admit(&self, task: &ExecutableTask) -> bool {
        task.max_cores <= self.available_cores && task.max_memory_gib <= self.available_memory_gib
    }

    /// Attempt to admit `task`. Returns `false` and leaves the pool untouched
    /// if it does not currently fit.
    pub fn admit(&mut self, task: &ExecutableTask) -> bool {
        if !self.can_admit(task) {
            return false;
        }
        self.available_cores -= task.max_cores;
        self.available_memory_gib -= task.max_memory_gib;
        self.allocations
            .insert(task.task_name.clone(), (task.max_cores, task.max_memory_gib));
        true
    }

    /// Reverse a prior `admit`. Releasing a task that was never admitted is a
    /// programming error and is logged rather than panicking in production
    /// code paths, but debug builds assert on it.
    pub fn release(&mut self, task: &ExecutableTask) {
        match self.allocations.remove(&task.task_name) {
            Some((cores, memory)) => {
                self.available_cores += cores;
                self.available_memory_gib += memory;
            }
            None => {
                debug_assert!(false, "released task '{}' was never admitted", task.task_name);
                tracing::warn!(task = task.task_name.as_str(), "release() called on an unadmitted task");
            }
        }
    }

    /// Select, in FIFO order, the prefix of `pending` that fits the currently
    /// available pool — skipping (not stopping at) oversized tasks so a
    /// smaller task behind one that doesn't fit can still be admitted this
    /// round.
    pub fn select_schedulable<'a>(&self, pending: &'a [ExecutableTask]) -> Vec<&'a ExecutableTask> {
        let mut remaining_cores = self.available_cores;
        let mut remaining_memory = self.available_memory_gib;
        let mut selected = Vec::new();
        for task in pending {
            if task.max_cores <= remaining_cores && task.max_memory_gib <= remaining_memory {
                remaining_cores -= task.max_cores;
                remaining_memory -= task.max_memory_gib;
                selected.push(task);
            }
        }
        selected
    }

    pub fn is_idle(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn total_memory_gib(&self) -> u32 {
        self.total_memory_gib
    }
}
