// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! The scheduler: a group of task-threads sharing a round-robin task
//! placement policy.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    kernel::Kernel,
    runtime::{
        ids::{
            SchedId,
            TaskId,
        },
        logging::{
            self,
            mask,
        },
    },
    scheduler::TaskThread,
    task::Task,
};
use ::std::{
    sync::{
        Arc,
        Mutex,
    },
    thread,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Bookkeeping guarded by the scheduler group lock.
struct SchedulerInner {
    /// Tasks created and not yet reaped, across all threads.
    live_tasks: usize,
    /// Task-threads whose loops have not finished.
    live_threads: usize,
    /// Round-robin cursor for task placement.
    cur_thread: usize,
}

/// A group of task-threads.
pub struct Scheduler {
    /// Kernel-minted identifier.
    id: SchedId,
    /// The kernel, notified when the last task-thread releases.
    kernel: Arc<Kernel>,
    /// The task-threads, fixed at creation.
    threads: Vec<Arc<TaskThread>>,
    /// Live counts and the placement cursor.
    inner: Mutex<SchedulerInner>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Scheduler {
    /// Creates a scheduler with `num_threads` task-threads. The threads are
    /// constructed here and launched by [start_threads](Self::start_threads).
    pub(crate) fn new(kernel: Arc<Kernel>, id: SchedId, num_threads: usize) -> Arc<Scheduler> {
        assert!(num_threads > 0, "cannot create a scheduler with zero threads");
        if logging::is_tracing(mask::KERN) {
            trace!("new(): sched_id={:?}, num_threads={}", id, num_threads);
        }
        Arc::new_cyclic(|weak| Scheduler {
            id,
            kernel: kernel.clone(),
            threads: (0..num_threads)
                .map(|index| Arc::new(TaskThread::new(index, id, weak.clone(), kernel.clone())))
                .collect(),
            inner: Mutex::new(SchedulerInner {
                live_tasks: 0,
                live_threads: num_threads,
                cur_thread: 0,
            }),
        })
    }

    /// Launches one OS thread per task-thread.
    pub(crate) fn start_threads(&self) {
        for thread in &self.threads {
            let thread: Arc<TaskThread> = thread.clone();
            let name: String = format!("task-thread-{}.{}", self.id, thread.index());
            thread::Builder::new()
                .name(name)
                .spawn(move || thread.run())
                .expect("cannot spawn a task-thread");
        }
    }

    /// Returns the id of this scheduler.
    pub fn id(&self) -> SchedId {
        self.id
    }

    /// Returns the number of task-threads in this scheduler.
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Returns the number of task-threads whose loops have not finished.
    pub fn live_threads(&self) -> usize {
        self.inner.lock().unwrap().live_threads
    }

    /// Returns the task list lengths (newborn, running, blocked, dead) of
    /// every task-thread.
    pub fn task_counts_per_thread(&self) -> Vec<(usize, usize, usize, usize)> {
        self.threads.iter().map(|t| t.task_counts()).collect()
    }

    /// Creates a newborn task, placing it by round-robin over the
    /// task-threads.
    pub(crate) fn create_task(&self, supervisor: Option<TaskId>, name: &str) -> Arc<Task> {
        let thread_index: usize = {
            let mut inner = self.inner.lock().unwrap();
            inner.live_tasks += 1;
            let thread_index: usize = inner.cur_thread;
            inner.cur_thread = (inner.cur_thread + 1) % self.threads.len();
            thread_index
        };
        self.threads[thread_index].create_task(supervisor, name)
    }

    /// Accounts for a reaped task. The last task leaving orders the whole
    /// group to exit.
    pub(crate) fn release_task(&self) {
        let need_exit: bool = {
            let mut inner = self.inner.lock().unwrap();
            inner.live_tasks -= 1;
            inner.live_tasks == 0
        };
        if need_exit {
            self.exit();
        }
    }

    /// Orders every task-thread to finish once its lists drain.
    pub(crate) fn exit(&self) {
        if logging::is_tracing(mask::KERN) {
            trace!("exit(): sched_id={:?}", self.id);
        }
        for thread in &self.threads {
            thread.exit();
        }
    }

    /// Accounts for a finished task-thread loop. The last one releases the
    /// scheduler id with the kernel.
    pub(crate) fn release_task_thread(&self) {
        let last: bool = {
            let mut inner = self.inner.lock().unwrap();
            inner.live_threads -= 1;
            inner.live_threads == 0
        };
        if last {
            self.kernel.release_scheduler_id(self.id);
        }
    }

    /// Kills every running and blocked task in the group. Used during
    /// emergency shutdown.
    pub(crate) fn kill_all_tasks(&self) {
        for thread in &self.threads {
            thread.kill_all_tasks();
        }
    }
}
