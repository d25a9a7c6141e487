// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! The task-thread: one OS thread running a private set of tasks with a
//! cooperative loop.
//!
//! The four task lists, the should-exit flag, and the condition variable are
//! guarded by the scheduler lock. The lock is released across context swaps
//! so that foreign senders can enqueue messages and wake tasks owned by this
//! thread. The native context and the cached native stack are touched only
//! by this OS thread.

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
    scheduler::{
        current,
        Scheduler,
    },
    task::{
        swap_context,
        Context,
        StackSegment,
        Task,
        TaskState,
        NATIVE_STACK_SIZE,
    },
};
use ::rand::{
    rngs::SmallRng,
    RngCore,
    SeedableRng,
};
use ::std::{
    cell::{
        RefCell,
        UnsafeCell,
    },
    sync::{
        Arc,
        Condvar,
        Mutex,
        Weak,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Seed for the per-thread random number generator in debug builds.
/// This value was chosen arbitrarily.
#[cfg(debug_assertions)]
const SCHEDULER_SEED: u64 = 42;

//======================================================================================================================
// Structures
//======================================================================================================================

/// State guarded by the scheduler lock.
struct ThreadState {
    /// Tasks created but not yet started.
    newborn: Vec<Arc<Task>>,
    /// Tasks eligible for activation.
    running: Vec<Arc<Task>>,
    /// Tasks waiting on a wakeup.
    blocked: Vec<Arc<Task>>,
    /// Finished tasks awaiting reaping.
    dead: Vec<Arc<Task>>,
    /// Orders the loop to finish once the lists drain.
    should_exit: bool,
    /// Small random number generator for the fairness policy.
    rng: SmallRng,
}

/// One OS thread running a private set of tasks.
pub struct TaskThread {
    /// Index of this thread within its scheduler.
    index: usize,
    /// Id of the owning scheduler.
    sched_id: SchedId,
    /// The owning scheduler.
    sched: Weak<Scheduler>,
    /// The kernel, for id management during reaping.
    kernel: Arc<Kernel>,
    /// Scheduler lock.
    state: Mutex<ThreadState>,
    /// Signaled on every transition and on exit orders.
    cv: Condvar,
    /// Saved context of the loop while a task runs.
    native_ctx: UnsafeCell<Context>,
    /// Cached native stack, lent to tasks during activation.
    native_stack_cache: RefCell<Option<StackSegment>>,
}

// Safety: the native context and the stack cache are accessed only by the OS
// thread running this task-thread's loop; all shared state sits behind the
// scheduler lock.
unsafe impl Send for TaskThread {}
unsafe impl Sync for TaskThread {}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TaskThread {
    /// Creates a task-thread with empty lists.
    pub(crate) fn new(index: usize, sched_id: SchedId, sched: Weak<Scheduler>, kernel: Arc<Kernel>) -> Self {
        Self {
            index,
            sched_id,
            sched,
            kernel,
            state: Mutex::new(ThreadState {
                newborn: Vec::new(),
                running: Vec::new(),
                blocked: Vec::new(),
                dead: Vec::new(),
                should_exit: false,
                #[cfg(debug_assertions)]
                rng: SmallRng::seed_from_u64(SCHEDULER_SEED + index as u64),
                #[cfg(not(debug_assertions))]
                rng: SmallRng::from_entropy(),
            }),
            cv: Condvar::new(),
            native_ctx: UnsafeCell::new(Context::uninit()),
            native_stack_cache: RefCell::new(None),
        }
    }

    /// Returns the index of this thread within its scheduler.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the id of the owning scheduler.
    pub fn sched_id(&self) -> SchedId {
        self.sched_id
    }

    /// Returns a pointer to the saved loop context.
    pub(crate) fn native_ctx_ptr(&self) -> *mut Context {
        self.native_ctx.get()
    }

    /// Creates a newborn task owned by this thread and registers it with the
    /// kernel.
    pub(crate) fn create_task(self: &Arc<Self>, supervisor: Option<TaskId>, name: &str) -> Arc<Task> {
        let task_id: TaskId = self.kernel.next_task_id();
        let task: Arc<Task> = Task::new(self.kernel.clone(), self.clone(), task_id, supervisor, name);
        {
            let mut state = self.state.lock().unwrap();
            state.newborn.push(task.clone());
        }
        self.kernel.register_task(task.clone());
        if logging::is_tracing(mask::TASK) {
            trace!(
                "create_task(): task_id={:?}, name={:?}, thread={}.{}",
                task_id,
                name,
                self.sched_id,
                self.index
            );
        }
        task
    }

    /// Moves a task between two of the four lists and updates its recorded
    /// state, under the scheduler lock. Every transition signals the loop's
    /// condition variable.
    pub(crate) fn transition(&self, task: &Task, from: TaskState, to: TaskState) {
        let mut state = self.state.lock().unwrap();
        assert_eq!(task.state(), from, "task state disagrees with the requested transition");
        if logging::is_tracing(mask::TASK) {
            trace!(
                "transition(): task_id={:?}, name={:?}, {:?} -> {:?}",
                task.id(),
                task.name(),
                from,
                to
            );
        }
        let from_list: &mut Vec<Arc<Task>> = Self::list_mut(&mut state, from);
        let pos: usize = from_list
            .iter()
            .position(|t| t.id() == task.id())
            .expect("task is not on the list matching its state");
        let moved: Arc<Task> = from_list.remove(pos);
        Self::list_mut(&mut state, to).push(moved);
        task.set_state(to);
        self.cv.notify_all();
    }

    /// Orders the loop to finish once its lists drain.
    pub(crate) fn exit(&self) {
        let mut state = self.state.lock().unwrap();
        state.should_exit = true;
        self.cv.notify_all();
    }

    /// Kills every running and blocked task on this thread, breaking their
    /// supervision links first so the teardown does not re-notify the kernel.
    pub(crate) fn kill_all_tasks(&self) {
        let all_tasks: Vec<Arc<Task>> = {
            let state = self.state.lock().unwrap();
            state.running.iter().chain(state.blocked.iter()).cloned().collect()
        };
        for task in all_tasks {
            task.clear_supervisor();
            task.kill();
        }
    }

    /// Returns the lengths of the four task lists
    /// (newborn, running, blocked, dead).
    pub fn task_counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.newborn.len(), state.running.len(), state.blocked.len(), state.dead.len())
    }

    /// Runs the cooperative scheduler loop until ordered to exit and all
    /// lists drain.
    pub(crate) fn run(self: &Arc<Self>) {
        let sched: Arc<Scheduler> = self.sched.upgrade().expect("task-thread outlived its scheduler");

        if logging::is_tracing(mask::DOM) {
            trace!("run(): task-thread {}.{} loop started", self.sched_id, self.index);
        }

        loop {
            // At most one task is reaped per turn; later turns pick up the
            // rest, and a turn with a non-empty dead list never sleeps.
            if self.reap_one_dead(&sched) {
                continue;
            }

            let task: Arc<Task> = {
                let mut state = self.state.lock().unwrap();
                if state.should_exit && Self::lists_empty(&state) {
                    break;
                }
                match Self::pick_runnable(&mut state) {
                    Some(task) => task,
                    None => {
                        self.log_state(&state);
                        let state = self.cv.wait(state).unwrap();
                        assert!(state.dead.is_empty(), "tasks should only die after running");
                        continue;
                    },
                }
            };

            assert_eq!(task.state(), TaskState::Running, "scheduled a task that is not running");
            current::set_current_task(task.clone());
            task.record_stack_limit();
            self.activate(&task);
            current::clear_current_task();
        }

        {
            let state = self.state.lock().unwrap();
            assert!(state.newborn.is_empty(), "should have no newborn tasks");
            assert!(state.running.is_empty(), "should have no running tasks");
            assert!(state.blocked.is_empty(), "should have no blocked tasks");
            assert!(state.dead.is_empty(), "should have no dead tasks");
        }
        *self.native_stack_cache.borrow_mut() = None;

        if logging::is_tracing(mask::DOM) {
            trace!("run(): task-thread {}.{} loop finished", self.sched_id, self.index);
        }

        sched.release_task_thread();
    }

    /// Picks a runnable task at a random index.
    fn pick_runnable(state: &mut ThreadState) -> Option<Arc<Task>> {
        if state.running.is_empty() {
            return None;
        }
        let k: usize = state.rng.next_u64() as usize % state.running.len();
        Some(state.running[k].clone())
    }

    /// Swaps onto the task's stack and returns when the task yields, blocks,
    /// or dies.
    fn activate(&self, task: &Arc<Task>) {
        // The native stack must be ready before leaving this stack: the task
        // stack may be too small to allocate one mid-flight.
        self.prepare_native_stack(task);
        if logging::is_tracing(mask::TASK) {
            trace!("activate(): task_id={:?}, name={:?}", task.id(), task.name());
        }
        // Safety: the task context was seeded by start() or filled by the
        // task's last switch away; its stack is alive and parked.
        unsafe { swap_context(self.native_ctx.get(), task.ctx_ptr()) };
        self.unprepare_native_stack(task);
    }

    /// Ensures the task carries a native stack across its activation.
    fn prepare_native_stack(&self, task: &Arc<Task>) {
        if task.has_native_stack() {
            return;
        }
        let stack: StackSegment = match self.native_stack_cache.borrow_mut().take() {
            Some(stack) => stack,
            None => {
                if logging::is_tracing(mask::MEM) {
                    trace!("prepare_native_stack(): allocating a fresh native stack");
                }
                StackSegment::new(NATIVE_STACK_SIZE).expect("cannot allocate a native stack")
            },
        };
        task.lend_native_stack(stack);
    }

    /// Returns the lent native stack to the cache at deactivation.
    fn unprepare_native_stack(&self, task: &Arc<Task>) {
        if let Some(stack) = task.reclaim_native_stack() {
            let mut cache = self.native_stack_cache.borrow_mut();
            if cache.is_none() {
                *cache = Some(stack);
            }
        }
    }

    /// Reaps one dead task, if any: releases its kernel id, frees its stacks,
    /// drops the list reference, and lets the scheduler account for the
    /// death.
    fn reap_one_dead(&self, sched: &Scheduler) -> bool {
        let dead_task: Option<Arc<Task>> = self.state.lock().unwrap().dead.pop();
        let task: Arc<Task> = match dead_task {
            Some(task) => task,
            None => return false,
        };
        if logging::is_tracing(mask::TASK) {
            trace!("reap_one_dead(): task_id={:?}, name={:?}", task.id(), task.name());
        }
        // Release the id first so nobody else can resolve the corpse.
        self.kernel.release_task_id(task.id());
        task.free_stacks();
        drop(task);
        sched.release_task();
        true
    }

    fn lists_empty(state: &ThreadState) -> bool {
        state.newborn.is_empty() && state.running.is_empty() && state.blocked.is_empty() && state.dead.is_empty()
    }

    fn list_mut(state: &mut ThreadState, which: TaskState) -> &mut Vec<Arc<Task>> {
        match which {
            TaskState::Newborn => &mut state.newborn,
            TaskState::Running => &mut state.running,
            TaskState::Blocked => &mut state.blocked,
            TaskState::Dead => &mut state.dead,
        }
    }

    /// Dumps the task lists when nothing is runnable.
    fn log_state(&self, state: &ThreadState) {
        if !logging::is_tracing(mask::DOM) {
            return;
        }
        debug!(
            "log_state(): thread {}.{}: {} newborn, {} running, {} blocked, {} dead",
            self.sched_id,
            self.index,
            state.newborn.len(),
            state.running.len(),
            state.blocked.len(),
            state.dead.len()
        );
        for task in &state.blocked {
            debug!("\ttask {:?} ({:?}) blocked", task.id(), task.name());
        }
    }
}
