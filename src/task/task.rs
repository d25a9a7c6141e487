// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! The task: a cooperatively scheduled unit of execution with its own stack
//! and a four-state lifecycle.
//!
//! A task is mutated only by its owning task-thread, with one exception: the
//! fields behind the task lock ([TaskInner]) may be touched by foreign
//! senders (kill, rendezvous, port resolution, join registration). The
//! context and the stacks are single-owner state and live in [UnsafeCell]s.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    kernel::Kernel,
    port::{
        selector::SelectorState,
        Port,
    },
    runtime::{
        fail::{
            Fail,
            FailKind,
        },
        ids::{
            PortId,
            TaskId,
        },
        logging::{
            self,
            mask,
        },
    },
    scheduler::TaskThread,
    task::{
        context::{
            swap_context,
            Context,
        },
        stack::StackSegment,
    },
};
use ::std::{
    cell::UnsafeCell,
    collections::HashMap,
    ffi::c_void,
    mem,
    panic::{
        self,
        AssertUnwindSafe,
    },
    sync::{
        atomic::{
            AtomicU8,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Lifecycle states of a task. The state always agrees with the task-thread
/// list the task currently sits on.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum TaskState {
    /// Created but not yet started.
    Newborn = 0,
    /// Eligible for activation.
    Running = 1,
    /// Waiting on a [WaitCause].
    Blocked = 2,
    /// Finished; awaiting reaping by the owning task-thread.
    Dead = 3,
}

/// What a blocked task is waiting for. Wakeups name the cause they resolve;
/// a mismatch is a runtime invariant violation.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub(crate) enum WaitCause {
    /// Receive on one port.
    Port(PortId),
    /// Multi-port select through the task's selector.
    Selector,
    /// Exit of another task.
    Join(TaskId),
}

/// The rendezvous slot a blocked task publishes for its waker.
#[derive(Debug)]
pub(crate) enum RendezvousSlot {
    /// Nothing armed, or the last rendezvous was consumed.
    Empty,
    /// Receive destination: the sender copies one message here.
    Data { ptr: *mut u8, len: usize },
    /// Select outcome: the sender stores the identity of the ready port here.
    ReadyPort { ptr: *mut Option<PortId> },
}

/// Entry function of a task.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// State behind the task lock, shared with foreign senders.
pub(crate) struct TaskInner {
    /// Cooperative cancellation flag, observed at yield and block points.
    pub(crate) killed: bool,
    /// Task that spawned this one; cleared by unsupervise.
    pub(crate) supervisor: Option<TaskId>,
    /// Whether a failure with no supervisor reaches the kernel; cleared by
    /// unsupervise.
    pub(crate) propagate: bool,
    /// Wait cause and human-readable label while blocked.
    pub(crate) blocked_on: Option<(WaitCause, &'static str)>,
    /// Rendezvous slot published while blocked in receive or select.
    pub(crate) rendezvous: RendezvousSlot,
    /// Ports owned by this task, resolved by foreign senders.
    pub(crate) ports: HashMap<PortId, Arc<Port>>,
    /// Tasks waiting for this task to exit.
    pub(crate) joiners: Vec<TaskId>,
    /// Entry function, taken at first activation.
    pub(crate) entry: Option<TaskFn>,
}

/// A cooperatively scheduled task.
pub struct Task {
    /// Kernel-minted identifier.
    id: TaskId,
    /// Human-readable name.
    name: String,
    /// The task-thread that owns this task. Tasks never migrate.
    thread: Arc<TaskThread>,
    /// The kernel, for id lookups and exit coordination.
    kernel: Arc<Kernel>,
    /// Current lifecycle state; written only under the owning task-thread's
    /// scheduler lock, in lockstep with list membership.
    state: AtomicU8,
    /// State shared with foreign senders (the task lock).
    inner: Mutex<TaskInner>,
    /// Select coordination state (the selector rendezvous lock).
    selector: Mutex<SelectorState>,
    /// Saved execution context. Touched only by the owning task-thread and
    /// by start() before the task is first scheduled.
    ctx: UnsafeCell<Context>,
    /// The task's own stack.
    stack: UnsafeCell<Option<StackSegment>>,
    /// Native stack claimed from the task-thread cache during activation.
    native_stack: UnsafeCell<Option<StackSegment>>,
    /// Lowest valid address of the task stack, recorded at activation.
    stack_limit: AtomicUsize,
}

// Safety: the UnsafeCell fields (context and stacks) are accessed only by the
// owning task-thread, or by the spawner before the task first becomes
// runnable; everything else is behind the task lock or atomic.
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TaskState {
    fn from_u8(val: u8) -> TaskState {
        match val {
            0 => TaskState::Newborn,
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            3 => TaskState::Dead,
            _ => panic!("invalid task state (state={:?})", val),
        }
    }
}

impl Task {
    /// Creates a task in the newborn state, owned by `thread`.
    pub(crate) fn new(kernel: Arc<Kernel>, thread: Arc<TaskThread>, id: TaskId, supervisor: Option<TaskId>, name: &str) -> Arc<Task> {
        Arc::new(Task {
            id,
            name: name.to_string(),
            thread,
            kernel,
            state: AtomicU8::new(TaskState::Newborn as u8),
            inner: Mutex::new(TaskInner {
                killed: false,
                supervisor,
                propagate: true,
                blocked_on: None,
                rendezvous: RendezvousSlot::Empty,
                ports: HashMap::new(),
                joiners: Vec::new(),
                entry: None,
            }),
            selector: Mutex::new(SelectorState::new()),
            ctx: UnsafeCell::new(Context::uninit()),
            stack: UnsafeCell::new(None),
            native_stack: UnsafeCell::new(None),
            stack_limit: AtomicUsize::new(0),
        })
    }

    /// Returns the id of this task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the name of this task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state of this task.
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Updates the lifecycle state. Called by the owning task-thread while it
    /// moves the task between lists under its scheduler lock.
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Returns the kernel this task belongs to.
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Returns the task-thread that owns this task.
    pub(crate) fn thread(&self) -> &Arc<TaskThread> {
        &self.thread
    }

    /// Returns the task lock.
    pub(crate) fn inner(&self) -> &Mutex<TaskInner> {
        &self.inner
    }

    /// Returns the selector rendezvous lock.
    pub(crate) fn selector(&self) -> &Mutex<SelectorState> {
        &self.selector
    }

    /// Queries the cooperative cancellation flag.
    pub fn is_killed(&self) -> bool {
        self.inner.lock().unwrap().killed
    }

    /// Starts a newborn task: allocates its stack, seeds its context, and
    /// makes it runnable.
    pub fn start(self: &Arc<Self>, entry: TaskFn) -> Result<(), Fail> {
        let mut inner = self.inner.lock().unwrap();
        if self.state() != TaskState::Newborn {
            let cause: String = format!("task already started (task_id={:?})", self.id);
            error!("start(): {}", cause);
            return Err(Fail::new(FailKind::AlreadyStarted, &cause));
        }

        let stack: StackSegment = StackSegment::new(self.kernel.config().min_stack_size)?;
        let arg: *mut c_void = Arc::into_raw(self.clone()) as *mut c_void;

        // Safety: the task is newborn, so nothing else touches its context or
        // stack until the transition below makes it runnable.
        unsafe {
            *self.ctx.get() = Context::seed(&stack, task_entry, arg);
            *self.stack.get() = Some(stack);
        }

        inner.entry = Some(entry);
        self.thread.transition(self, TaskState::Newborn, TaskState::Running);
        Ok(())
    }

    /// Marks the task killed and, if it is blocked, wakes it so it can
    /// observe the flag and unwind at its next yield point.
    pub fn kill(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.killed {
            return;
        }
        inner.killed = true;
        if logging::is_tracing(mask::TASK) {
            trace!("kill(): task_id={:?}, name={:?}, state={:?}", self.id, self.name, self.state());
        }
        if self.state() == TaskState::Blocked {
            let (cause, _label) = *inner.blocked_on.as_ref().expect("blocked task has no wait cause");
            self.wakeup_with_inner(&mut inner, cause);
        }
    }

    /// Breaks the supervision link: a later failure of this task neither
    /// fails a supervisor nor reaches the kernel.
    pub(crate) fn clear_supervisor(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.supervisor = None;
        inner.propagate = false;
    }

    /// Blocks the task on `cause`. The caller holds the task lock, is the
    /// task itself, and must switch to the scheduler after releasing it.
    pub(crate) fn block_with_inner(&self, inner: &mut TaskInner, cause: WaitCause, label: &'static str) {
        assert!(inner.blocked_on.is_none(), "task is already blocked on {:?}", inner.blocked_on);
        inner.blocked_on = Some((cause, label));
        self.thread.transition(self, TaskState::Running, TaskState::Blocked);
    }

    /// Wakes the task from `cause`. The caller holds the task lock. Waking a
    /// task that is blocked on anything else is a runtime invariant
    /// violation.
    pub(crate) fn wakeup_with_inner(&self, inner: &mut TaskInner, cause: WaitCause) {
        match inner.blocked_on.take() {
            Some((blocked_cause, _label)) if blocked_cause == cause => {},
            other => panic!(
                "task {} woken on wrong cause (blocked_on={:?}, wakeup={:?})",
                self.id, other, cause
            ),
        }
        self.thread.transition(self, TaskState::Blocked, TaskState::Running);
    }

    /// Wakes the task only if it is currently blocked on `cause`. Used by
    /// waker paths that race with the wait being established.
    pub(crate) fn wakeup_if_blocked_on(&self, cause: WaitCause) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.blocked_on {
            Some((blocked_cause, _label)) if blocked_cause == cause => {
                self.wakeup_with_inner(&mut inner, cause);
                true
            },
            _ => false,
        }
    }

    /// Returns a pointer to the saved task context, for the owning
    /// task-thread's activation swap.
    pub(crate) fn ctx_ptr(&self) -> *mut Context {
        self.ctx.get()
    }

    /// Suspends the task, handing control back to the owning task-thread's
    /// scheduler loop. Must be called by the task itself, on its own stack,
    /// with no locks held. Returns when the scheduler next activates the
    /// task.
    pub(crate) fn switch_to_scheduler(&self) {
        // Safety: the scheduler context was saved by the activation that is
        // currently parked in the owning task-thread, on this OS thread.
        unsafe { swap_context(self.ctx.get(), self.thread.native_ctx_ptr()) };
    }

    /// Records the lowest valid address of the task stack. Done by the
    /// owning task-thread right before each activation.
    pub(crate) fn record_stack_limit(&self) {
        // Safety: called by the owning task-thread only.
        let limit: usize = unsafe { (*self.stack.get()).as_ref().map(|s| s.limit() as usize).unwrap_or(0) };
        self.stack_limit.store(limit, Ordering::Relaxed);
    }

    /// Returns the recorded stack limit of this task.
    pub fn stack_limit(&self) -> usize {
        self.stack_limit.load(Ordering::Relaxed)
    }

    /// Queries whether the task currently carries a native stack.
    pub(crate) fn has_native_stack(&self) -> bool {
        // Safety: called by the owning task-thread only.
        unsafe { (*self.native_stack.get()).is_some() }
    }

    /// Hands the task a native stack for the duration of its activation.
    pub(crate) fn lend_native_stack(&self, stack: StackSegment) {
        // Safety: called by the owning task-thread only.
        unsafe { *self.native_stack.get() = Some(stack) };
    }

    /// Takes the native stack back at deactivation, if the task still holds
    /// one.
    pub(crate) fn reclaim_native_stack(&self) -> Option<StackSegment> {
        // Safety: called by the owning task-thread only.
        unsafe { (*self.native_stack.get()).take() }
    }

    /// Frees the stacks of a reaped task.
    pub(crate) fn free_stacks(&self) {
        // Safety: the task is dead; its context will never be resumed.
        unsafe {
            *self.stack.get() = None;
            *self.native_stack.get() = None;
        }
    }

    /// Runs the task body. This is the first and only frame on a fresh task
    /// stack.
    fn run_entry(self: Arc<Self>) -> ! {
        let entry: TaskFn = self
            .inner
            .lock()
            .unwrap()
            .entry
            .take()
            .expect("task activated without an entry function");

        if logging::is_tracing(mask::TASK) {
            trace!("run_entry(): task_id={:?}, name={:?}", self.id, self.name);
        }

        let result: Result<(), _> = panic::catch_unwind(AssertUnwindSafe(entry));

        let killed: bool = self.inner.lock().unwrap().killed;
        match result {
            Ok(()) if !killed => {},
            Ok(()) => {
                debug!("run_entry(): task {} observed kill and unwound", self.id);
                self.propagate_failure();
            },
            Err(_) => {
                warn!("run_entry(): task {} ({:?}) failed", self.id, self.name);
                self.propagate_failure();
            },
        }

        self.die()
    }

    /// Propagates a task failure up the supervision chain: the supervisor is
    /// killed in turn, and a failure with no supervisor left reaches the
    /// kernel unless the task was unsupervised.
    fn propagate_failure(&self) {
        let (supervisor, propagate): (Option<TaskId>, bool) = {
            let inner = self.inner.lock().unwrap();
            (inner.supervisor, inner.propagate)
        };
        match supervisor {
            Some(supervisor_id) => match self.kernel.get_task_by_id(supervisor_id) {
                Some(parent) => {
                    warn!("propagate_failure(): task {} failed; killing supervisor {}", self.id, supervisor_id);
                    parent.kill();
                },
                None => {
                    debug!(
                        "propagate_failure(): task {} failed; supervisor {} already gone",
                        self.id, supervisor_id
                    );
                },
            },
            None if propagate => {
                error!("propagate_failure(): unsupervised task {} failed", self.id);
                self.kernel.fail();
            },
            None => {},
        }
    }

    /// Final transition of a task: releases owned ports, wakes joiners, moves
    /// to the dead list, and switches back to the scheduler forever. The
    /// owning task-thread reaps the corpse on its next loop turn.
    fn die(self: Arc<Self>) -> ! {
        let thread: Arc<TaskThread> = self.thread.clone();

        let joiners: Vec<TaskId> = {
            let mut inner = self.inner.lock().unwrap();
            for (port_id, _port) in inner.ports.drain() {
                self.kernel.release_port_id(port_id);
            }
            let joiners: Vec<TaskId> = mem::take(&mut inner.joiners);
            thread.transition(&self, TaskState::Running, TaskState::Dead);
            joiners
        };

        // Joiners that registered but did not block yet observe the dead
        // state on their own; skipping them here is fine.
        for joiner_id in joiners {
            if let Some(joiner) = self.kernel.get_task_by_id(joiner_id) {
                joiner.wakeup_if_blocked_on(WaitCause::Join(self.id));
            }
        }

        let ctx: *mut Context = self.ctx.get();
        let sched_ctx: *const Context = thread.native_ctx_ptr();

        // The dead list holds a reference until the reaper runs, so the
        // context stays valid across this final swap.
        drop(self);

        // Safety: the scheduler context was saved by the activation that is
        // parked in the owning task-thread on this OS thread.
        unsafe { swap_context(ctx, sched_ctx) };
        unreachable!("dead task was rescheduled");
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Landing point of a seeded task context.
unsafe extern "C" fn task_entry(arg: *mut c_void) -> ! {
    let task: Arc<Task> = Arc::from_raw(arg as *const Task);
    task.run_entry()
}
