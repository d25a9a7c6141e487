// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

mod context;
mod stack;

#[allow(clippy::module_inception)]
mod task;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::task::{
    Task,
    TaskFn,
    TaskState,
};

pub(crate) use self::{
    context::{
        swap_context,
        Context,
    },
    stack::{
        StackSegment,
        NATIVE_STACK_SIZE,
    },
    task::{
        RendezvousSlot,
        TaskInner,
        WaitCause,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    runtime::{
        fail::{
            Fail,
            FailKind,
        },
        ids::{
            SchedId,
            TaskId,
        },
    },
    scheduler::current,
};
use ::std::sync::Arc;

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the currently running task.
///
/// Panics when called from outside a task: the runtime cannot continue if
/// task code has lost track of its own identity.
pub fn current_task() -> Arc<Task> {
    current::try_current_task().expect("not running inside a task")
}

/// Returns the id of the currently running task.
pub fn current_task_id() -> TaskId {
    current_task().id()
}

/// Returns the id of the scheduler that owns the currently running task.
pub fn current_sched_id() -> SchedId {
    current_task().thread().sched_id()
}

/// Yields the current task back to its scheduler.
///
/// Returns true when the task has been killed; the caller is expected to
/// unwind instead of continuing. Otherwise the task is suspended and the
/// call returns false once the scheduler resumes it.
pub fn yield_now() -> bool {
    let task: Arc<Task> = current_task();
    if task.is_killed() {
        return true;
    }
    task.switch_to_scheduler();
    false
}

/// Breaks the supervision link between the current task and its spawner, so
/// a later failure of the current task no longer propagates upward.
pub fn unsupervise() {
    current_task().clear_supervisor();
}

/// Records a process exit status. The status reported at process exit is the
/// maximum of all recorded values and zero.
pub fn set_exit_status(status: i32) {
    current_task().kernel().set_exit_status(status);
}

/// Creates a newborn task on the current task's scheduler, supervised by the
/// current task. The task does not run until [start_task] is called on it.
pub fn new_task(name: &str) -> Result<TaskId, Fail> {
    let task: Arc<Task> = current_task();
    task.kernel().new_task_in_sched(task.thread().sched_id(), Some(task.id()), name)
}

/// Creates a newborn task on the given scheduler, supervised by the current
/// task.
pub fn new_task_in_sched(sched_id: SchedId, name: &str) -> Result<TaskId, Fail> {
    let task: Arc<Task> = current_task();
    task.kernel().new_task_in_sched(sched_id, Some(task.id()), name)
}

/// Starts a newborn task with the given entry function.
pub fn start_task<F>(task_id: TaskId, f: F) -> Result<(), Fail>
where
    F: FnOnce() + Send + 'static,
{
    current_task().kernel().start_task(task_id, Box::new(f))
}

/// Creates and starts a task on the current task's scheduler, supervised by
/// the current task.
pub fn spawn<F>(name: &str, f: F) -> Result<TaskId, Fail>
where
    F: FnOnce() + Send + 'static,
{
    let task_id: TaskId = new_task(name)?;
    start_task(task_id, f)?;
    Ok(task_id)
}

/// Blocks the current task until the target task exits.
///
/// An unknown id means the target already exited and was released, which
/// counts as success. Returns a cancellation failure if the current task is
/// killed while waiting.
pub fn join_task(target: TaskId) -> Result<(), Fail> {
    let task: Arc<Task> = current_task();

    if target == task.id() {
        let cause: String = format!("task cannot join itself (task_id={:?})", target);
        error!("join_task(): {}", cause);
        return Err(Fail::new(FailKind::WouldDeadlock, &cause));
    }

    let target_task: Arc<Task> = match task.kernel().get_task_by_id(target) {
        Some(target_task) => target_task,
        None => return Ok(()),
    };

    {
        let mut target_inner = target_task.inner().lock().unwrap();
        if target_task.state() == TaskState::Dead {
            return Ok(());
        }
        target_inner.joiners.push(task.id());
    }

    {
        let mut inner = task.inner().lock().unwrap();
        if inner.killed {
            return Err(Fail::new(FailKind::Cancelled, "task killed while joining"));
        }
        // The target may have died between registration and here; its death
        // wake is skipped for joiners that are not blocked yet, so re-check
        // before committing to the wait.
        if target_task.state() == TaskState::Dead {
            return Ok(());
        }
        task.block_with_inner(&mut inner, WaitCause::Join(target), "waiting for task exit");
    }
    task.switch_to_scheduler();

    // The wake came from either the target's death or a kill, and the two
    // can race: a join that saw the target die succeeded no matter what an
    // unrelated kill set in the meantime. The dead state is the
    // discriminator; the kill flag only decides the not-yet-dead case.
    if target_task.state() == TaskState::Dead {
        return Ok(());
    }
    Err(Fail::new(FailKind::Cancelled, "task killed while joining"))
}
