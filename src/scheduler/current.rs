// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Thread-local slot for the currently running task. Set at activation and
//! cleared at deactivation by the owning task-thread; never read from a
//! foreign thread.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::task::Task;
use ::std::{
    cell::RefCell,
    sync::Arc,
};

//======================================================================================================================
// Static Variables
//======================================================================================================================

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Places a task in the thread-local slot for the duration of an activation.
pub(crate) fn set_current_task(task: Arc<Task>) {
    CURRENT_TASK.with(|slot| {
        let previous: Option<Arc<Task>> = slot.borrow_mut().replace(task);
        assert!(previous.is_none(), "task-thread activated a task while another was current");
    });
}

/// Clears the thread-local slot at deactivation.
pub(crate) fn clear_current_task() {
    CURRENT_TASK.with(|slot| {
        slot.borrow_mut().take().expect("task-thread deactivated with no current task");
    });
}

/// Returns the currently running task, if this thread is inside one.
pub(crate) fn try_current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|slot| slot.borrow().clone())
}
