// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

pub(crate) mod current;
mod group;
mod task_thread;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    group::Scheduler,
    task_thread::TaskThread,
};
