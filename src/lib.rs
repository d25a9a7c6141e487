// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Taskernel: a user-space cooperative task runtime.
//!
//! The runtime schedules many lightweight tasks (green threads) on top of a
//! small set of OS threads. Each OS thread owns a private set of tasks and
//! runs them with a cooperative loop; tasks never migrate. Tasks rendezvous
//! through ports (typed FIFO mailboxes) and channels (task id + port id
//! capabilities), including a multi-port select.

#![deny(clippy::all)]

mod collections;

pub mod kernel;

pub mod port;

pub mod runtime;

pub mod scheduler;

pub mod task;

#[macro_use]
extern crate log;

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(
                        "ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(
                        "ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`",
                        left_val,
                        right_val
                    );
                }
            },
        }
    }};
}

//======================================================================================================================
// Exports
//======================================================================================================================

pub use crate::{
    kernel::{
        boot,
        Kernel,
    },
    port::{
        select,
        Channel,
        Port,
    },
    runtime::{
        config::Config,
        fail::{
            Fail,
            FailKind,
        },
        ids::{
            PortId,
            SchedId,
            TaskId,
        },
    },
    task::{
        current_sched_id,
        current_task,
        current_task_id,
        join_task,
        new_task,
        new_task_in_sched,
        set_exit_status,
        spawn,
        start_task,
        unsupervise,
        yield_now,
        Task,
        TaskState,
    },
};
