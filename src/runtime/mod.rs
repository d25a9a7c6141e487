// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod fail;
pub mod ids;
pub mod logging;

pub use self::{
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
};
