// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

#[allow(clippy::module_inception)]
mod port;

pub(crate) mod selector;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    port::{
        Channel,
        Port,
    },
    selector::select,
};

pub(crate) use self::port::chan_send;
