// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Dense 64-bit identifiers minted monotonically by the kernel. Ids outlive
//! the objects they name: resolving an id through the kernel maps can fail.

//==============================================================================
// Imports
//==============================================================================

use ::std::fmt;

//==============================================================================
// Structures
//==============================================================================

/// Task Identifier
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Scheduler Identifier
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct SchedId(u64);

/// Port Identifier
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct PortId(u64);

//==============================================================================
// Trait Implementations
//==============================================================================

impl From<u64> for TaskId {
    /// Converts a [u64] to a [TaskId].
    fn from(val: u64) -> Self {
        TaskId(val)
    }
}

impl From<TaskId> for u64 {
    /// Converts a [TaskId] to a [u64].
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for SchedId {
    /// Converts a [u64] to a [SchedId].
    fn from(val: u64) -> Self {
        SchedId(val)
    }
}

impl From<SchedId> for u64 {
    /// Converts a [SchedId] to a [u64].
    fn from(val: SchedId) -> Self {
        val.0
    }
}

impl fmt::Display for SchedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for PortId {
    /// Converts a [u64] to a [PortId].
    fn from(val: u64) -> Self {
        PortId(val)
    }
}

impl From<PortId> for u64 {
    /// Converts a [PortId] to a [u64].
    fn from(val: PortId) -> Self {
        val.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
