// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Multi-port select.
//!
//! Select blocks a task until any one of several owned ports becomes
//! non-empty and reports which port is ready; the subsequent receive drains
//! the message. The selector rendezvous lock serializes senders racing to
//! resolve the same select: exactly one wins, the losers have already
//! buffered their messages normally.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    port::Port,
    runtime::{
        fail::{
            Fail,
            FailKind,
        },
        ids::PortId,
        logging::{
            self,
            mask,
        },
    },
    task::{
        self,
        RendezvousSlot,
        Task,
        WaitCause,
    },
};
use ::rand::{
    rngs::SmallRng,
    RngCore,
    SeedableRng,
};
use ::std::{
    mem,
    sync::{
        Arc,
        MutexGuard,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Seed for the selector random number generator in debug builds.
/// This value was chosen arbitrarily.
#[cfg(debug_assertions)]
const SELECTOR_SEED: u64 = 7;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-task select coordination state, live only while the owner is blocked
/// in select. The containing mutex is the selector rendezvous lock.
pub(crate) struct SelectorState {
    /// Snapshot of the ports being waited on; empty when no select is
    /// active.
    ports: Vec<PortId>,
    /// Small random number generator for the scan starting index.
    rng: SmallRng,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SelectorState {
    /// Creates an idle selector.
    pub(crate) fn new() -> Self {
        Self {
            ports: Vec::new(),
            #[cfg(debug_assertions)]
            rng: SmallRng::seed_from_u64(SELECTOR_SEED),
            #[cfg(not(debug_assertions))]
            rng: SmallRng::from_entropy(),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Blocks the current task until one of `ports` holds a message, and returns
/// the id of that port. All ports must be owned by the current task, and at
/// most one select may be active per task.
pub fn select(ports: &[Arc<Port>]) -> Result<PortId, Fail> {
    let task: Arc<Task> = task::current_task();
    assert!(!ports.is_empty(), "cannot select on zero ports");
    for port in ports {
        assert_eq!(port.owner(), task.id(), "only the owning task selects on a port");
    }

    // Start scanning from a different index each time.
    let scan_start: usize = {
        let mut sel = task.selector().lock().unwrap();
        sel.rng.next_u64() as usize % ports.len()
    };

    let mut ready: Option<PortId> = None;
    let mut must_yield: bool = false;
    {
        // Each scanned port stays locked until the outcome is decided: if
        // none has a message, the task must block before any of them can
        // accept another send.
        let mut guards: Vec<MutexGuard<'_, _>> = Vec::with_capacity(ports.len());
        let mut found: Option<PortId> = None;
        for i in 0..ports.len() {
            let k: usize = (i + scan_start) % ports.len();
            let guard = ports[k].buffer().lock().unwrap();
            let has_message: bool = !guard.is_empty();
            guards.push(guard);
            if has_message {
                found = Some(ports[k].id());
                break;
            }
        }

        match found {
            Some(port_id) => ready = Some(port_id),
            None => {
                let mut sel = task.selector().lock().unwrap();
                assert!(sel.ports.is_empty(), "at most one select may be active per task");
                sel.ports = ports.iter().map(|port| port.id()).collect();

                let mut inner = task.inner().lock().unwrap();
                if inner.killed {
                    sel.ports.clear();
                    return Err(Fail::new(FailKind::Cancelled, "task killed before select"));
                }
                inner.rendezvous = RendezvousSlot::ReadyPort { ptr: &mut ready };
                task.block_with_inner(&mut inner, WaitCause::Selector, "waiting for select rendezvous");
                must_yield = true;
            },
        }
        // Port locks release here, in acquisition order.
    }

    if !must_yield {
        return Ok(ready.expect("select scan found a port but recorded none"));
    }
    task.switch_to_scheduler();

    // Either a sender resolved the select or a kill woke the task.
    let slot: RendezvousSlot = {
        let mut inner = task.inner().lock().unwrap();
        mem::replace(&mut inner.rendezvous, RendezvousSlot::Empty)
    };
    match slot {
        RendezvousSlot::Empty => Ok(ready.expect("select resolved without a ready port")),
        RendezvousSlot::ReadyPort { .. } => {
            task.selector().lock().unwrap().ports.clear();
            Err(Fail::new(FailKind::Cancelled, "task killed while selecting"))
        },
        slot @ RendezvousSlot::Data { .. } => panic!("select woke with a receive rendezvous armed ({:?})", slot),
    }
}

/// Sender-side select resolution: if the port owner is blocked in a select
/// that lists `port`, records the port as the ready one and wakes the owner.
/// Callers must not hold any port lock.
pub(crate) fn msg_sent_on(task: &Arc<Task>, port: &Port) {
    // The selector rendezvous lock decides the race between competing
    // senders.
    let mut sel = task.selector().lock().unwrap();
    if !sel.ports.contains(&port.id()) {
        return;
    }

    let mut inner = task.inner().lock().unwrap();
    if !matches!(inner.blocked_on, Some((WaitCause::Selector, _))) {
        return;
    }

    sel.ports.clear();
    match mem::replace(&mut inner.rendezvous, RendezvousSlot::Empty) {
        RendezvousSlot::ReadyPort { ptr } => {
            // Safety: the owner is suspended with the slot armed; the
            // selector lock orders this write before the wakeup.
            unsafe { *ptr = Some(port.id()) };
        },
        slot => panic!("select rendezvous slot mismatch ({:?})", slot),
    }
    if logging::is_tracing(mask::COMM) {
        trace!("msg_sent_on(): resolved select (task_id={:?}, port_id={:?})", task.id(), port.id());
    }
    task.wakeup_with_inner(&mut inner, WaitCause::Selector);
}
