// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! Ports and channels.
//!
//! A port is a typed FIFO mailbox owned by one task; only the owner
//! receives, any task may send. A channel is the (task id, port id)
//! capability foreign senders use to reach a port. The send path and the
//! receive path rendezvous directly when the owner is already blocked: the
//! sender writes through the receiver-published pointer before waking it, so
//! the hand-off needs no extra queue hop.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::MessageBuffer,
    kernel::Kernel,
    port::selector,
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
    task::{
        self,
        RendezvousSlot,
        Task,
        WaitCause,
    },
};
use ::std::{
    mem,
    slice,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
        Condvar,
        Mutex,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A typed FIFO mailbox owned by one task.
pub struct Port {
    /// Kernel-minted identifier.
    id: PortId,
    /// The owning task. Never changes.
    owner: TaskId,
    /// Size of one message (bytes).
    unit_sz: usize,
    /// Outstanding sender leases. Taken at channel resolution, released when
    /// the send completes; detach waits for this to drain.
    senders: AtomicUsize,
    /// Buffered messages (the port lock).
    buffer: Mutex<MessageBuffer>,
    /// Signaled when the last sender lease is released.
    drained: Condvar,
}

/// The (task id, port id) capability used by foreign senders.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct Channel {
    /// The task owning the target port.
    pub task: TaskId,
    /// The target port.
    pub port: PortId,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Port {
    /// Creates a port owned by the current task for messages of `unit_sz`
    /// bytes, and registers it with the owner and the kernel.
    pub fn create(unit_sz: usize) -> Result<Arc<Port>, Fail> {
        let task: Arc<Task> = task::current_task();
        let kernel: &Arc<Kernel> = task.kernel();
        let port_id: PortId = kernel.next_port_id();
        let port: Arc<Port> = Arc::new(Port {
            id: port_id,
            owner: task.id(),
            unit_sz,
            senders: AtomicUsize::new(0),
            buffer: Mutex::new(MessageBuffer::new(unit_sz)?),
            drained: Condvar::new(),
        });
        task.inner().lock().unwrap().ports.insert(port_id, port.clone());
        kernel.register_port(port.clone());
        if logging::is_tracing(mask::COMM) {
            trace!("create(): port_id={:?}, owner={:?}, unit_sz={}", port_id, port.owner, unit_sz);
        }
        Ok(port)
    }

    /// Returns the id of this port.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Returns the id of the owning task.
    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Returns the size of one message (bytes).
    pub fn unit_size(&self) -> usize {
        self.unit_sz
    }

    /// Returns the send capability for this port.
    pub fn channel(&self) -> Channel {
        Channel {
            task: self.owner,
            port: self.id,
        }
    }

    /// Returns the number of buffered messages.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Queries whether the port holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the port lock.
    pub(crate) fn buffer(&self) -> &Mutex<MessageBuffer> {
        &self.buffer
    }

    /// Receives one message into `dst`, blocking the current task when the
    /// port is empty. Only the owner may receive. Returns a cancellation
    /// failure when the task is killed before or during the wait.
    pub fn receive(&self, dst: &mut [u8]) -> Result<(), Fail> {
        let task: Arc<Task> = task::current_task();
        assert_eq!(task.id(), self.owner, "only the owning task receives on a port");
        assert_eq!(dst.len(), self.unit_sz, "destination does not match the port unit size");

        let must_yield: bool = {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.dequeue_into(dst) {
                false
            } else {
                // Blocking happens under the port lock, so a sender holding
                // it sees either "not blocked yet" or "blocked, slot armed".
                let mut inner = task.inner().lock().unwrap();
                if inner.killed {
                    return Err(Fail::new(FailKind::Cancelled, "task killed before receive"));
                }
                inner.rendezvous = RendezvousSlot::Data {
                    ptr: dst.as_mut_ptr(),
                    len: dst.len(),
                };
                task.block_with_inner(&mut inner, WaitCause::Port(self.id), "waiting for rendezvous data");
                true
            }
        };

        if !must_yield {
            return Ok(());
        }
        task.switch_to_scheduler();

        // Either a sender completed the rendezvous or a kill woke the task.
        let mut inner = task.inner().lock().unwrap();
        match mem::replace(&mut inner.rendezvous, RendezvousSlot::Empty) {
            RendezvousSlot::Empty => Ok(()),
            RendezvousSlot::Data { .. } => Err(Fail::new(FailKind::Cancelled, "task killed while receiving")),
            slot @ RendezvousSlot::ReadyPort { .. } => {
                panic!("receive woke with a select rendezvous armed ({:?})", slot)
            },
        }
    }

    /// Detaches the port: unregisters it from the owner so new sends fail,
    /// waits until no outstanding sender is mid-send, and releases the id.
    /// Only the owner may detach.
    pub fn detach(&self) {
        let task: Arc<Task> = task::current_task();
        assert_eq!(task.id(), self.owner, "only the owning task detaches a port");
        task.inner().lock().unwrap().ports.remove(&self.id);
        {
            let mut buffer = self.buffer.lock().unwrap();
            while self.senders.load(Ordering::Acquire) > 0 {
                buffer = self.drained.wait(buffer).unwrap();
            }
            drop(buffer);
        }
        task.kernel().release_port_id(self.id);
        if logging::is_tracing(mask::COMM) {
            trace!("detach(): port_id={:?}", self.id);
        }
    }

    /// Deletes the port: detaches it and reports messages that will never be
    /// delivered.
    pub fn delete(&self) {
        self.detach();
        let remaining: usize = self.len();
        if remaining > 0 {
            warn!("delete(): dropping {} undelivered messages (port_id={:?})", remaining, self.id);
        }
    }

    /// Releases one sender lease, waking a detach that waits for the port to
    /// drain.
    fn release_sender_lease(&self) {
        if self.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // The empty critical section orders this notify against the
            // detach predicate check.
            let _guard = self.buffer.lock().unwrap();
            self.drained.notify_all();
        }
    }
}

impl Channel {
    /// Sends one message through this channel, using the current task's
    /// kernel for resolution. Returns false when either id no longer
    /// resolves.
    pub fn send(&self, msg: &[u8]) -> bool {
        let task: Arc<Task> = task::current_task();
        chan_send(task.kernel(), *self, msg)
    }

    /// Serializes the capability, for hand-off through another port.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes: [u8; 16] = [0; 16];
        bytes[0..8].copy_from_slice(&u64::from(self.task).to_le_bytes());
        bytes[8..16].copy_from_slice(&u64::from(self.port).to_le_bytes());
        bytes
    }

    /// Deserializes a capability produced by [to_bytes](Self::to_bytes).
    pub fn from_bytes(bytes: [u8; 16]) -> Channel {
        let task: u64 = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let port: u64 = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Channel {
            task: TaskId::from(task),
            port: PortId::from(port),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Sends one message to `channel.port` on `channel.task`.
///
/// Resolution is by id: the task through the kernel map, the port through
/// the task's own port map, each as a call-scoped strong reference. Returns
/// false when either lookup misses. The task lock is released before the
/// port lock is taken.
pub(crate) fn chan_send(kernel: &Kernel, channel: Channel, msg: &[u8]) -> bool {
    let task: Arc<Task> = match kernel.get_task_by_id(channel.task) {
        Some(task) => task,
        None => {
            if logging::is_tracing(mask::COMM) {
                trace!("chan_send(): unknown task (task_id={:?})", channel.task);
            }
            return false;
        },
    };

    let port: Arc<Port> = {
        let inner = task.inner().lock().unwrap();
        match inner.ports.get(&channel.port) {
            Some(port) => {
                // The sender lease is taken while the port is still reachable,
                // so a concurrent detach waits for this send to finish.
                port.senders.fetch_add(1, Ordering::AcqRel);
                port.clone()
            },
            None => {
                if logging::is_tracing(mask::COMM) {
                    trace!("chan_send(): unknown port (port_id={:?})", channel.port);
                }
                return false;
            },
        }
    };

    if msg.len() != port.unit_sz {
        port.release_sender_lease();
        panic!("message does not match the port unit size");
    }

    let mut rendezvoused: bool = false;
    {
        let mut buffer = port.buffer.lock().unwrap();
        buffer.enqueue(msg);

        // The owner can only block on this port while holding this port's
        // lock, so the check below is stable. The woken receiver must get the
        // oldest message, hence the dequeue from the front.
        let mut inner = task.inner().lock().unwrap();
        if matches!(inner.blocked_on, Some((WaitCause::Port(port_id), _)) if port_id == channel.port) {
            match mem::replace(&mut inner.rendezvous, RendezvousSlot::Empty) {
                RendezvousSlot::Data { ptr, len } => {
                    assert_eq!(len, port.unit_sz, "rendezvous slot does not match the port unit size");
                    // Safety: the receiver is suspended with the slot armed;
                    // the port lock orders this write before the wakeup.
                    let dst: &mut [u8] = unsafe { slice::from_raw_parts_mut(ptr, len) };
                    let dequeued: bool = buffer.dequeue_into(dst);
                    assert!(dequeued, "rendezvous with an empty buffer");
                    task.wakeup_with_inner(&mut inner, WaitCause::Port(channel.port));
                    rendezvoused = true;
                },
                slot => panic!("receiver blocked on a port without a data rendezvous ({:?})", slot),
            }
        }
    }

    // A select wakeup must not run under the port lock: the selector scan
    // takes several port locks at once.
    if !rendezvoused {
        selector::msg_sent_on(&task, &port);
    }

    port.release_sender_lease();
    true
}
