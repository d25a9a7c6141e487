// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! The kernel: the process-wide registry and coordinator above schedulers.
//!
//! It mints ids, resolves them to objects for foreign callers, accumulates
//! the process exit status, and coordinates shutdown. Cross-thread
//! references are always by id: a lookup clones the `Arc` for the duration
//! of the call and the clone is dropped at return.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    port::{
        self,
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
        logging::{
            self,
            mask,
        },
    },
    scheduler::Scheduler,
    task::{
        Task,
        TaskFn,
    },
};
use ::std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicI32,
            AtomicU64,
            Ordering,
        },
        Arc,
        Condvar,
        Mutex,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Exit status recorded when a failure reaches the kernel.
const PROCESS_FAIL_CODE: i32 = 101;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Scheduler registry, paired with the exit condition variable.
struct SchedulerTable {
    /// Live schedulers by id.
    map: HashMap<SchedId, Arc<Scheduler>>,
    /// The scheduler whose last task drives process termination.
    root: Option<SchedId>,
}

/// The process-wide registry and coordinator.
pub struct Kernel {
    /// Knobs read once at initialization.
    config: Config,
    /// Monotonic id mints.
    next_task_id: AtomicU64,
    next_sched_id: AtomicU64,
    next_port_id: AtomicU64,
    /// Live tasks by id.
    tasks: Mutex<HashMap<TaskId, Arc<Task>>>,
    /// Live ports by id.
    ports: Mutex<HashMap<PortId, Arc<Port>>>,
    /// Live schedulers by id, plus the root scheduler.
    schedulers: Mutex<SchedulerTable>,
    /// Signaled whenever a scheduler releases its id.
    exit_cv: Condvar,
    /// Max-accumulated process exit status.
    exit_status: AtomicI32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Kernel {
    /// Creates a kernel with empty registries.
    pub fn new(config: Config) -> Arc<Kernel> {
        Arc::new(Kernel {
            config,
            next_task_id: AtomicU64::new(1),
            next_sched_id: AtomicU64::new(1),
            next_port_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
            ports: Mutex::new(HashMap::new()),
            schedulers: Mutex::new(SchedulerTable {
                map: HashMap::new(),
                root: None,
            }),
            exit_cv: Condvar::new(),
            exit_status: AtomicI32::new(0),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    //==================================================================================================================
    // Schedulers
    //==================================================================================================================

    /// Creates a scheduler with `num_threads` task-threads and launches it.
    pub fn create_scheduler(self: &Arc<Self>, num_threads: usize) -> SchedId {
        let sched_id: SchedId = SchedId::from(self.next_sched_id.fetch_add(1, Ordering::Relaxed));
        let sched: Arc<Scheduler> = Scheduler::new(self.clone(), sched_id, num_threads);
        {
            let mut table = self.schedulers.lock().unwrap();
            table.map.insert(sched_id, sched.clone());
        }
        if logging::is_tracing(mask::KERN) {
            trace!("create_scheduler(): sched_id={:?}, num_threads={}", sched_id, num_threads);
        }
        sched.start_threads();
        sched_id
    }

    /// Resolves a scheduler id, returning a call-scoped strong reference.
    pub fn get_scheduler_by_id(&self, sched_id: SchedId) -> Option<Arc<Scheduler>> {
        self.schedulers.lock().unwrap().map.get(&sched_id).cloned()
    }

    /// Marks the scheduler whose last task drives process termination.
    pub(crate) fn set_root_scheduler(&self, sched_id: SchedId) {
        self.schedulers.lock().unwrap().root = Some(sched_id);
    }

    /// Returns the number of task-threads of a scheduler.
    pub fn sched_threads(&self, sched_id: SchedId) -> Option<usize> {
        self.get_scheduler_by_id(sched_id).map(|sched| sched.num_threads())
    }

    /// Drops a scheduler id after its last task-thread released. When the
    /// root scheduler leaves, the remaining schedulers are ordered to exit.
    pub(crate) fn release_scheduler_id(&self, sched_id: SchedId) {
        let survivors: Vec<Arc<Scheduler>> = {
            let mut table = self.schedulers.lock().unwrap();
            table.map.remove(&sched_id);
            if table.root == Some(sched_id) {
                table.map.values().cloned().collect()
            } else {
                Vec::new()
            }
        };
        if logging::is_tracing(mask::KERN) {
            trace!("release_scheduler_id(): sched_id={:?}", sched_id);
        }
        self.exit_cv.notify_all();
        for sched in survivors {
            sched.exit();
        }
    }

    /// Blocks until every scheduler has released, then reports the
    /// accumulated exit status.
    pub fn wait_for_exit(&self) -> i32 {
        let mut table = self.schedulers.lock().unwrap();
        while !table.map.is_empty() {
            table = self.exit_cv.wait(table).unwrap();
        }
        self.exit_status()
    }

    //==================================================================================================================
    // Tasks
    //==================================================================================================================

    /// Mints a task id.
    pub(crate) fn next_task_id(&self) -> TaskId {
        TaskId::from(self.next_task_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a newborn task under its id.
    pub(crate) fn register_task(&self, task: Arc<Task>) {
        let previous: Option<Arc<Task>> = self.tasks.lock().unwrap().insert(task.id(), task);
        assert!(previous.is_none(), "task id registered twice");
    }

    /// Resolves a task id, returning a call-scoped strong reference.
    pub fn get_task_by_id(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.tasks.lock().unwrap().get(&task_id).cloned()
    }

    /// Drops a task id during reaping. Later lookups miss.
    pub(crate) fn release_task_id(&self, task_id: TaskId) {
        self.tasks.lock().unwrap().remove(&task_id);
    }

    /// Creates a newborn task on the given scheduler.
    pub fn new_task_in_sched(&self, sched_id: SchedId, supervisor: Option<TaskId>, name: &str) -> Result<TaskId, Fail> {
        let sched: Arc<Scheduler> = match self.get_scheduler_by_id(sched_id) {
            Some(sched) => sched,
            None => {
                let cause: String = format!("unknown scheduler (sched_id={:?})", sched_id);
                error!("new_task_in_sched(): {}", cause);
                return Err(Fail::new(FailKind::NotFound, &cause));
            },
        };
        Ok(sched.create_task(supervisor, name).id())
    }

    /// Starts a newborn task with the given entry function.
    pub fn start_task(&self, task_id: TaskId, entry: TaskFn) -> Result<(), Fail> {
        let task: Arc<Task> = match self.get_task_by_id(task_id) {
            Some(task) => task,
            None => {
                let cause: String = format!("unknown task (task_id={:?})", task_id);
                error!("start_task(): {}", cause);
                return Err(Fail::new(FailKind::NotFound, &cause));
            },
        };
        task.start(entry)
    }

    //==================================================================================================================
    // Ports
    //==================================================================================================================

    /// Mints a port id.
    pub(crate) fn next_port_id(&self) -> PortId {
        PortId::from(self.next_port_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a port under its id.
    pub(crate) fn register_port(&self, port: Arc<Port>) {
        let previous: Option<Arc<Port>> = self.ports.lock().unwrap().insert(port.id(), port);
        assert!(previous.is_none(), "port id registered twice");
    }

    /// Resolves a port id, returning a call-scoped strong reference.
    pub fn get_port_by_id(&self, port_id: PortId) -> Option<Arc<Port>> {
        self.ports.lock().unwrap().get(&port_id).cloned()
    }

    /// Drops a port id after detach or owner death.
    pub(crate) fn release_port_id(&self, port_id: PortId) {
        self.ports.lock().unwrap().remove(&port_id);
    }

    /// Sends one message through a channel capability. Returns false when
    /// either id no longer resolves.
    pub fn chan_send(&self, channel: Channel, msg: &[u8]) -> bool {
        port::chan_send(self, channel, msg)
    }

    //==================================================================================================================
    // Exit coordination
    //==================================================================================================================

    /// Records a process exit status; the reported status is the maximum of
    /// zero and all recorded values.
    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.fetch_max(status, Ordering::Relaxed);
    }

    /// Returns the accumulated exit status.
    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Relaxed).max(0)
    }

    /// Records a kernel-level failure and starts an emergency shutdown of
    /// the root scheduler.
    pub(crate) fn fail(&self) {
        error!("fail(): a failure reached the kernel; shutting down");
        self.set_exit_status(PROCESS_FAIL_CODE);
        let root: Option<Arc<Scheduler>> = {
            let table = self.schedulers.lock().unwrap();
            table.root.and_then(|root_id| table.map.get(&root_id).cloned())
        };
        if let Some(sched) = root {
            sched.kill_all_tasks();
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Boots a runtime: creates the kernel and the root scheduler, runs `main`
/// as the root task, and waits until every scheduler drains. Returns the
/// process exit status.
pub fn boot<F>(config: Config, main: F) -> i32
where
    F: FnOnce() + Send + 'static,
{
    logging::initialize(config.log_on, config.log_mask);

    let kernel: Arc<Kernel> = Kernel::new(config);
    let num_threads: usize = kernel.config().sched_threads;
    let root: SchedId = kernel.create_scheduler(num_threads);
    kernel.set_root_scheduler(root);

    let main_id: TaskId = kernel
        .new_task_in_sched(root, None, "main")
        .expect("cannot create the root task");
    kernel
        .start_task(main_id, Box::new(main))
        .expect("cannot start the root task");

    kernel.wait_for_exit()
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Kernel;
    use crate::runtime::{
        config::Config,
        ids::TaskId,
    };
    use ::anyhow::Result;
    use ::std::sync::Arc;

    #[test]
    fn task_ids_are_minted_monotonically() -> Result<()> {
        let kernel: Arc<Kernel> = Kernel::new(Config::default());
        let first: TaskId = kernel.next_task_id();
        let second: TaskId = kernel.next_task_id();
        crate::ensure_eq!(u64::from(second), u64::from(first) + 1);
        Ok(())
    }

    #[test]
    fn unknown_ids_do_not_resolve() -> Result<()> {
        let kernel: Arc<Kernel> = Kernel::new(Config::default());
        crate::ensure_eq!(kernel.get_task_by_id(TaskId::from(9999)).is_none(), true);
        crate::ensure_eq!(kernel.get_scheduler_by_id(9999.into()).is_none(), true);
        crate::ensure_eq!(kernel.get_port_by_id(9999.into()).is_none(), true);
        Ok(())
    }

    #[test]
    fn exit_status_accumulates_the_maximum() -> Result<()> {
        let kernel: Arc<Kernel> = Kernel::new(Config::default());
        crate::ensure_eq!(kernel.exit_status(), 0);
        kernel.set_exit_status(3);
        kernel.set_exit_status(1);
        crate::ensure_eq!(kernel.exit_status(), 3);
        kernel.set_exit_status(-7);
        crate::ensure_eq!(kernel.exit_status(), 3);
        Ok(())
    }
}
