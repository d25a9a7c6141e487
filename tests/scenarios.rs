// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//! End-to-end scenarios, each driving a full runtime boot.

use ::anyhow::Result;
use ::rand::{
    rngs::SmallRng,
    Rng,
    RngCore,
    SeedableRng,
};
use ::std::sync::{
    Arc,
    Mutex,
};
use ::taskernel::{
    boot,
    current_task,
    ensure_eq,
    join_task,
    new_task_in_sched,
    select,
    set_exit_status,
    spawn,
    start_task,
    unsupervise,
    yield_now,
    Channel,
    Config,
    Port,
    PortId,
    TaskState,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

/// A small configuration so tests boot quickly.
fn test_config() -> Config {
    Config {
        min_stack_size: 256 * 1024,
        sched_threads: 2,
        ..Config::default()
    }
}

/// Shared output vector for assertions made after boot returns.
fn outbox<T>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let outbox: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
    (outbox.clone(), outbox)
}

//======================================================================================================================
// Scenarios
//======================================================================================================================

/// A spawns B; channel capabilities travel through ports in both directions;
/// B answers 42.
#[test]
fn ping_answer_flows_back_through_ports() -> Result<()> {
    let (results, results_in) = outbox::<u64>();

    let status: i32 = boot(test_config(), move || {
        // Reply mailbox and bootstrap mailbox, both owned by the root task.
        let reply_port: Arc<Port> = Port::create(8).unwrap();
        let bootstrap_port: Arc<Port> = Port::create(16).unwrap();
        let bootstrap: Channel = bootstrap_port.channel();

        spawn("ping", move || {
            // Announce our inbox through the bootstrap channel, then wait for
            // the reply capability to arrive through it.
            let inbox: Arc<Port> = Port::create(16).unwrap();
            assert!(bootstrap.send(&inbox.channel().to_bytes()));

            let mut msg: [u8; 16] = [0; 16];
            inbox.receive(&mut msg).unwrap();
            let reply: Channel = Channel::from_bytes(msg);
            assert!(reply.send(&42u64.to_le_bytes()));
        })
        .unwrap();

        // Learn B's inbox, hand it our reply capability, await the answer.
        let mut msg: [u8; 16] = [0; 16];
        bootstrap_port.receive(&mut msg).unwrap();
        let ping_inbox: Channel = Channel::from_bytes(msg);
        assert!(ping_inbox.send(&reply_port.channel().to_bytes()));

        let mut answer: [u8; 8] = [0; 8];
        reply_port.receive(&mut answer).unwrap();
        results_in.lock().unwrap().push(u64::from_le_bytes(answer));
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![42u64]);
    Ok(())
}

/// Select resolves to the only port with traffic, and the message is still
/// buffered for the subsequent receive.
#[test]
fn select_returns_the_ready_port() -> Result<()> {
    let (results, results_in) = outbox::<u64>();

    let status: i32 = boot(test_config(), move || {
        let p1: Arc<Port> = Port::create(8).unwrap();
        let p2: Arc<Port> = Port::create(8).unwrap();
        let to_p2: Channel = p2.channel();

        spawn("sender", move || {
            assert!(to_p2.send(&7u64.to_le_bytes()));
        })
        .unwrap();

        let ready: PortId = select(&[p1.clone(), p2.clone()]).unwrap();
        assert_eq!(ready, p2.id());
        assert!(!p2.is_empty());

        let mut msg: [u8; 8] = [0; 8];
        p2.receive(&mut msg).unwrap();
        results_in.lock().unwrap().push(u64::from_le_bytes(msg));
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![7u64]);
    Ok(())
}

/// A kill delivered to a task blocked in receive cancels the receive; the
/// runtime drains cleanly afterwards.
#[test]
fn kill_cancels_a_blocked_receive() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let worker = spawn("worker", move || {
            // Break the supervision link: this death is deliberate.
            unsupervise();
            let port: Arc<Port> = Port::create(8).unwrap();
            let mut msg: [u8; 8] = [0; 8];
            let cancelled: bool = match port.receive(&mut msg) {
                Err(fail) => fail.is_cancelled(),
                Ok(()) => false,
            };
            results_in.lock().unwrap().push(cancelled);
        })
        .unwrap();

        // Wait until the worker parks in its receive, then kill it.
        let kernel = current_task().kernel().clone();
        loop {
            match kernel.get_task_by_id(worker) {
                Some(task) if task.state() == TaskState::Blocked => {
                    task.kill();
                    break;
                },
                Some(_) => {
                    yield_now();
                },
                None => break,
            }
        }
        let _ = join_task(worker);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}

/// Four senders fan into one port; each sender's messages arrive in order.
#[test]
fn many_to_one_preserves_per_sender_fifo() -> Result<()> {
    const SENDERS: u64 = 4;
    const MESSAGES: u64 = 100;
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let inbox: Arc<Port> = Port::create(16).unwrap();

        for sender in 0..SENDERS {
            let channel: Channel = inbox.channel();
            spawn(&format!("sender-{}", sender), move || {
                for seq in 0..MESSAGES {
                    let mut msg: [u8; 16] = [0; 16];
                    msg[0..8].copy_from_slice(&sender.to_le_bytes());
                    msg[8..16].copy_from_slice(&seq.to_le_bytes());
                    assert!(channel.send(&msg));
                }
            })
            .unwrap();
        }

        let mut next_seq: [u64; SENDERS as usize] = [0; SENDERS as usize];
        let mut in_order: bool = true;
        for _ in 0..SENDERS * MESSAGES {
            let mut msg: [u8; 16] = [0; 16];
            inbox.receive(&mut msg).unwrap();
            let sender: u64 = u64::from_le_bytes(msg[0..8].try_into().unwrap());
            let seq: u64 = u64::from_le_bytes(msg[8..16].try_into().unwrap());
            in_order &= seq == next_seq[sender as usize];
            next_seq[sender as usize] = seq + 1;
        }
        in_order &= next_seq == [MESSAGES; SENDERS as usize];
        results_in.lock().unwrap().push(in_order);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}

/// Round-robin placement: six tasks over three task-threads land two per
/// thread.
#[test]
fn round_robin_places_tasks_evenly() -> Result<()> {
    const THREADS: usize = 3;
    const TASKS: usize = 6;
    let (results, results_in) = outbox::<Vec<usize>>();

    let status: i32 = boot(test_config(), move || {
        let kernel = current_task().kernel().clone();
        let sched_id = kernel.create_scheduler(THREADS);
        assert_eq!(kernel.sched_threads(sched_id), Some(THREADS));

        let mut task_ids = Vec::with_capacity(TASKS);
        for i in 0..TASKS {
            task_ids.push(new_task_in_sched(sched_id, &format!("filler-{}", i)).unwrap());
        }

        let newborn_counts: Vec<usize> = kernel
            .get_scheduler_by_id(sched_id)
            .unwrap()
            .task_counts_per_thread()
            .iter()
            .map(|(newborn, _, _, _)| *newborn)
            .collect();
        results_in.lock().unwrap().push(newborn_counts);

        for task_id in task_ids {
            start_task(task_id, || {}).unwrap();
        }
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![vec![2usize; THREADS]]);
    Ok(())
}

/// A supervised child failure tears down the whole chain and the process
/// reports a failure status.
#[test]
fn supervised_failure_propagates_to_a_nonzero_exit() -> Result<()> {
    let status: i32 = boot(test_config(), move || {
        let parent = spawn("parent", || {
            let child = spawn("child", || {
                panic!("deliberate child failure");
            })
            .unwrap();
            // The child's failure kills this task; the join either cancels
            // or observes the exit, depending on which lands first.
            let _ = join_task(child);
        })
        .unwrap();
        let _ = join_task(parent);
    });

    ensure_eq!(status == 0, false);
    Ok(())
}

//======================================================================================================================
// Properties
//======================================================================================================================

/// A task sending k messages to itself receives the same k messages in send
/// order, across random message counts and payloads.
#[test]
fn self_round_trip_preserves_order() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let mut rng: SmallRng = SmallRng::seed_from_u64(0x5eed);
        let mut intact: bool = true;

        for _ in 0..20 {
            let port: Arc<Port> = Port::create(8).unwrap();
            let channel: Channel = port.channel();
            let count: usize = rng.gen_range(1..64);

            let sent: Vec<u64> = (0..count).map(|_| rng.next_u64()).collect();
            for value in &sent {
                assert!(channel.send(&value.to_le_bytes()));
            }
            for value in &sent {
                let mut msg: [u8; 8] = [0; 8];
                port.receive(&mut msg).unwrap();
                intact &= u64::from_le_bytes(msg) == *value;
            }
            intact &= port.is_empty();
            port.detach();
        }
        results_in.lock().unwrap().push(intact);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}

/// A kill is observed at the next yield point of a busy task.
#[test]
fn kill_is_observed_at_a_yield_point() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let worker = spawn("spinner", move || {
            unsupervise();
            loop {
                if yield_now() {
                    results_in.lock().unwrap().push(true);
                    return;
                }
            }
        })
        .unwrap();

        let kernel = current_task().kernel().clone();
        if let Some(task) = kernel.get_task_by_id(worker) {
            task.kill();
        }
        let _ = join_task(worker);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}

/// Sends to a detached port fail; undelivered messages are dropped with the
/// port.
#[test]
fn detached_ports_reject_senders() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let port: Arc<Port> = Port::create(8).unwrap();
        let channel: Channel = port.channel();
        assert!(channel.send(&1u64.to_le_bytes()));
        port.delete();
        results_in.lock().unwrap().push(channel.send(&2u64.to_le_bytes()));
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![false]);
    Ok(())
}

/// Joining an exited task succeeds immediately; joining yourself is refused.
#[test]
fn join_handles_exits_and_self_joins() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let quick = spawn("quick", || {}).unwrap();
        let joined: bool = join_task(quick).is_ok();
        let rejoined: bool = join_task(quick).is_ok();
        let self_join_refused: bool = join_task(taskernel::current_task_id()).is_err();
        results_in.lock().unwrap().push(joined && rejoined && self_join_refused);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}

/// An explicit exit status survives to the boot return value, accumulated as
/// a maximum.
#[test]
fn explicit_exit_status_is_reported() -> Result<()> {
    let status: i32 = boot(test_config(), move || {
        set_exit_status(3);
        set_exit_status(1);
    });
    ensure_eq!(status, 3);
    Ok(())
}

/// Select wakes a parked task when traffic arrives on any waited port, over
/// randomized port sets.
#[test]
fn select_wakes_on_random_ports() -> Result<()> {
    let (results, results_in) = outbox::<bool>();

    let status: i32 = boot(test_config(), move || {
        let mut rng: SmallRng = SmallRng::seed_from_u64(0xd1ce);
        let mut resolved: bool = true;

        for _ in 0..10 {
            let nports: usize = rng.gen_range(2..6);
            let ports: Vec<Arc<Port>> = (0..nports).map(|_| Port::create(8).unwrap()).collect();
            let lucky: usize = rng.gen_range(0..nports);
            let channel: Channel = ports[lucky].channel();

            spawn("poker", move || {
                assert!(channel.send(&9u64.to_le_bytes()));
            })
            .unwrap();

            let ready: PortId = select(&ports).unwrap();
            resolved &= ready == ports[lucky].id();

            let mut msg: [u8; 8] = [0; 8];
            ports[lucky].receive(&mut msg).unwrap();
            resolved &= u64::from_le_bytes(msg) == 9;
            for port in &ports {
                port.detach();
            }
        }
        results_in.lock().unwrap().push(resolved);
    });

    ensure_eq!(status, 0);
    ensure_eq!(*results.lock().unwrap(), vec![true]);
    Ok(())
}
