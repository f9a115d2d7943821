//! End-to-end scheduler scenarios driven entirely through the public API.

use std::sync::atomic::Ordering;

use ream::block::Block;
use ream::bytecode::{Bytecode, ChunkBuilder, Op};
use ream::capability;
use ream::config::{BlockLimits, SchedulerConfig};
use ream::scheduler::Scheduler;
use ream::types::{BlockState, Pid};
use ream::value::Value;

fn run_to_quiescence(scheduler: &std::sync::Arc<Scheduler>, max_steps: usize) {
    for _ in 0..max_steps {
        let stats = scheduler.stats();
        if stats.total_spawned > 0 && stats.total_terminated >= stats.total_spawned {
            return;
        }
        scheduler.step();
    }
}

/// Pulls `pid` and `value` out of a delivered message map and sends `value`
/// back to `pid`. Shared by the echo and ping-pong scenarios below.
fn echo_chunk() -> ream::bytecode::Chunk {
    ChunkBuilder::new()
        .op(Op::Receive)
        .op(Op::Dup)
        .op(Op::GetField("pid".into()))
        .op(Op::Swap)
        .op(Op::GetField("value".into()))
        .op(Op::Send)
        .op(Op::Halt)
        .build()
}

#[test]
fn echo_round_trip() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let server_code = Bytecode::new(echo_chunk());
    let server = scheduler
        .spawn_ex(server_code, Some("server"), capability::RECEIVE | capability::SEND, BlockLimits::default(), None)
        .unwrap();

    let client_code = Bytecode::new(ChunkBuilder::new().op(Op::Receive).op(Op::Halt).build());
    let client = scheduler
        .spawn_ex(client_code, Some("client"), capability::SEND | capability::RECEIVE, BlockLimits::default(), None)
        .unwrap();

    scheduler.send(server, client, Value::Str("hello".into()));

    run_to_quiescence(&scheduler, 50);

    // The client's bytecode already popped the echo off its mailbox via
    // `Receive`; read it back off the VM's stack, where `Halt` left it.
    let client_block = scheduler.get_block(client).unwrap();
    let top = client_block.with_vm(|vm| vm.peek(0).cloned()).flatten().expect("client VM should have a value");
    assert_eq!(top.get("value").and_then(Value::as_str), Some("hello"));
    assert_eq!(top.get("pid").unwrap(), &Value::Pid(server));
}

#[test]
fn ping_pong_over_send_and_receive() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let pong_code = Bytecode::new(
        ChunkBuilder::new()
            .op(Op::Receive)
            .op(Op::Dup)
            .op(Op::GetField("pid".into()))
            .op(Op::PushInt(999))
            .op(Op::Send)
            .op(Op::Halt)
            .build(),
    );
    let pong = scheduler
        .spawn_ex(pong_code, Some("pong"), capability::ALL, BlockLimits::default(), None)
        .unwrap();

    let ping_code = Bytecode::new(ChunkBuilder::new().op(Op::Receive).op(Op::Halt).build());
    let ping = scheduler
        .spawn_ex(ping_code, Some("ping"), capability::ALL, BlockLimits::default(), None)
        .unwrap();

    scheduler.send(pong, ping, Value::Int(42));

    run_to_quiescence(&scheduler, 50);

    // Same as above: `ping`'s own `Receive` already drained its mailbox,
    // so inspect the value it left on the VM stack instead.
    let ping_block = scheduler.get_block(ping).unwrap();
    let top = ping_block.with_vm(|vm| vm.peek(0).cloned()).flatten().expect("ping VM should have a value");
    assert_eq!(top.get("value").and_then(Value::as_int), Some(999));
}

#[test]
fn fair_preemption_keeps_all_blocks_alive() {
    let mut config = SchedulerConfig::default();
    config.default_reductions = 10;
    let scheduler = Scheduler::new(config);
    let limits = BlockLimits { max_reductions: 10, ..BlockLimits::default() };

    let mut pids = Vec::new();
    for _ in 0..3 {
        let code = Bytecode::new(ChunkBuilder::new().op(Op::Yield).op(Op::Jump(0)).build());
        pids.push(scheduler.spawn_ex(code, None, capability::ALL, limits, None).unwrap());
    }

    for _ in 0..30 {
        scheduler.step();
    }

    for pid in pids {
        let block = scheduler.get_block(pid).unwrap();
        assert!(block.is_alive());
        assert!(block.counters().reductions.load(Ordering::Relaxed) > 0);
    }
}

#[test]
fn link_propagation_abnormal() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let code = || Bytecode::new(ChunkBuilder::new().op(Op::Receive).build());

    let a = scheduler.spawn_ex(code(), None, capability::ALL, BlockLimits::default(), None).unwrap();
    let b = scheduler.spawn_ex(code(), None, capability::ALL, BlockLimits::default(), None).unwrap();

    scheduler.get_block(a).unwrap().link(b);
    scheduler.get_block(b).unwrap().link(a);

    let block_a = scheduler.get_block(a).unwrap();
    block_a.crash("boom");
    ream::exit::propagate(&scheduler, a, &block_a);

    let block_b = scheduler.get_block(b).unwrap();
    assert!(!block_b.is_alive());
    assert!(block_b.exit_info().unwrap().reason.unwrap().contains("linked process"));

    // No subsequent step executes B: DEAD is absorbing.
    for _ in 0..5 {
        scheduler.step();
    }
    assert_eq!(block_b.state(), BlockState::Dead);
}

#[test]
fn monitor_without_link() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let a = scheduler
        .spawn_ex(Bytecode::new(ChunkBuilder::new().op(Op::Receive).build()), None, capability::ALL, BlockLimits::default(), None)
        .unwrap();
    let b = scheduler
        .spawn_ex(Bytecode::new(ChunkBuilder::new().op(Op::Halt).build()), None, capability::ALL, BlockLimits::default(), None)
        .unwrap();

    scheduler.get_block(a).unwrap().monitor(b);
    scheduler.get_block(b).unwrap().add_monitored_by(a);

    let block_b = scheduler.get_block(b).unwrap();
    block_b.exit(0);
    ream::exit::propagate(&scheduler, b, &block_b);

    let block_a = scheduler.get_block(a).unwrap();
    assert!(block_a.is_alive());
    let msg = block_a.receive().unwrap();
    assert_eq!(msg.value.get("pid").unwrap(), &Value::Pid(b));
    assert_eq!(msg.value.get("reason").unwrap().as_str(), Some("normal"));
}

#[test]
fn mpsc_stress_four_producers() {
    use std::thread;

    let block = std::sync::Arc::new(Block::new(Pid(1), None, None, BlockLimits::default()));
    let mut handles = Vec::new();
    for producer in 0..4u64 {
        let block = std::sync::Arc::clone(&block);
        handles.push(thread::spawn(move || {
            for i in 0..1000i64 {
                block.deliver(Pid(producer), Value::Int(i));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let mut last_seen = std::collections::HashMap::new();
    let mut total = 0;
    while let Some(msg) = block.receive() {
        let last: &mut i64 = last_seen.entry(msg.sender.raw()).or_insert(-1);
        let value = msg.value.as_int().unwrap();
        assert!(value > *last, "per-sender order must be ascending");
        *last = value;
        total += 1;
    }
    assert_eq!(total, 4000);
}

#[test]
fn work_stealing_correctness_burst_of_yielding_blocks() {
    let mut config = SchedulerConfig::default();
    config.num_workers = 8;
    let scheduler = Scheduler::new(config);
    let limits = BlockLimits { max_reductions: 5, ..BlockLimits::default() };

    let total = 2000; // scaled down from the full-scale burst size to keep this test fast
    let mut pids = Vec::with_capacity(total);
    for _ in 0..total {
        let code = Bytecode::new(ChunkBuilder::new().op(Op::PushInt(1)).op(Op::Halt).build());
        pids.push(scheduler.spawn_ex(code, None, capability::ALL, limits, None).unwrap());
    }

    scheduler.run();

    let stats = scheduler.stats();
    assert_eq!(stats.total_terminated, total as u64);
    for pid in pids {
        assert_eq!(scheduler.get_block(pid).unwrap().state(), BlockState::Dead);
    }

    let total_executed: u64 =
        scheduler.workers().iter().map(|w| w.stats().blocks_executed.load(Ordering::Relaxed)).sum();
    assert!(total_executed >= total as u64);
}
