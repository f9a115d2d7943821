//! Scheduler: identifier allocation, spawn, wake, kill, stats (§4.4)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace};

use crate::block::Block;
use crate::bytecode::Bytecode;
use crate::capability;
use crate::config::{BlockLimits, SchedulerConfig};
use crate::error::ReamError;
use crate::exit;
use crate::registry::Registry;
use crate::types::{BlockState, Pid, PidAllocator, SendResult, SpawnOutcome, VmOutcome};
use crate::value::Value;
use crate::vm::VmHost;
use crate::worker::Worker;

/// Aggregate scheduler statistics (§6 `scheduler_stats`). Taught by the
/// teacher's `RuntimeStats`/`WorkStealingStats`, narrowed to what this core
/// actually tracks.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub total_spawned: AtomicU64,
    pub total_terminated: AtomicU64,
    pub context_switches: AtomicU64,
    pub total_reductions: AtomicU64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            total_spawned: self.total_spawned.load(Ordering::Relaxed),
            total_terminated: self.total_terminated.load(Ordering::Relaxed),
            context_switches: self.context_switches.load(Ordering::Relaxed),
            total_reductions: self.total_reductions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatsSnapshot {
    pub total_spawned: u64,
    pub total_terminated: u64,
    pub context_switches: u64,
    pub total_reductions: u64,
}

/// Read-only introspection snapshot of one block (§F Supplemented features).
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub pid: Pid,
    pub name: Option<String>,
    pub state: BlockState,
    pub reductions: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Global intrusive run queue used in single-threaded mode (§3 Run queue).
/// A plain `VecDeque` gives the same FIFO pop-from-head/push-at-tail
/// behaviour the intrusive list specifies; the core does not expose
/// O(1) middle-removal because nothing in this scheduler's single-threaded
/// path needs it.
struct GlobalQueue {
    queue: Mutex<VecDeque<Pid>>,
}

impl GlobalQueue {
    fn new() -> Self {
        GlobalQueue { queue: Mutex::new(VecDeque::new()) }
    }

    fn push(&self, pid: Pid) {
        self.queue.lock().unwrap().push_back(pid);
    }

    fn pop(&self) -> Option<Pid> {
        self.queue.lock().unwrap().pop_front()
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Registry,
    pids: PidAllocator,
    global_queue: GlobalQueue,
    workers: Vec<Arc<Worker>>,
    next_worker: AtomicUsize,
    running: AtomicBool,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Scheduler> {
        Arc::new_cyclic(|weak| {
            let workers = if config.is_single_threaded() {
                Vec::new()
            } else {
                (0..config.num_workers).map(|id| Arc::new(Worker::new(id, weak.clone()))).collect()
            };
            Scheduler {
                config,
                registry: Registry::new(config.max_blocks),
                pids: PidAllocator::new(),
                global_queue: GlobalQueue::new(),
                workers,
                next_worker: AtomicUsize::new(0),
                running: AtomicBool::new(true),
                stats: SchedulerStats::default(),
            }
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// `scheduler_spawn` with default capabilities (`ALL`) and block limits.
    pub fn spawn(self: &Arc<Self>, code: Bytecode, name: Option<&str>) -> Option<Pid> {
        self.spawn_ex(code, name, capability::ALL, BlockLimits::default(), None)
    }

    /// `scheduler_spawn_ex` (§4.4 Spawn).
    pub fn spawn_ex(
        self: &Arc<Self>,
        code: Bytecode,
        name: Option<&str>,
        caps: u32,
        limits: BlockLimits,
        parent: Option<Pid>,
    ) -> Option<Pid> {
        let pid = self.pids.allocate();
        let block = Arc::new(Block::new(pid, name.map(String::from), parent, limits));
        block.grant(caps);

        if !block.load(code, limits.max_reductions) {
            return None;
        }

        if self.registry.insert(Arc::clone(&block)).is_err() {
            debug!(%pid, "spawn rejected: registry at capacity");
            return None;
        }

        if let Some(name) = name {
            let _ = self.registry.register_name(name.to_string(), pid);
        }

        self.enqueue(pid);
        self.stats.total_spawned.fetch_add(1, Ordering::Relaxed);
        trace!(%pid, ?name, "block spawned");
        Some(pid)
    }

    fn enqueue(self: &Arc<Self>, pid: Pid) {
        if self.config.is_single_threaded() {
            self.global_queue.push(pid);
        } else {
            let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len().max(1);
            self.workers[idx].deque().push(self.registry.get(pid).expect("just inserted"));
        }
    }

    pub fn get_block(&self, pid: Pid) -> Option<Arc<Block>> {
        self.registry.get(pid)
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Block>> {
        self.registry.get_by_name(name).and_then(|pid| self.registry.get(pid))
    }

    pub fn info(&self, pid: Pid) -> Option<BlockInfo> {
        let block = self.registry.get(pid)?;
        Some(BlockInfo {
            pid,
            name: block.name(),
            state: block.state(),
            reductions: block.counters().reductions.load(Ordering::Relaxed),
            messages_sent: block.counters().messages_sent.load(Ordering::Relaxed),
            messages_received: block.counters().messages_received.load(Ordering::Relaxed),
        })
    }

    /// Attempts `WAITING -> RUNNABLE` and enqueues on success (§4.4 Wake).
    pub fn wake_block(self: &Arc<Self>, pid: Pid) {
        if let Some(block) = self.registry.get(pid) {
            if block.try_transition(BlockState::Waiting, BlockState::Runnable) {
                self.enqueue(pid);
            }
        }
    }

    /// Send from any thread: deep-copies into the target and wakes it if
    /// waiting (§2 Data and control flow, §4.3 Send API).
    pub fn send(self: &Arc<Self>, target: Pid, sender: Pid, value: Value) -> SendResult {
        let Some(block) = self.registry.get(target) else {
            return SendResult::Error;
        };
        if !block.is_alive() {
            return SendResult::Error;
        }
        let wrapped = crate::value::normal_message(sender, value);
        let result = block.deliver(sender, wrapped);
        if result == SendResult::Ok {
            self.wake_block(target);
        }
        result
    }

    /// Single-threaded `scheduler_step` (§4.4 Step).
    pub fn step(self: &Arc<Self>) -> bool {
        let Some(pid) = self.global_queue.pop() else {
            return self.has_waiting_block_with_messages();
        };
        let Some(block) = self.registry.get(pid) else {
            return true;
        };
        if !block.try_transition(BlockState::Runnable, BlockState::Running) {
            return true;
        }

        self.stats.context_switches.fetch_add(1, Ordering::Relaxed);
        let outcome = self.run_time_slice(&block, pid);
        self.dispatch(pid, &block, outcome);
        true
    }

    fn has_waiting_block_with_messages(&self) -> bool {
        false
    }

    fn run_time_slice(self: &Arc<Self>, block: &Arc<Block>, pid: Pid) -> VmOutcome {
        let host = SchedulerHost { scheduler: self, pid };
        let outcome = block.with_vm(|vm| vm.run(&host)).unwrap_or(VmOutcome::Error);
        let reductions = block.with_vm(|vm| vm.reductions_this_slice()).unwrap_or(0);
        block.counters().reductions.fetch_add(reductions, Ordering::Relaxed);
        self.stats.total_reductions.fetch_add(reductions, Ordering::Relaxed);
        outcome
    }

    /// Dispatches a VM outcome for a block that was `RUNNING` (§4.4 Step,
    /// §4.7 worker loop dispatch).
    pub fn dispatch(self: &Arc<Self>, pid: Pid, block: &Arc<Block>, outcome: VmOutcome) {
        match outcome {
            VmOutcome::Yield => {
                let _ = block.try_transition(BlockState::Running, BlockState::Runnable);
                self.enqueue(pid);
            }
            VmOutcome::Waiting => {
                let _ = block.try_transition(BlockState::Running, BlockState::Waiting);
                // A racing send may have already delivered a message and
                // observed `Running`, in which case it could not wake us;
                // re-check after the transition to avoid a lost wakeup.
                if block.has_messages() {
                    self.wake_block(pid);
                }
            }
            VmOutcome::Ok | VmOutcome::Halted => {
                block.exit(0);
                self.finish_termination(pid, block);
            }
            VmOutcome::Error => {
                let bytecode_err = block.with_vm(|vm| vm.typed_error().cloned()).flatten();
                let reason = bytecode_err
                    .map(|e| ReamError::from(e).to_string())
                    .unwrap_or_else(|| "vm error".to_string());
                block.crash(reason);
                self.finish_termination(pid, block);
            }
        }
    }

    fn finish_termination(self: &Arc<Self>, pid: Pid, block: &Arc<Block>) {
        self.stats.total_terminated.fetch_add(1, Ordering::Relaxed);
        exit::propagate(self, pid, block);
    }

    /// `scheduler_kill` (§4.4 Kill).
    ///
    /// Does not eagerly remove `pid` from the global queue or a worker's
    /// deque: a stale entry left behind by a kill is harmless because
    /// `step`/`run_loop` only ever act on a popped pid after winning a
    /// `Runnable -> Running` CAS, and `block.crash` below has already taken
    /// the block past `Runnable` to `Dead`. The CAS fails, the pid is
    /// dropped on the floor, nothing runs twice or runs dead code. Same
    /// compromise as [`GlobalQueue`]: no O(1) middle-removal, because
    /// nothing on the hot path needs one.
    pub fn kill(self: &Arc<Self>, pid: Pid) {
        let Some(block) = self.registry.get(pid) else { return };
        if !block.is_alive() {
            return;
        }
        block.crash("killed");
        self.finish_termination(pid, &block);
    }

    /// Single-threaded `scheduler_run` (§4.4 Run). Loops `step` until no
    /// work remains and the scheduler is still `running`, or until
    /// `total_terminated >= total_spawned` (§8 Termination quiescence).
    pub fn run(self: &Arc<Self>) {
        if !self.config.is_single_threaded() {
            for worker in &self.workers {
                worker.start();
            }
            for worker in &self.workers {
                worker.join();
            }
            info!("scheduler run complete (multi-threaded)");
            return;
        }

        loop {
            if !self.is_running() {
                break;
            }
            let snapshot = self.stats.snapshot();
            if snapshot.total_spawned > 0 && snapshot.total_terminated >= snapshot.total_spawned {
                break;
            }
            if !self.step() {
                break;
            }
        }
        info!("scheduler run complete (single-threaded)");
    }
}

/// Bridges the VM's host trait to this scheduler for whichever block is
/// currently executing.
pub struct SchedulerHost<'a> {
    scheduler: &'a Arc<Scheduler>,
    pid: Pid,
}

impl<'a> SchedulerHost<'a> {
    pub(crate) fn new(scheduler: &'a Arc<Scheduler>, pid: Pid) -> Self {
        SchedulerHost { scheduler, pid }
    }
}

impl<'a> VmHost for SchedulerHost<'a> {
    fn self_pid(&self) -> Pid {
        self.pid
    }

    fn spawn_block(&self, code: Bytecode, caps: u32) -> SpawnOutcome {
        let Some(block) = self.scheduler.get_block(self.pid) else { return SpawnOutcome::Rejected };
        if !block.capabilities().has(capability::SPAWN) {
            // Missing capability terminates the block unless it holds
            // TRAP_EXIT, in which case the caller gets a failure value back
            // instead (§4.1 Capability checks).
            if !block.capabilities().has(capability::TRAP_EXIT) {
                block.crash("missing capability: SPAWN");
            }
            return SpawnOutcome::CapabilityDenied;
        }
        match self.scheduler.spawn_ex(code, None, caps, BlockLimits::default(), Some(self.pid)) {
            Some(pid) => SpawnOutcome::Spawned(pid),
            None => SpawnOutcome::Rejected,
        }
    }

    fn send(&self, target: Pid, value: Value) -> SendResult {
        let Some(block) = self.scheduler.get_block(self.pid) else { return SendResult::Error };
        if !block.capabilities().has(capability::SEND) {
            if !block.capabilities().has(capability::TRAP_EXIT) {
                block.crash("missing capability: SEND");
            }
            return SendResult::Error;
        }
        let result = self.scheduler.send(target, self.pid, value);
        if result == SendResult::Ok {
            block.counters().messages_sent.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn receive(&self) -> Option<Value> {
        let block = self.scheduler.get_block(self.pid)?;
        if !block.capabilities().has(capability::RECEIVE) {
            if !block.capabilities().has(capability::TRAP_EXIT) {
                block.crash("missing capability: RECEIVE");
            }
            return None;
        }
        block.receive().map(|m| m.value)
    }
}
