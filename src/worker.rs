//! OS-thread worker: own deque, steal from peers, run one block per iteration (§4.7)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace};

use crate::deque::Deque;
use crate::scheduler::{Scheduler, SchedulerHost};
use crate::types::BlockState;

const IDLE_CHECK_INTERVAL: u32 = 100;
const IDLE_BACKOFF_START: Duration = Duration::from_micros(10);
const IDLE_BACKOFF_CAP: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub blocks_executed: AtomicU64,
    pub total_reductions: AtomicU64,
    pub steals_attempted: AtomicU64,
    pub steals_successful: AtomicU64,
}

/// One worker thread's xorshift64 RNG, used to pick a random starting peer
/// for steal attempts (§3 Worker).
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Xorshift64 { state: seed.max(1) }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

pub struct Worker {
    id: usize,
    scheduler: Weak<Scheduler>,
    deque: Deque,
    stats: WorkerStats,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(id: usize, scheduler: Weak<Scheduler>) -> Self {
        Worker { id, scheduler, deque: Deque::new(), stats: WorkerStats::default(), handle: Mutex::new(None) }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn deque(&self) -> &Deque {
        &self.deque
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn start(self: &std::sync::Arc<Self>) {
        let worker = std::sync::Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("ream-worker-{}", worker.id))
            .spawn(move || worker.run_loop())
            .expect("failed to spawn worker thread");
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn run_loop(self: std::sync::Arc<Self>) {
        let Some(scheduler) = self.scheduler.upgrade() else { return };
        let mut rng = Xorshift64::new((self.id as u64).wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1));
        let mut idle_iterations: u32 = 0;
        let mut backoff = IDLE_BACKOFF_START;

        loop {
            let stolen = || {
                if scheduler.config().enable_stealing {
                    self.steal_from_peers(&scheduler, &mut rng)
                } else {
                    None
                }
            };
            if let Some(block) = self.deque.pop().or_else(stolen) {
                idle_iterations = 0;
                backoff = IDLE_BACKOFF_START;

                let pid = block.pid();
                if !block.try_transition(BlockState::Runnable, BlockState::Running) {
                    continue;
                }

                let host = SchedulerHost::new(&scheduler, pid);
                let limit = block.limits().max_reductions;
                block.with_vm(|vm| vm.set_reduction_limit(limit));
                let outcome = block.with_vm(|vm| vm.run(&host)).unwrap_or(crate::types::VmOutcome::Error);
                let reductions = block.with_vm(|vm| vm.reductions_this_slice()).unwrap_or(0);

                block.counters().reductions.fetch_add(reductions, Ordering::Relaxed);
                self.stats.blocks_executed.fetch_add(1, Ordering::Relaxed);
                self.stats.total_reductions.fetch_add(reductions, Ordering::Relaxed);

                scheduler.dispatch(pid, &block, outcome);
            } else {
                idle_iterations += 1;
                if idle_iterations % IDLE_CHECK_INTERVAL == 0 {
                    let stats = scheduler.stats();
                    if stats.total_spawned > 0 && stats.total_terminated >= stats.total_spawned {
                        trace!(worker = self.id, "idle quiescence reached, exiting loop");
                        break;
                    }
                }
                if !scheduler.is_running() {
                    break;
                }
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(IDLE_BACKOFF_CAP);
            }
        }
        debug!(worker = self.id, executed = self.stats.blocks_executed.load(Ordering::Relaxed), "worker exiting");
    }

    fn steal_from_peers(
        &self,
        scheduler: &std::sync::Arc<Scheduler>,
        rng: &mut Xorshift64,
    ) -> Option<std::sync::Arc<crate::block::Block>> {
        let peers = scheduler.workers();
        if peers.len() <= 1 {
            return None;
        }
        let start = (rng.next() as usize) % peers.len();
        for offset in 0..peers.len() {
            let idx = (start + offset) % peers.len();
            if idx == self.id {
                continue;
            }
            self.stats.steals_attempted.fetch_add(1, Ordering::Relaxed);
            if let Some(block) = peers[idx].deque.steal() {
                self.stats.steals_successful.fetch_add(1, Ordering::Relaxed);
                return Some(block);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, ChunkBuilder, Op};
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::Ordering as Ord;

    #[test]
    fn worker_with_no_peers_attempts_no_steal() {
        let mut config = SchedulerConfig::default();
        config.num_workers = 1;
        let scheduler = Scheduler::new(config);
        let worker = &scheduler.workers()[0];
        let mut rng = Xorshift64::new(1);
        assert!(worker.steal_from_peers(&scheduler, &mut rng).is_none());
        assert_eq!(worker.stats().steals_attempted.load(Ord::Relaxed), 0);
    }

    #[test]
    fn work_stealing_runs_bursts_of_yielding_blocks() {
        let mut config = SchedulerConfig::default();
        config.num_workers = 4;
        let limits_reductions = 5;
        let scheduler = Scheduler::new(config);

        let total = 200;
        let mut pids = Vec::with_capacity(total);
        for _ in 0..total {
            let code = Bytecode::new(
                ChunkBuilder::new().op(Op::Yield).op(Op::Jump(0)).build(),
            );
            let limits = crate::config::BlockLimits {
                max_reductions: limits_reductions,
                ..crate::config::BlockLimits::default()
            };
            let pid = scheduler
                .spawn_ex(code, None, crate::capability::ALL, limits, None)
                .unwrap();
            pids.push(pid);
        }

        for worker in scheduler.workers() {
            assert_eq!(worker.stats().blocks_executed.load(Ord::Relaxed), 0);
        }

        let runner = {
            let scheduler = std::sync::Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run())
        };
        // Let the workers fight over the burst long enough for stealing to
        // actually happen, then stop the scheduler and kill everything so
        // the run loop reaches quiescence and the runner thread joins.
        std::thread::sleep(Duration::from_millis(200));
        for pid in pids {
            scheduler.kill(pid);
        }
        scheduler.stop();
        runner.join().unwrap();

        let total_steals: u64 = scheduler
            .workers()
            .iter()
            .map(|w| w.stats().steals_successful.load(Ord::Relaxed))
            .sum();
        assert!(total_steals > 0, "expected at least one successful steal across workers");
    }
}
