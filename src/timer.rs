//! Timer-wheel collaborator interface for receive-with-timeout (§5 Cancellation & timeouts)
//!
//! The core requires only that a fired timer wake the waiting block and
//! flag `timeout_fired`; the wheel's internal bucketing/tick strategy is a
//! collaborator's concern (§1 Out of scope).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::Scheduler;
use crate::types::Pid;

/// Handle a block holds while a receive-with-timeout is pending.
#[derive(Debug, Default)]
pub struct TimerHandle {
    fired: AtomicBool,
}

impl TimerHandle {
    pub fn new() -> Self {
        TimerHandle { fired: AtomicBool::new(false) }
    }

    pub fn timeout_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }
}

/// Minimal timer wheel: one OS thread per scheduled timeout. A production
/// embedding would replace this with a real hierarchical wheel; the core
/// only requires the wake-on-fire contract below (§9 Open question: timed
/// receive while re-queued — at least one `WAITING -> RUNNABLE` transition
/// is guaranteed, simultaneous message delivery is acceptable).
pub struct TimerWheel;

impl TimerWheel {
    /// Schedules a wake-up for `pid` after `delay`. Returns the handle the
    /// block should consult for `timeout_fired` on its next execution.
    pub fn schedule(scheduler: Arc<Scheduler>, pid: Pid, delay: Duration) -> Arc<TimerHandle> {
        let handle = Arc::new(TimerHandle::new());
        let fired_handle = Arc::clone(&handle);
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            fired_handle.fire();
            scheduler.wake_block(pid);
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, ChunkBuilder, Op};
    use crate::config::SchedulerConfig;

    #[test]
    fn fired_timer_wakes_a_waiting_block() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let code = Bytecode::new(ChunkBuilder::new().op(Op::Receive).build());
        let pid = scheduler.spawn(code, None).unwrap();
        scheduler.step(); // runs Receive against an empty mailbox -> WAITING

        let handle = TimerWheel::schedule(Arc::clone(&scheduler), pid, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(50));

        assert!(handle.timeout_fired());
        assert_eq!(scheduler.get_block(pid).unwrap().state(), crate::types::BlockState::Runnable);
    }
}
