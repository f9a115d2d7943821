//! Scheduler and block configuration defaults (§6)

use crate::types::OverflowPolicy;

/// Per-block resource caps (§3 Resource limits).
#[derive(Debug, Clone, Copy)]
pub struct BlockLimits {
    pub max_heap_bytes: usize,
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
    /// Max VM reductions executed per scheduled time slice.
    pub max_reductions: u64,
    pub max_mailbox_messages: usize,
}

impl Default for BlockLimits {
    fn default() -> Self {
        BlockLimits {
            max_heap_bytes: 16 * 1024 * 1024,
            max_stack_depth: 4096,
            max_call_depth: 1024,
            max_reductions: 10_000,
            max_mailbox_messages: 0, // unbounded
        }
    }
}

/// Mailbox-specific configuration, separate from [`BlockLimits`] because a
/// block may override its overflow policy independent of its message cap.
#[derive(Debug, Clone, Copy)]
pub struct MailboxConfig {
    pub max_messages: usize,
    pub max_bytes: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            max_messages: 0, // unbounded by default
            max_bytes: 0,
            overflow_policy: OverflowPolicy::DropNew,
        }
    }
}

/// Scheduler-wide configuration (§4.4).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_blocks: usize,
    pub default_reductions: u64,
    /// 0 selects single-threaded mode (global run queue, no workers).
    pub num_workers: usize,
    pub enable_stealing: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_blocks: 10_000,
            default_reductions: 10_000,
            num_workers: 0,
            enable_stealing: true,
        }
    }
}

impl SchedulerConfig {
    /// Auto-detects worker count from the CPU topology, matching the
    /// teacher's `num_cpus::get()` use in `RuntimeConfig::default`.
    pub fn multi_threaded() -> Self {
        SchedulerConfig { num_workers: num_cpus::get(), ..Default::default() }
    }

    pub fn is_single_threaded(&self) -> bool {
        self.num_workers == 0
    }
}

/// Registry sizing (§3 Block registry, §6 defaults).
pub const REGISTRY_SHARD_COUNT: usize = 64;
pub const REGISTRY_INITIAL_BUCKET_CAPACITY: usize = 64;
pub const REGISTRY_LOAD_FACTOR: f64 = 0.75;

/// Work-stealing deque sizing (§4.6, §6 defaults).
pub const DEQUE_INITIAL_CAPACITY: usize = 64;
pub const DEQUE_GROWTH_FACTOR: usize = 2;
/// A retired buffer is safe to free once the current epoch has advanced by
/// at least this much since the buffer's retirement epoch.
pub const DEQUE_SAFE_RECLAIM_EPOCH_DISTANCE: u64 = 2;
