//! Core identifiers and small value types shared across the runtime

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process identifier, unique for the lifetime of one scheduler.
///
/// Zero is reserved as [`Pid::INVALID`]. Allocated monotonically from an
/// atomic counter starting at 1; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl Pid {
    /// The reserved invalid pid.
    pub const INVALID: Pid = Pid(0);

    /// Whether this is the reserved invalid pid.
    pub fn is_invalid(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic pid allocator, one per scheduler.
#[derive(Debug)]
pub struct PidAllocator {
    next: AtomicU64,
}

impl PidAllocator {
    pub fn new() -> Self {
        PidAllocator { next: AtomicU64::new(1) }
    }

    /// Allocate the next pid. Never returns [`Pid::INVALID`].
    pub fn allocate(&self) -> Pid {
        Pid(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// The four block lifecycle states (§3 Block state).
///
/// Transitions happen exclusively via CAS against an expected prior state
/// (see [`crate::block::Block::try_transition`]); `Dead` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    /// Present in a run queue, not currently executing.
    Runnable = 0,
    /// Currently being executed by some worker.
    Running = 1,
    /// Off all run queues, blocked pending a mailbox message or timeout.
    Waiting = 2,
    /// Terminal. Exit fields are valid.
    Dead = 3,
}

impl BlockState {
    pub(crate) fn from_u8(v: u8) -> BlockState {
        match v {
            0 => BlockState::Runnable,
            1 => BlockState::Running,
            2 => BlockState::Waiting,
            3 => BlockState::Dead,
            _ => unreachable!("invalid block state discriminant {v}"),
        }
    }
}

/// Classification of an exit used when deciding link/trap-exit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0 and no reason string.
    Normal,
    /// Non-zero exit code or a reason string present.
    Crash,
}

/// Exit information, valid once a block's state is [`BlockState::Dead`].
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub code: i32,
    pub reason: Option<String>,
}

impl ExitInfo {
    pub fn kind(&self) -> ExitKind {
        if self.code == 0 && self.reason.is_none() {
            ExitKind::Normal
        } else {
            ExitKind::Crash
        }
    }
}

/// Mailbox overflow policy (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the arriving message.
    DropNew,
    /// Pop oldest messages until the new one fits.
    DropOld,
    /// Report would-block to the caller; caller decides whether to retry.
    BlockSender,
    /// Reject and signal a fatal condition to the caller.
    Crash,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropNew
    }
}

/// Result of a [`crate::mailbox::Mailbox::push`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Ok,
    Full,
    WouldBlock,
    Error,
}

/// Result of a [`crate::vm::VmHost::spawn_block`] call (§4.1 Capability
/// checks). Kept distinct from a plain `Option<Pid>` so the VM can tell a
/// capability denial (which TRAP_EXIT downgrades to a failure value) apart
/// from an ordinary scheduler rejection (always a hard error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned(Pid),
    CapabilityDenied,
    Rejected,
}

/// Result of running a VM time slice (§2, §6 VM contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmOutcome {
    /// The slice ran to completion of a voluntary step; block stays runnable.
    Ok,
    /// The block exhausted its reduction budget or executed `YIELD`.
    Yield,
    /// The block executed a receive against an empty mailbox.
    Waiting,
    /// Execution halted normally (explicit halt instruction or fell off the end).
    Halted,
    /// A protocol violation occurred; `vm_error` carries the message.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_allocator_is_monotonic_and_skips_invalid() {
        let alloc = PidAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a.raw() >= 1);
        assert!(b.raw() > a.raw());
        assert!(!a.is_invalid());
        assert!(Pid::INVALID.is_invalid());
    }

    #[test]
    fn exit_info_classifies_normal_vs_crash() {
        let normal = ExitInfo { code: 0, reason: None };
        assert_eq!(normal.kind(), ExitKind::Normal);

        let crash = ExitInfo { code: 1, reason: Some("boom".into()) };
        assert_eq!(crash.kind(), ExitKind::Crash);

        let crash_code_only = ExitInfo { code: 2, reason: None };
        assert_eq!(crash_code_only.kind(), ExitKind::Crash);
    }
}
