//! Capability bitmask checked before every privileged operation (§4.1)

use std::sync::atomic::{AtomicU32, Ordering};

macro_rules! capability_bits {
    ($($name:ident = $bit:expr),* $(,)?) => {
        $(pub const $name: u32 = 1 << $bit;)*
    };
}

capability_bits! {
    SPAWN = 0,
    SEND = 1,
    RECEIVE = 2,
    INFER = 3,
    HTTP = 4,
    FILE_READ = 5,
    FILE_WRITE = 6,
    DB = 7,
    MEMORY = 8,
    LINK = 9,
    SHELL = 10,
    EXEC = 11,
    MONITOR = 12,
    TRAP_EXIT = 13,
}

/// No capabilities.
pub const NONE: u32 = 0;
/// Union of every defined capability bit.
pub const ALL: u32 = SPAWN
    | SEND
    | RECEIVE
    | INFER
    | HTTP
    | FILE_READ
    | FILE_WRITE
    | DB
    | MEMORY
    | LINK
    | SHELL
    | EXEC
    | MONITOR
    | TRAP_EXIT;

/// Human-readable name for a single capability bit, used in crash reasons
/// (`"missing capability: <NAME>"`).
pub fn bit_name(bit: u32) -> &'static str {
    match bit {
        SPAWN => "SPAWN",
        SEND => "SEND",
        RECEIVE => "RECEIVE",
        INFER => "INFER",
        HTTP => "HTTP",
        FILE_READ => "FILE_READ",
        FILE_WRITE => "FILE_WRITE",
        DB => "DB",
        MEMORY => "MEMORY",
        LINK => "LINK",
        SHELL => "SHELL",
        EXEC => "EXEC",
        MONITOR => "MONITOR",
        TRAP_EXIT => "TRAP_EXIT",
        _ => "UNKNOWN",
    }
}

/// A block's capability set. Capabilities are granted at spawn and may be
/// additively granted or revoked at runtime; a child never inherits more
/// than the spawner explicitly specified (capabilities are not transitive).
#[derive(Debug, Default)]
pub struct CapabilitySet(AtomicU32);

impl CapabilitySet {
    pub fn new(bits: u32) -> Self {
        CapabilitySet(AtomicU32::new(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    /// True iff every bit in `required` is set.
    pub fn has(&self, required: u32) -> bool {
        self.bits() & required == required
    }

    pub fn grant(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::Relaxed);
    }

    pub fn revoke(&self, bits: u32) {
        self.0.fetch_and(!bits, Ordering::Relaxed);
    }
}

impl Clone for CapabilitySet {
    fn clone(&self) -> Self {
        CapabilitySet::new(self.bits())
    }
}
