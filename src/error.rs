//! Error types for the REAM concurrency core

use thiserror::Error;

use crate::types::Pid;

/// Top-level error type for the core
#[derive(Error, Debug)]
pub enum ReamError {
    /// Mailbox errors
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    /// Block registry errors
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Bytecode/VM contract errors
    #[error("bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    /// Checkpoint (de)serialization errors
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Generic scheduler error
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Other errors, wrapped from lower layers
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias for the core
pub type ReamResult<T> = Result<T, ReamError>;

/// Mailbox-specific errors
#[derive(Error, Debug)]
pub enum MailboxError {
    /// Mailbox is at `max_messages` or `max_bytes` and the overflow policy rejected the push
    #[error("mailbox full")]
    Full,

    /// Overflow policy is `BLOCK_SENDER` and the mailbox has no room
    #[error("would block")]
    WouldBlock,

    /// Allocation failure, null mailbox, or null message
    #[error("mailbox operation failed: {0}")]
    Internal(String),
}

/// Block registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// `max_blocks` has been reached
    #[error("registry is at capacity ({0} blocks)")]
    AtCapacity(usize),

    /// Lookup for a pid that is not present
    #[error("block {0} not found")]
    NotFound(Pid),

    /// A block with the requested name already exists
    #[error("name {0:?} already registered")]
    NameTaken(String),

    /// Insert called with a pid already present in the registry
    #[error("pid {0} already registered")]
    DuplicatePid(Pid),
}

/// Bytecode/VM contract errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    /// `block_load` called twice
    #[error("bytecode already loaded")]
    AlreadyLoaded,

    /// Function index out of range
    #[error("invalid function index {0}")]
    InvalidFunction(u32),

    /// VM encountered a protocol violation (stack underflow, type mismatch, bad jump target)
    #[error("vm error: {0}")]
    Vm(String),
}

/// Checkpoint wire-format errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// Magic number did not match
    #[error("bad magic number")]
    BadMagic,

    /// Version newer than this reader understands
    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    /// Truncated or otherwise malformed length-prefixed field
    #[error("corrupt checkpoint data: {0}")]
    Corrupt(String),

    /// Underlying I/O failure
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}
