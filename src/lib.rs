//! # REAM: concurrency and isolation substrate
//!
//! A BEAM-style runtime for isolated, preemptively scheduled processes
//! ("blocks") that communicate only by asynchronous message passing.
//! This crate is the core: block model, lock-free mailbox, scheduler, and
//! a Chase-Lev work-stealing worker pool. Bytecode semantics, value
//! representation, and supervision policy are kept deliberately thin —
//! the core only needs a concrete instantiation of each to run end to end.

pub mod block;
pub mod bytecode;
pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod deque;
pub mod error;
pub mod exit;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod scheduler;
pub mod supervisor;
pub mod timer;
pub mod types;
pub mod value;
pub mod vm;
pub mod worker;

pub use block::Block;
pub use bytecode::{Bytecode, ChunkBuilder, Op};
pub use error::{ReamError, ReamResult};
pub use scheduler::{Scheduler, SchedulerStatsSnapshot};
pub use types::{BlockState, Pid};
pub use value::Value;

/// Installs a `tracing_subscriber::fmt` subscriber driven by `RUST_LOG`
/// (or `info` if unset). There is no CLI in this crate to wire logging
/// from, so embedders call this once at process start.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
