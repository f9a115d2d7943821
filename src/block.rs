//! Block: the sole unit of isolation (§3 Block, §4.3)

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::bytecode::Bytecode;
use crate::capability::{self, CapabilitySet};
use crate::config::BlockLimits;
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::types::{BlockState, ExitInfo, Pid, SendResult};
use crate::value::Value;
use crate::vm::Vm;

/// Per-block resource counters (§3 Resource counters). All atomic because
/// messages-sent/received are incremented by sender threads.
#[derive(Debug, Default)]
pub struct BlockCounters {
    pub reductions: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub gc_collections: AtomicU64,
    pub gc_bytes_collected: AtomicU64,
}

/// Links, monitors, and monitored-by lists, mutated only under one mutex
/// (§3 Block, §4.3 Invariants).
#[derive(Debug, Default)]
pub struct Neighbours {
    pub links: Vec<Pid>,
    pub monitors: Vec<Pid>,
    pub monitored_by: Vec<Pid>,
}

pub struct Block {
    pid: Pid,
    name: Mutex<Option<String>>,
    state: AtomicU8,
    capabilities: CapabilitySet,
    limits: BlockLimits,
    vm: Mutex<Option<Vm>>,
    mailbox: Mailbox,
    neighbours: Mutex<Neighbours>,
    parent: Option<Pid>,
    counters: BlockCounters,
    exit: Mutex<Option<ExitInfo>>,
}

impl Block {
    pub fn new(pid: Pid, name: Option<String>, parent: Option<Pid>, limits: BlockLimits) -> Self {
        Block {
            pid,
            name: Mutex::new(name),
            state: AtomicU8::new(BlockState::Runnable as u8),
            capabilities: CapabilitySet::new(capability::NONE),
            limits,
            vm: Mutex::new(None),
            mailbox: Mailbox::new(
                limits.max_mailbox_messages,
                0,
                crate::types::OverflowPolicy::DropNew,
            ),
            neighbours: Mutex::new(Neighbours::default()),
            parent,
            counters: BlockCounters::default(),
            exit: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn limits(&self) -> BlockLimits {
        self.limits
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn grant(&self, caps: u32) {
        self.capabilities.grant(caps);
    }

    pub fn revoke(&self, caps: u32) {
        self.capabilities.revoke(caps);
    }

    pub fn counters(&self) -> &BlockCounters {
        &self.counters
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// CAS state transition (§3 Legal transitions). `DEAD` is absorbing:
    /// attempting to leave it always fails.
    pub fn try_transition(&self, from: BlockState, to: BlockState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.state() != BlockState::Dead
    }

    /// Installs bytecode; fails (returns `false`) if a VM is already loaded
    /// (§4.3 Lifecycle, §6 `block_load`).
    pub fn load(&self, code: Bytecode, reduction_limit: u64) -> bool {
        let mut vm = self.vm.lock().unwrap();
        if vm.is_some() {
            return false;
        }
        let mut new_vm = Vm::new(code);
        new_vm.set_reduction_limit(reduction_limit);
        *vm = Some(new_vm);
        true
    }

    pub fn with_vm<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> Option<R> {
        let mut guard = self.vm.lock().unwrap();
        guard.as_mut().map(f)
    }

    /// Deep-copies `value` into this block's isolated heap and enqueues it
    /// (§4.3 Send API). The sender's heap and this block's heap share
    /// nothing afterward.
    pub fn deliver(&self, sender: Pid, value: Value) -> SendResult {
        let result = self.mailbox.push(sender, value.deep_copy());
        if result == SendResult::Ok {
            self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn receive(&self) -> Option<Message> {
        self.mailbox.pop()
    }

    pub fn has_messages(&self) -> bool {
        self.mailbox.has_messages()
    }

    /// Records `other` in this block's link array. Idempotent (§4.3 Link).
    pub fn link(&self, other: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        if !n.links.contains(&other) {
            n.links.push(other);
        }
    }

    pub fn unlink(&self, other: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        n.links.retain(|p| *p != other);
    }

    pub fn monitor(&self, target: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        if !n.monitors.contains(&target) {
            n.monitors.push(target);
        }
    }

    pub fn demonitor(&self, target: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        n.monitors.retain(|p| *p != target);
    }

    pub fn add_monitored_by(&self, watcher: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        if !n.monitored_by.contains(&watcher) {
            n.monitored_by.push(watcher);
        }
    }

    pub fn remove_monitored_by(&self, watcher: Pid) {
        let mut n = self.neighbours.lock().unwrap();
        n.monitored_by.retain(|p| *p != watcher);
    }

    /// Removes `other` from this block's links, returning whether it had
    /// been present. Used by exit propagation to cut the back-link before
    /// recursing (§4.5 step 2, §9 Cycles).
    pub fn remove_link(&self, other: Pid) -> bool {
        let mut n = self.neighbours.lock().unwrap();
        let before = n.links.len();
        n.links.retain(|p| *p != other);
        n.links.len() != before
    }

    pub fn links_snapshot(&self) -> Vec<Pid> {
        self.neighbours.lock().unwrap().links.clone()
    }

    pub fn monitored_by_snapshot(&self) -> Vec<Pid> {
        self.neighbours.lock().unwrap().monitored_by.clone()
    }

    pub fn monitors_snapshot(&self) -> Vec<Pid> {
        self.neighbours.lock().unwrap().monitors.clone()
    }

    /// Normal termination, idempotent (§4.3 Exit / crash).
    pub fn exit(&self, code: i32) {
        let mut exit = self.exit.lock().unwrap();
        if exit.is_some() {
            return;
        }
        let prev = self.state();
        if prev == BlockState::Dead {
            return;
        }
        self.state.store(BlockState::Dead as u8, Ordering::Release);
        *exit = Some(ExitInfo { code, reason: None });
        trace!(pid = %self.pid, code, "block exited normally");
    }

    /// Fatal termination, idempotent (§4.3 Exit / crash).
    pub fn crash(&self, reason: impl Into<String>) {
        let mut exit = self.exit.lock().unwrap();
        if exit.is_some() {
            return;
        }
        if self.state() == BlockState::Dead {
            return;
        }
        let reason = reason.into();
        self.state.store(BlockState::Dead as u8, Ordering::Release);
        debug!(pid = %self.pid, %reason, "block crashed");
        *exit = Some(ExitInfo { code: 1, reason: Some(reason) });
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.lock().unwrap().clone()
    }
}
