//! Lock-free MPSC mailbox (§4.2)
//!
//! A Vyukov-style intrusive-linked-list queue: any number of producer
//! threads may [`Mailbox::push`] concurrently; exactly one consumer thread
//! may [`Mailbox::pop`]. A stub node keeps the empty/non-empty boundary
//! well-defined without a separate "queue is empty" flag.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::error::MailboxError;
use crate::message::Message;
use crate::types::{OverflowPolicy, Pid, SendResult};
use crate::value::Value;

/// Intrusive queue node. `msg` is `None` only for a stub.
struct Node {
    msg: Option<Message>,
    next: AtomicPtr<Node>,
}

impl Node {
    fn stub() -> *mut Node {
        Box::into_raw(Box::new(Node { msg: None, next: AtomicPtr::new(std::ptr::null_mut()) }))
    }

    fn with_message(msg: Message) -> *mut Node {
        Box::into_raw(Box::new(Node { msg: Some(msg), next: AtomicPtr::new(std::ptr::null_mut()) }))
    }
}

/// Maximum spin iterations while waiting out a producer mid-push before
/// `pop` gives up and returns `None` (§4.2 Pop).
const POP_SPIN_CAP: u32 = 100;

pub struct Mailbox {
    head: UnsafeCell<*mut Node>,
    tail: AtomicPtr<Node>,

    count: AtomicUsize,
    current_bytes: AtomicUsize,
    dropped_count: AtomicU64,
    total_received: AtomicU64,

    max_messages: usize,
    max_bytes: usize,
    overflow_policy: OverflowPolicy,

    recv_mutex: Mutex<()>,
    recv_cv: Condvar,
}

// Safety: `head` is only ever touched by the single consumer thread, which
// is the contract `pop`/`receive` callers must uphold. `tail`, the counters,
// and node linking are all done through atomics with the orderings spelled
// out in §5 Memory ordering summary.
unsafe impl Send for Mailbox {}
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub fn new(max_messages: usize, max_bytes: usize, overflow_policy: OverflowPolicy) -> Self {
        let stub = Node::stub();
        Mailbox {
            head: UnsafeCell::new(stub),
            tail: AtomicPtr::new(stub),
            count: AtomicUsize::new(0),
            current_bytes: AtomicUsize::new(0),
            dropped_count: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            max_messages,
            max_bytes,
            overflow_policy,
            recv_mutex: Mutex::new(()),
            recv_cv: Condvar::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, 0, OverflowPolicy::DropNew)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    /// Push a message from any thread (§4.2 Push).
    pub fn push(&self, sender: Pid, value: Value) -> SendResult {
        let size = value.estimated_size();

        if self.max_messages > 0 && self.count.load(Ordering::Relaxed) >= self.max_messages {
            if let Some(result) = self.apply_overflow(size) {
                return result;
            }
        }
        if self.max_bytes > 0 {
            while self.current_bytes.load(Ordering::Relaxed) + size > self.max_bytes {
                match self.overflow_policy {
                    OverflowPolicy::DropOld => {
                        if !self.evict_oldest_for_bytes() {
                            break;
                        }
                    }
                    OverflowPolicy::DropNew | OverflowPolicy::BlockSender | OverflowPolicy::Crash => {
                        if let Some(result) = self.apply_overflow(size) {
                            return result;
                        }
                        break;
                    }
                }
            }
        }

        let node = Node::with_message(Message::new(sender, value));
        self.link(node);

        self.count.fetch_add(1, Ordering::Relaxed);
        self.current_bytes.fetch_add(size, Ordering::Relaxed);
        self.total_received.fetch_add(1, Ordering::Relaxed);

        let _guard = self.recv_mutex.lock();
        self.recv_cv.notify_all();
        drop(_guard);

        SendResult::Ok
    }

    /// Returns `Some(result)` to short-circuit the caller, `None` to proceed
    /// with the push after having made room (DROP_OLD).
    fn apply_overflow(&self, _incoming_size: usize) -> Option<SendResult> {
        match self.overflow_policy {
            OverflowPolicy::DropNew => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
                warn!(err = %MailboxError::Full, "dropping new message (DROP_NEW)");
                Some(SendResult::Full)
            }
            OverflowPolicy::DropOld => {
                self.evict_oldest_for_bytes();
                None
            }
            OverflowPolicy::BlockSender => {
                warn!(err = %MailboxError::WouldBlock, "sender must retry");
                Some(SendResult::WouldBlock)
            }
            OverflowPolicy::Crash => {
                warn!(err = %MailboxError::Full, "mailbox full under CRASH policy");
                Some(SendResult::Full)
            }
        }
    }

    /// Pop one message via the consumer path to make room; returns whether
    /// something was actually evicted.
    fn evict_oldest_for_bytes(&self) -> bool {
        if let Some(old) = self.pop() {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            self.current_bytes.fetch_sub(old.value.estimated_size(), Ordering::Relaxed);
            self.count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn link(&self, node: *mut Node) {
        unsafe {
            (*node).next.store(std::ptr::null_mut(), Ordering::Release);
        }
        let prev = self.tail.swap(node, Ordering::AcqRel);
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
    }

    /// Single-consumer pop (§4.2 Pop). Returns `None` on empty queue, or
    /// transiently when a producer is mid-push and the spin budget is
    /// exhausted — the caller may retry.
    pub fn pop(&self) -> Option<Message> {
        unsafe {
            let mut head = *self.head.get();
            let mut next = (*head).next.load(Ordering::Acquire);

            if (*head).msg.is_none() {
                // head is a stub node; step past it if something follows.
                if next.is_null() {
                    return None;
                }
                *self.head.get() = next;
                head = next;
                next = (*next).next.load(Ordering::Acquire);
            }

            if !next.is_null() {
                *self.head.get() = next;
                let msg = (*head).msg.take();
                drop(Box::from_raw(head));
                return msg;
            }

            let tail = self.tail.load(Ordering::Acquire);
            if !std::ptr::eq(head, tail) {
                // A producer has swapped the tail but not yet published the
                // link; spin with backoff up to the cap, then give up.
                let backoff = Backoff::new();
                for _ in 0..POP_SPIN_CAP {
                    next = (*head).next.load(Ordering::Acquire);
                    if !next.is_null() {
                        *self.head.get() = next;
                        let msg = (*head).msg.take();
                        drop(Box::from_raw(head));
                        return msg;
                    }
                    backoff.snooze();
                }
                return None;
            }

            // Queue looks empty and head == tail: re-enqueue a fresh stub so
            // the next push has something to link onto, then retry once.
            let stub = Node::stub();
            self.link(stub);
            next = (*head).next.load(Ordering::Acquire);
            if !next.is_null() {
                *self.head.get() = next;
                let msg = (*head).msg.take();
                drop(Box::from_raw(head));
                return msg;
            }
            None
        }
    }

    /// Blocking receive with an optional timeout (§4.2).
    pub fn receive_timeout(&self, timeout: Option<Duration>) -> Option<Message> {
        if let Some(msg) = self.pop() {
            return Some(msg);
        }
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            let mut guard = self.recv_mutex.lock();
            if let Some(msg) = self.pop() {
                return Some(msg);
            }
            match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return None;
                    }
                    let remaining = dl - now;
                    let result = self.recv_cv.wait_for(&mut guard, remaining);
                    drop(guard);
                    if let Some(msg) = self.pop() {
                        return Some(msg);
                    }
                    if result.timed_out() {
                        return None;
                    }
                }
                None => {
                    self.recv_cv.wait(&mut guard);
                    drop(guard);
                    if let Some(msg) = self.pop() {
                        return Some(msg);
                    }
                }
            }
        }
    }

    pub fn has_messages(&self) -> bool {
        !self.is_empty()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        unsafe {
            let mut node = *self.head.get();
            while !node.is_null() {
                let next = (*node).next.load(Ordering::Relaxed);
                drop(Box::from_raw(node));
                node = next;
            }
        }
    }
}
