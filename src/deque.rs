//! Chase-Lev work-stealing deque with epoch-based buffer reclamation (§4.6)

use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::block::Block;
use crate::config::{DEQUE_GROWTH_FACTOR, DEQUE_INITIAL_CAPACITY, DEQUE_SAFE_RECLAIM_EPOCH_DISTANCE};

struct Buffer {
    capacity: usize,
    slots: Box<[AtomicPtr<Block>]>,
}

impl Buffer {
    fn new(capacity: usize) -> Box<Buffer> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(AtomicPtr::new(std::ptr::null_mut()));
        }
        Box::new(Buffer { capacity, slots: slots.into_boxed_slice() })
    }

    fn get(&self, index: isize) -> *mut Block {
        let i = (index as usize) & (self.capacity - 1);
        self.slots[i].load(Ordering::Relaxed)
    }

    fn put(&self, index: isize, value: *mut Block) {
        let i = (index as usize) & (self.capacity - 1);
        self.slots[i].store(value, Ordering::Relaxed);
    }
}

struct Retired {
    buffer: Box<Buffer>,
    epoch: u64,
}

/// Owner-side push/pop, thief-side steal. `top` is thief-owned and only
/// ever increases; `bottom` is owner-owned (§3 Work-stealing deque).
pub struct Deque {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    buffer: AtomicPtr<Buffer>,
    epoch: AtomicU64,
    retired: std::sync::Mutex<Vec<Retired>>,
}

// Safety: all cross-thread access goes through the atomics documented at
// each call site, matching the Chase-Lev protocol.
unsafe impl Send for Deque {}
unsafe impl Sync for Deque {}

impl Deque {
    pub fn new() -> Self {
        let buffer = Buffer::new(DEQUE_INITIAL_CAPACITY);
        Deque {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            buffer: AtomicPtr::new(Box::into_raw(buffer)),
            epoch: AtomicU64::new(0),
            retired: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn buffer(&self) -> &Buffer {
        unsafe { &*self.buffer.load(Ordering::Acquire) }
    }

    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        (bottom - top).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owner-side push (§4.6 Push).
    pub fn push(&self, block: Arc<Block>) {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        let mut buffer = self.buffer();

        if bottom - top >= buffer.capacity as isize - 1 {
            self.grow(buffer.capacity * DEQUE_GROWTH_FACTOR, top, bottom);
            buffer = self.buffer();
        }

        let ptr = Arc::into_raw(block) as *mut Block;
        buffer.put(bottom, ptr);
        self.bottom.store(bottom + 1, Ordering::Release);
    }

    fn grow(&self, new_capacity: usize, top: isize, bottom: isize) {
        let old_ptr = self.buffer.load(Ordering::Relaxed);
        let old = unsafe { &*old_ptr };
        let new_buffer = Buffer::new(new_capacity);
        for i in top..bottom {
            new_buffer.put(i, old.get(i));
        }
        let new_ptr = Box::into_raw(new_buffer);
        self.buffer.store(new_ptr, Ordering::Release);

        let prior_epoch = self.epoch.fetch_add(1, Ordering::AcqRel);
        let mut retired = self.retired.lock().unwrap();
        retired.push(Retired { buffer: unsafe { Box::from_raw(old_ptr) }, epoch: prior_epoch });

        let current_epoch = self.epoch.load(Ordering::Acquire);
        retired.retain(|r| current_epoch.saturating_sub(r.epoch) < DEQUE_SAFE_RECLAIM_EPOCH_DISTANCE);
    }

    /// Owner-side pop (§4.6 Pop).
    pub fn pop(&self) -> Option<Arc<Block>> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        let buffer = self.buffer();
        self.bottom.store(bottom, Ordering::Relaxed);

        std::sync::atomic::fence(Ordering::SeqCst);

        let top = self.top.load(Ordering::Relaxed);
        if top > bottom {
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }

        let ptr = buffer.get(bottom);
        if ptr.is_null() {
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }

        if top == bottom {
            // last element: race a thief for it
            let won = self
                .top
                .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }

        Some(unsafe { Arc::from_raw(ptr) })
    }

    /// Thief-side steal (§4.6 Steal).
    pub fn steal(&self) -> Option<Arc<Block>> {
        let top = self.top.load(Ordering::Acquire);
        let bottom = self.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return None;
        }

        let buffer = self.buffer();
        let ptr = buffer.get(top);
        if ptr.is_null() {
            return None;
        }

        if self.top.compare_exchange(top, top + 1, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
            Some(unsafe { Arc::from_raw(ptr) })
        } else {
            None
        }
    }
}

impl Default for Deque {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Deque {
    fn drop(&mut self) {
        // Drain any elements still owned by this deque so their Arc strong
        // counts are released; stolen/popped elements have already been
        // converted back to Arc by their takers.
        while self.pop().is_some() {}
        unsafe {
            drop(Box::from_raw(self.buffer.load(Ordering::Relaxed)));
        }
    }
}
