//! Sharded block registry (§3 Block registry)

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::Block;
use crate::config::REGISTRY_SHARD_COUNT;
use crate::error::RegistryError;
use crate::types::Pid;

struct Shard {
    blocks: Mutex<HashMap<u64, Arc<Block>>>,
}

impl Shard {
    fn new() -> Self {
        Shard { blocks: Mutex::new(HashMap::new()) }
    }
}

/// 64-shard open hash table keyed by pid, with an atomic population counter
/// used to enforce `max_blocks` via compare-and-swap reservation *before*
/// insertion (§3 Block registry — avoids TOCTOU on overflow).
pub struct Registry {
    shards: Vec<Shard>,
    total_count: AtomicUsize,
    max_blocks: usize,
    names: Mutex<HashMap<String, Pid>>,
}

impl Registry {
    pub fn new(max_blocks: usize) -> Self {
        let mut shards = Vec::with_capacity(REGISTRY_SHARD_COUNT);
        for _ in 0..REGISTRY_SHARD_COUNT {
            shards.push(Shard::new());
        }
        Registry { shards, total_count: AtomicUsize::new(0), max_blocks, names: Mutex::new(HashMap::new()) }
    }

    fn shard_for(&self, pid: Pid) -> &Shard {
        &self.shards[(pid.raw() % REGISTRY_SHARD_COUNT as u64) as usize]
    }

    pub fn len(&self) -> usize {
        self.total_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserves a slot against `max_blocks` via CAS, then inserts. On
    /// insert failure (duplicate pid) the reservation is released
    /// (§4.4 Spawn step 5).
    pub fn insert(&self, block: Arc<Block>) -> Result<(), RegistryError> {
        loop {
            let current = self.total_count.load(Ordering::Relaxed);
            if self.max_blocks > 0 && current >= self.max_blocks {
                return Err(RegistryError::AtCapacity(self.max_blocks));
            }
            if self
                .total_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        let pid = block.pid();
        let shard = self.shard_for(pid);
        let mut guard = shard.blocks.lock();
        if guard.contains_key(&pid.raw()) {
            drop(guard);
            self.total_count.fetch_sub(1, Ordering::AcqRel);
            return Err(RegistryError::DuplicatePid(pid));
        }
        guard.insert(pid.raw(), block);
        Ok(())
    }

    pub fn get(&self, pid: Pid) -> Option<Arc<Block>> {
        if pid.is_invalid() {
            return None;
        }
        self.shard_for(pid).blocks.lock().get(&pid.raw()).cloned()
    }

    pub fn register_name(&self, name: String, pid: Pid) -> Result<(), RegistryError> {
        let mut names = self.names.lock();
        if names.contains_key(&name) {
            return Err(RegistryError::NameTaken(name));
        }
        names.insert(name, pid);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Pid> {
        self.names.lock().get(name).copied()
    }

    /// Removes a block's registry entry. The core keeps `DEAD` blocks
    /// registered until scheduler teardown by default (§9 Open question);
    /// this is exposed for an optional reaper built on top.
    pub fn remove(&self, pid: Pid) -> Option<Arc<Block>> {
        let removed = self.shard_for(pid).blocks.lock().remove(&pid.raw());
        if removed.is_some() {
            self.total_count.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }
}
