//! Checkpoint binary wire format (§6 Checkpoint file format)
//!
//! Big-endian on the wire, fixed field sizes. Grounded on the byte-counted
//! framing discipline `byteorder` gives length-prefixed binary formats in
//! the pack's storage-engine example; this core only needs one-shot
//! encode/decode, not a streaming reader.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::block::Block;
use crate::error::CheckpointError;
use crate::types::Pid;
use crate::value::{self, Value};

const MAGIC: u32 = 0xA641_C9D0;
const VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp_ms: u64,
    pub checkpoint_id: u64,
    pub original_pid: Pid,
    pub name: Option<String>,
    pub globals: Vec<u8>,
    pub links: Vec<Pid>,
    pub parent: Pid,
    pub capabilities: u32,
    pub reductions: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub mailbox_count: u32,
}

impl Checkpoint {
    /// Snapshots the metadata fields a checkpoint needs from a live block.
    /// Globals are a lossy JSON projection (§ value.rs `to_json_bytes`)
    /// since the wire format wants an opaque blob, not a typed value.
    pub fn capture(block: &Block, checkpoint_id: u64, timestamp_ms: u64) -> Checkpoint {
        let globals = block
            .with_vm(|vm| {
                let entries: Vec<(String, Value)> =
                    vm.globals().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                value::to_json_bytes(&Value::Map(entries))
            })
            .unwrap_or_default();

        Checkpoint {
            version: VERSION,
            timestamp_ms,
            checkpoint_id,
            original_pid: block.pid(),
            name: block.name(),
            globals,
            links: block.links_snapshot(),
            parent: block.parent().unwrap_or(Pid::INVALID),
            capabilities: block.capabilities().bits(),
            reductions: block.counters().reductions.load(std::sync::atomic::Ordering::Relaxed),
            messages_sent: block.counters().messages_sent.load(std::sync::atomic::Ordering::Relaxed),
            messages_received: block.counters().messages_received.load(std::sync::atomic::Ordering::Relaxed),
            mailbox_count: block.mailbox().len() as u32,
        }
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), CheckpointError> {
        w.write_u32::<BigEndian>(MAGIC)?;
        w.write_u32::<BigEndian>(self.version)?;
        w.write_u64::<BigEndian>(self.timestamp_ms)?;
        w.write_u64::<BigEndian>(self.checkpoint_id)?;
        w.write_u64::<BigEndian>(self.original_pid.raw())?;

        let name_bytes = self.name.as_deref().unwrap_or("").as_bytes();
        w.write_u32::<BigEndian>(name_bytes.len() as u32)?;
        w.write_all(name_bytes)?;

        w.write_u32::<BigEndian>(self.globals.len() as u32)?;
        w.write_all(&self.globals)?;

        w.write_u32::<BigEndian>(self.links.len() as u32)?;
        for pid in &self.links {
            w.write_u64::<BigEndian>(pid.raw())?;
        }

        w.write_u64::<BigEndian>(self.parent.raw())?;
        w.write_u32::<BigEndian>(self.capabilities)?;
        w.write_u64::<BigEndian>(self.reductions)?;
        w.write_u64::<BigEndian>(self.messages_sent)?;
        w.write_u64::<BigEndian>(self.messages_received)?;
        w.write_u32::<BigEndian>(self.mailbox_count)?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut r: R) -> Result<Checkpoint, CheckpointError> {
        let magic = r.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(CheckpointError::BadMagic);
        }
        let version = r.read_u32::<BigEndian>()?;
        if version > VERSION {
            return Err(CheckpointError::UnsupportedVersion(version));
        }

        let timestamp_ms = r.read_u64::<BigEndian>()?;
        let checkpoint_id = r.read_u64::<BigEndian>()?;
        let original_pid = Pid(r.read_u64::<BigEndian>()?);

        let name_len = r.read_u32::<BigEndian>()? as usize;
        let name = read_exact_string(&mut r, name_len)?;
        let name = if name.is_empty() { None } else { Some(name) };

        let globals_len = r.read_u32::<BigEndian>()? as usize;
        let mut globals = vec![0u8; globals_len];
        r.read_exact(&mut globals).map_err(|e| corrupt(e, "globals"))?;

        let link_count = r.read_u32::<BigEndian>()? as usize;
        let mut links = Vec::with_capacity(link_count.min(1 << 20));
        for _ in 0..link_count {
            links.push(Pid(r.read_u64::<BigEndian>()?));
        }

        let parent = Pid(r.read_u64::<BigEndian>()?);
        let capabilities = r.read_u32::<BigEndian>()?;
        let reductions = r.read_u64::<BigEndian>()?;
        let messages_sent = r.read_u64::<BigEndian>()?;
        let messages_received = r.read_u64::<BigEndian>()?;
        let mailbox_count = r.read_u32::<BigEndian>()?;

        Ok(Checkpoint {
            version,
            timestamp_ms,
            checkpoint_id,
            original_pid,
            name,
            globals,
            links,
            parent,
            capabilities,
            reductions,
            messages_sent,
            messages_received,
            mailbox_count,
        })
    }
}

fn read_exact_string<R: Read>(r: &mut R, len: usize) -> Result<String, CheckpointError> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| corrupt(e, "name"))?;
    String::from_utf8(buf).map_err(|e| CheckpointError::Corrupt(format!("name not valid utf-8: {e}")))
}

fn corrupt(e: io::Error, field: &str) -> CheckpointError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CheckpointError::Corrupt(format!("truncated while reading {field}"))
    } else {
        CheckpointError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Bytecode, ChunkBuilder};
    use crate::config::BlockLimits;

    fn sample() -> Checkpoint {
        Checkpoint {
            version: VERSION,
            timestamp_ms: 1234,
            checkpoint_id: 7,
            original_pid: Pid(42),
            name: Some("server".into()),
            globals: vec![1, 2, 3],
            links: vec![Pid(1), Pid(2)],
            parent: Pid(10),
            capabilities: 0b1010,
            reductions: 99,
            messages_sent: 5,
            messages_received: 3,
            mailbox_count: 2,
        }
    }

    #[test]
    fn round_trip_preserves_metadata() {
        let original = sample();
        let mut buf = Vec::new();
        original.write_to(&mut buf).unwrap();
        let decoded = Checkpoint::read_from(&buf[..]).unwrap();

        assert_eq!(decoded.original_pid, original.original_pid);
        assert_eq!(decoded.name, original.name);
        assert_eq!(decoded.links, original.links);
        assert_eq!(decoded.parent, original.parent);
        assert_eq!(decoded.capabilities, original.capabilities);
        assert_eq!(decoded.reductions, original.reductions);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = [0u8; 4];
        assert!(matches!(Checkpoint::read_from(&buf[..]), Err(CheckpointError::BadMagic)));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut original = sample();
        original.version = VERSION + 1;
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAGIC).unwrap();
        buf.write_u32::<BigEndian>(original.version).unwrap();
        assert!(matches!(
            Checkpoint::read_from(&buf[..]),
            Err(CheckpointError::UnsupportedVersion(v)) if v == VERSION + 1
        ));
    }

    #[test]
    fn truncated_data_is_corrupt_not_panic() {
        let original = sample();
        let mut buf = Vec::new();
        original.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(matches!(Checkpoint::read_from(&buf[..]), Err(CheckpointError::Corrupt(_) | CheckpointError::Io(_))));
    }

    #[test]
    fn capture_snapshots_the_block_vms_actual_globals() {
        let block = Block::new(Pid(5), None, None, BlockLimits::default());
        let code = Bytecode::new(ChunkBuilder::new().build());
        block.load(code, 100);
        block.with_vm(|vm| vm.set_global("counter", Value::Int(7)));

        let checkpoint = Checkpoint::capture(&block, 1, 0);
        assert_ne!(checkpoint.globals, Vec::<u8>::new());

        let parsed: serde_json::Value = serde_json::from_slice(&checkpoint.globals).unwrap();
        assert_eq!(parsed.get("counter").and_then(serde_json::Value::as_i64), Some(7));
    }

    #[test]
    fn capture_with_no_vm_loaded_yields_empty_globals() {
        let block = Block::new(Pid(6), None, None, BlockLimits::default());
        let checkpoint = Checkpoint::capture(&block, 1, 0);
        assert!(checkpoint.globals.is_empty());
    }

    #[test]
    fn round_trips_through_a_real_file() {
        use std::fs::File;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("block-7.ckpt");

        let original = sample();
        original.write_to(File::create(&path).unwrap()).unwrap();

        let decoded = Checkpoint::read_from(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoded.original_pid, original.original_pid);
        assert_eq!(decoded.checkpoint_id, original.checkpoint_id);
        assert_eq!(decoded.mailbox_count, original.mailbox_count);
    }
}
