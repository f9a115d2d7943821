//! Property tests for the idempotence laws of the neighbour-list and
//! capability mutators: applying the same link/monitor/grant twice must
//! leave the set identical to applying it once, and the inverse operation
//! must fully undo it regardless of how many times either was repeated.

use proptest::prelude::*;

use ream::block::Block;
use ream::capability::{self, CapabilitySet};
use ream::config::BlockLimits;
use ream::types::Pid;

fn arb_pid() -> impl Strategy<Value = Pid> {
    (1u64..1000).prop_map(Pid)
}

fn arb_capability_bits() -> impl Strategy<Value = u32> {
    (0u32..=capability::ALL)
}

proptest! {
    #[test]
    fn link_is_idempotent_under_repetition(other in arb_pid(), repeats in 1usize..10) {
        let block = Block::new(Pid(1), None, None, BlockLimits::default());
        for _ in 0..repeats {
            block.link(other);
        }
        prop_assert_eq!(block.links_snapshot(), vec![other]);
    }

    #[test]
    fn unlink_after_link_leaves_no_trace(other in arb_pid()) {
        let block = Block::new(Pid(1), None, None, BlockLimits::default());
        block.link(other);
        block.unlink(other);
        prop_assert!(block.links_snapshot().is_empty());
    }

    #[test]
    fn unlink_of_never_linked_pid_is_a_no_op(other in arb_pid()) {
        let block = Block::new(Pid(1), None, None, BlockLimits::default());
        block.unlink(other);
        prop_assert!(block.links_snapshot().is_empty());
    }

    #[test]
    fn monitor_is_idempotent_under_repetition(target in arb_pid(), repeats in 1usize..10) {
        let block = Block::new(Pid(1), None, None, BlockLimits::default());
        for _ in 0..repeats {
            block.monitor(target);
        }
        prop_assert_eq!(block.monitors_snapshot(), vec![target]);
    }

    #[test]
    fn demonitor_after_monitor_leaves_no_trace(target in arb_pid()) {
        let block = Block::new(Pid(1), None, None, BlockLimits::default());
        block.monitor(target);
        block.demonitor(target);
        prop_assert!(block.monitors_snapshot().is_empty());
    }

    #[test]
    fn grant_is_idempotent_under_repetition(bits in arb_capability_bits(), repeats in 1usize..10) {
        let caps = CapabilitySet::new(capability::NONE);
        for _ in 0..repeats {
            caps.grant(bits);
        }
        prop_assert_eq!(caps.bits(), bits);
    }

    #[test]
    fn revoke_after_grant_restores_the_original_set(base in arb_capability_bits(), extra in arb_capability_bits()) {
        let caps = CapabilitySet::new(base);
        caps.grant(extra);
        caps.revoke(extra);
        // Revoking `extra` only removes bits that grant added; any overlap
        // with `base` is gone too, so compare against base with overlap removed.
        prop_assert_eq!(caps.bits(), base & !extra);
    }

    #[test]
    fn grant_then_revoke_same_bits_is_a_no_op_on_an_empty_set(bits in arb_capability_bits()) {
        let caps = CapabilitySet::new(capability::NONE);
        caps.grant(bits);
        caps.revoke(bits);
        prop_assert_eq!(caps.bits(), capability::NONE);
    }
}
