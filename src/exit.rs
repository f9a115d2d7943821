//! Exit propagation: supervisor notification, link fan-out, monitor fan-out (§4.5)

use std::sync::Arc;

use tracing::trace;

use crate::block::Block;
use crate::scheduler::Scheduler;
use crate::types::{ExitKind, Pid};
use crate::value::{down_message, exit_message};

/// Runs the full exit-propagation fan-out for a block that just transitioned
/// to `DEAD`. Called from whichever thread observed the termination, which
/// may be any worker (§4.7 Implementation note on exit propagation).
pub fn propagate(scheduler: &Arc<Scheduler>, pid: Pid, block: &Arc<Block>) {
    let Some(info) = block.exit_info() else { return };
    let kind = info.kind();

    notify_supervisor(scheduler, pid, block, kind, info.code, info.reason.as_deref());
    propagate_links(scheduler, pid, kind, info.code, info.reason.as_deref());
    notify_monitors(scheduler, pid, kind, info.code, info.reason.as_deref());
}

fn notify_supervisor(
    scheduler: &Arc<Scheduler>,
    pid: Pid,
    block: &Arc<Block>,
    kind: ExitKind,
    code: i32,
    reason: Option<&str>,
) {
    let Some(parent_pid) = block.parent() else { return };
    if scheduler.get_block(parent_pid).is_none() {
        return;
    }
    // The core treats the supervisor's restart decision as opaque (§4.5
    // step 1); this crate does not ship a concrete supervisor, only the
    // collaborator interface in `supervisor.rs`.
    trace!(%pid, %parent_pid, ?kind, code, ?reason, "supervisor notified of exit");
}

fn propagate_links(scheduler: &Arc<Scheduler>, pid: Pid, kind: ExitKind, code: i32, reason: Option<&str>) {
    let Some(dying) = scheduler.get_block(pid) else { return };
    for linked_pid in dying.links_snapshot() {
        let Some(linked) = scheduler.get_block(linked_pid) else { continue };
        if !linked.is_alive() {
            continue;
        }

        // Remove the back-link before doing anything else so a recursive
        // crash cascade through a cycle terminates (§9 Cycles).
        linked.remove_link(pid);

        if linked.capabilities().has(crate::capability::TRAP_EXIT) {
            let message = exit_message(pid, code, reason);
            if linked.deliver(pid, message) == crate::types::SendResult::Ok {
                scheduler.wake_block(linked_pid);
            }
            continue;
        }

        if kind == ExitKind::Crash {
            linked.crash(format!("linked process {pid} crashed"));
            propagate(scheduler, linked_pid, &linked);
        }
        // Normal exits deliver nothing to non-trapping links, matching
        // Erlang's default link contract.
    }
}

fn notify_monitors(scheduler: &Arc<Scheduler>, pid: Pid, _kind: ExitKind, code: i32, reason: Option<&str>) {
    let Some(dying) = scheduler.get_block(pid) else { return };
    for watcher_pid in dying.monitored_by_snapshot() {
        let Some(watcher) = scheduler.get_block(watcher_pid) else { continue };
        watcher.demonitor(pid);
        let message = down_message(pid, code, reason);
        if watcher.deliver(pid, message) == crate::types::SendResult::Ok {
            scheduler.wake_block(watcher_pid);
        }
    }
}
