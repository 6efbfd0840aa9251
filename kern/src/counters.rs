// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel event counters.
//!
//! A no_std kernel with no allocator for format strings has no business
//! reaching for a logging framework. Instead every notable kernel event
//! increments one atomic; a debugger (or a host test) reads the counts
//! directly, with no formatting or buffering overhead and no possibility of
//! losing an event to a full log buffer.

use core::sync::atomic::{AtomicU32, Ordering};

use counters::Count;

/// Kernel events worth counting. Each variant gets its own saturating
/// counter; see [`KernelCounters`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KernelEvent {
    /// An allocator `check` found a corrupted entry; the region is now
    /// poisoned.
    AllocatorCorruptionDetected,
    /// `alloc` found no free entry large enough.
    AllocationFailed,
    /// `alloc` succeeded.
    AllocationSucceeded,
    /// A task's `lastRunTime` exceeded its watchdog period.
    TaskWatchdogTripped,
    /// `startScheduler` was called while the scheduler was already running.
    SchedulerReentrancyRejected,
    /// A queue `send` was rejected (locked or full).
    QueueSendRejected,
    /// A queue's walked length disagreed with its stored length.
    QueueSelfAuditFailed,
}

/// One counter per [`KernelEvent`] variant.
#[derive(Debug, Default)]
pub struct KernelCounters {
    pub allocator_corruption_detected: AtomicU32,
    pub allocation_failed: AtomicU32,
    pub allocation_succeeded: AtomicU32,
    pub task_watchdog_tripped: AtomicU32,
    pub scheduler_reentrancy_rejected: AtomicU32,
    pub queue_send_rejected: AtomicU32,
    pub queue_self_audit_failed: AtomicU32,
}

impl Count for KernelEvent {
    type Counters = KernelCounters;

    const NEW_COUNTERS: Self::Counters = KernelCounters {
        allocator_corruption_detected: AtomicU32::new(0),
        allocation_failed: AtomicU32::new(0),
        allocation_succeeded: AtomicU32::new(0),
        task_watchdog_tripped: AtomicU32::new(0),
        scheduler_reentrancy_rejected: AtomicU32::new(0),
        queue_send_rejected: AtomicU32::new(0),
        queue_self_audit_failed: AtomicU32::new(0),
    };

    fn count(&self, counters: &Self::Counters) {
        let slot = match self {
            KernelEvent::AllocatorCorruptionDetected => {
                &counters.allocator_corruption_detected
            }
            KernelEvent::AllocationFailed => &counters.allocation_failed,
            KernelEvent::AllocationSucceeded => &counters.allocation_succeeded,
            KernelEvent::TaskWatchdogTripped => &counters.task_watchdog_tripped,
            KernelEvent::SchedulerReentrancyRejected => {
                &counters.scheduler_reentrancy_rejected
            }
            KernelEvent::QueueSendRejected => &counters.queue_send_rejected,
            KernelEvent::QueueSelfAuditFailed => &counters.queue_self_audit_failed,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }
}

counters::counters!(KERNEL_COUNTERS, KernelEvent);

/// Record one kernel event.
pub fn count_event(event: KernelEvent) {
    counters::count!(KERNEL_COUNTERS, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn counting_an_event_increments_its_slot() {
        let before = KERNEL_COUNTERS.allocation_succeeded.load(Ordering::Relaxed);
        count_event(KernelEvent::AllocationSucceeded);
        let after = KERNEL_COUNTERS.allocation_succeeded.load(Ordering::Relaxed);
        assert_eq!(after, before + 1);
    }
}
