// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cooperative scheduler.
//!
//! One iteration (`tick`) walks the task list once: any Waiting task with a
//! pending notification or an elapsed timer is dispatched immediately, and
//! otherwise the Running task with the strictly least total run time is
//! dispatched at the end of the walk. Event-driven tasks get effective
//! priority over compute-bound ones; the latter get round-robin-by-accrued-
//! time fairness.

use abi::{SyscallResult, TaskState};

use crate::counters::{count_event, KernelEvent};
use crate::hooks::Clock;
use crate::mem::region::MemoryRegion;
use crate::task::{TaskHeader, TaskRegistry, NULL_OFFSET};

/// Runs one scheduling pass. `overflow` is the sticky flag set when a
/// dispatch causes `totalRunTime` to wrap; the next `tick` rebases every
/// task's `totalRunTime` to its `lastRunTime` before doing anything else.
pub fn tick<const N: usize, const B: usize, const MAX_TASKS: usize, C: Clock>(
    kern: &mut MemoryRegion<N, B>,
    tasks: &mut TaskRegistry<MAX_TASKS>,
    clock: &C,
    overflow: &mut bool,
) -> SyscallResult<()> {
    if *overflow {
        rebase_all(kern, tasks)?;
        *overflow = false;
    }

    let mut least = u64::MAX;
    let mut candidate: Option<u32> = None;
    let mut cursor = tasks.head();
    while let Some(offset) = cursor {
        let header: TaskHeader = kern.read_payload(offset as usize)?;
        let next = header.next;

        match header.state() {
            TaskState::Waiting if header.has_pending_notification() => {
                dispatch(kern, tasks, clock, offset, overflow)?;
            }
            TaskState::Waiting
                if header.timer_period > 0
                    && clock.now().wrapping_sub(header.timer_start_time) > header.timer_period =>
            {
                dispatch(kern, tasks, clock, offset, overflow)?;
                let mut h: TaskHeader = kern.read_payload(offset as usize)?;
                h.timer_start_time = clock.now();
                kern.write_payload(offset as usize, &h)?;
            }
            TaskState::Running if header.total_run_time < least => {
                least = header.total_run_time;
                candidate = Some(offset);
            }
            _ => {}
        }

        cursor = (next != NULL_OFFSET).then_some(next);
    }

    if let Some(offset) = candidate {
        dispatch(kern, tasks, clock, offset, overflow)?;
    }
    Ok(())
}

fn dispatch<const N: usize, const B: usize, const MAX_TASKS: usize, C: Clock>(
    kern: &mut MemoryRegion<N, B>,
    tasks: &mut TaskRegistry<MAX_TASKS>,
    clock: &C,
    offset: u32,
    overflow: &mut bool,
) -> SyscallResult<()> {
    let prev_total = kern.read_payload::<TaskHeader>(offset as usize)?.total_run_time;
    let start = clock.now();

    if let Some((callback, parameter)) = tasks.callback_for(offset) {
        callback(parameter);
    }

    let mut header: TaskHeader = kern.read_payload(offset as usize)?;
    let now = clock.now();
    header.last_run_time = now.wrapping_sub(start);
    header.total_run_time = header.total_run_time.wrapping_add(header.last_run_time);
    if header.total_run_time < prev_total {
        *overflow = true;
    }
    if abi::TASK_WD_TIMER_ENABLE
        && header.wd_timer_period > 0
        && header.last_run_time > header.wd_timer_period
    {
        header.set_state(TaskState::Suspended);
        count_event(KernelEvent::TaskWatchdogTripped);
    }
    kern.write_payload(offset as usize, &header)
}

fn rebase_all<const N: usize, const B: usize, const MAX_TASKS: usize>(
    kern: &mut MemoryRegion<N, B>,
    tasks: &TaskRegistry<MAX_TASKS>,
) -> SyscallResult<()> {
    let mut cursor = tasks.head();
    while let Some(offset) = cursor {
        let mut header: TaskHeader = kern.read_payload(offset as usize)?;
        header.total_run_time = header.last_run_time;
        let next = header.next;
        kern.write_payload(offset as usize, &header)?;
        cursor = (next != NULL_OFFSET).then_some(next);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::fake::FakeClock;
    use crate::task::{TaskCallback, TaskHeader, TaskRegistry};
    use abi::TASK_NAME_BYTES;
    use core::sync::atomic::{AtomicU32, Ordering};

    type TestKern = MemoryRegion<4096, 32>;

    static RAN: AtomicU32 = AtomicU32::new(0);

    fn counting_callback(_p: usize) {
        RAN.fetch_add(1, Ordering::Relaxed);
    }

    fn make_header(name: &[u8; TASK_NAME_BYTES], state: TaskState) -> TaskHeader {
        TaskHeader {
            id: 0,
            state: state.to_u8(),
            notification_len: 0,
            _reserved0: 0,
            name: *name,
            notification_value: [0; 8],
            last_run_time: 0,
            total_run_time: 0,
            timer_period: 0,
            timer_start_time: 0,
            wd_timer_period: 0,
            next: crate::task::NULL_OFFSET,
            _reserved1: 0,
        }
    }

    fn new_task<const M: usize>(
        kern: &mut TestKern,
        tasks: &mut TaskRegistry<M>,
        name: &[u8; TASK_NAME_BYTES],
        state: TaskState,
        callback: TaskCallback,
    ) -> u32 {
        let handle = kern.alloc(core::mem::size_of::<TaskHeader>()).unwrap();
        tasks
            .link_new(kern, handle as u32, make_header(name, state), callback, 0)
            .unwrap()
    }

    #[test]
    fn running_task_with_least_total_run_time_is_dispatched() {
        let mut kern = TestKern::new();
        kern.init();
        let mut tasks: TaskRegistry<4> = TaskRegistry::new();
        let clock = FakeClock::new();
        RAN.store(0, Ordering::Relaxed);

        new_task(&mut kern, &mut tasks, b"worker1_", TaskState::Running, counting_callback);
        let mut overflow = false;
        tick(&mut kern, &mut tasks, &clock, &mut overflow).unwrap();
        assert_eq!(RAN.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn waiting_task_with_pending_notification_dispatches_immediately() {
        let mut kern = TestKern::new();
        kern.init();
        let mut tasks: TaskRegistry<4> = TaskRegistry::new();
        let clock = FakeClock::new();
        RAN.store(0, Ordering::Relaxed);

        let handle = kern.alloc(core::mem::size_of::<TaskHeader>()).unwrap();
        let mut header = make_header(b"waiter__", TaskState::Waiting);
        header.notification_len = 1;
        tasks
            .link_new(&mut kern, handle as u32, header, counting_callback, 0)
            .unwrap();

        let mut overflow = false;
        tick(&mut kern, &mut tasks, &clock, &mut overflow).unwrap();
        assert_eq!(RAN.load(Ordering::Relaxed), 1);
    }
}
