// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small cooperative, single-threaded kernel for resource-constrained
//! targets: two fixed-size memory regions (one for the kernel's own
//! objects, one for application allocations), a task registry and
//! scheduler built on top of them, and bounded queues, streams, and timers
//! as the objects tasks coordinate through.
//!
//! Everything here is generic over its own sizing -- region byte counts,
//! block size, and object-pool capacities are all const generics -- and
//! over the three things a real target provides and a host test fakes: a
//! [`hooks::Clock`], a [`hooks::CriticalSection`], and an [`hooks::AssertHook`].
//! [`DefaultKernel`] wires up the values this kernel's configuration uses
//! by default.

#![cfg_attr(not(test), no_std)]

pub mod boundary;
pub mod counters;
pub mod hooks;
pub mod mem;
pub mod queue;
pub mod sched;
pub mod stream;
pub mod system;
pub mod task;
pub mod timer;

use abi::{
    AddressKind, Message, Notification, SyscallError, SyscallResult, SystemInfo, TaskId,
    TaskInfo, TaskName, TaskRunTimeStats, TaskState, MESSAGE_VALUE_BYTES, NOTIFICATION_VALUE_BYTES,
    TASK_NAME_BYTES,
};
use zerocopy::IntoBytes;

use hooks::{AssertHook, Clock, CriticalSection, Ticks};
use mem::region::MemoryRegion;
use queue::QueueRegistry;
use stream::StreamRegistry;
use task::{TaskCallback, TaskHeader, TaskParameter, TaskRegistry};
use timer::TimerRegistry;

bitflags::bitflags! {
    /// Process-level scheduler and fault state. `MEMFAULT` mirrors a
    /// region's own sticky poison state at the kernel level: once either
    /// region poisons, the kernel sets it and it stays set until `init`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Flags: u8 {
        const RUNNING       = 0b0001;
        const OVERFLOW      = 0b0010;
        const MEMFAULT      = 0b0100;
        const LITTLE_ENDIAN = 0b1000;
    }
}

/// The kernel's default configuration: two 512-byte regions (16 blocks of
/// 32 bytes each) and small fixed object pools, suitable for the
/// microcontroller targets this is meant for.
pub type DefaultKernel<C, X, A> = Kernel<
    { abi::MEMORY_REGION_SIZE_IN_BLOCKS * abi::MEMORY_REGION_BLOCK_SIZE },
    { abi::MEMORY_REGION_SIZE_IN_BLOCKS * abi::MEMORY_REGION_BLOCK_SIZE },
    { abi::MEMORY_REGION_BLOCK_SIZE },
    8,
    4,
    4,
    4,
    C,
    X,
    A,
>;

/// A kernel instance: two memory regions, the object registries built on
/// top of them, process flags, and the injected external collaborators.
pub struct Kernel<
    const USER_N: usize,
    const KERN_N: usize,
    const BLOCK_SIZE: usize,
    const MAX_TASKS: usize,
    const MAX_QUEUES: usize,
    const MAX_STREAMS: usize,
    const MAX_TIMERS: usize,
    C: Clock,
    X: CriticalSection,
    A: AssertHook,
> {
    user: MemoryRegion<USER_N, BLOCK_SIZE>,
    kern: MemoryRegion<KERN_N, BLOCK_SIZE>,
    tasks: TaskRegistry<MAX_TASKS>,
    queues: QueueRegistry<MAX_QUEUES>,
    streams: StreamRegistry<MAX_STREAMS>,
    timers: TimerRegistry<MAX_TIMERS>,
    flags: Flags,
    clock: C,
    critical_section: X,
    assert_hook: A,
}

impl<
        const USER_N: usize,
        const KERN_N: usize,
        const BLOCK_SIZE: usize,
        const MAX_TASKS: usize,
        const MAX_QUEUES: usize,
        const MAX_STREAMS: usize,
        const MAX_TIMERS: usize,
        C: Clock,
        X: CriticalSection,
        A: AssertHook,
    > Kernel<USER_N, KERN_N, BLOCK_SIZE, MAX_TASKS, MAX_QUEUES, MAX_STREAMS, MAX_TIMERS, C, X, A>
{
    pub const fn new(clock: C, critical_section: X, assert_hook: A) -> Self {
        Self {
            user: MemoryRegion::new(),
            kern: MemoryRegion::new(),
            tasks: TaskRegistry::new(),
            queues: QueueRegistry::new(),
            streams: StreamRegistry::new(),
            timers: TimerRegistry::new(),
            flags: Flags::empty(),
            clock,
            critical_section,
            assert_hook,
        }
    }

    /// Initializes both regions, clears `overflow`/`running`/`memfault`,
    /// and records the detected byte order. Safe to call again after a
    /// fault: this is the only thing that clears the sticky `memfault` bit.
    pub fn init(&mut self) {
        self.critical_section.with(|| {
            self.user.init();
            self.kern.init();
        });
        self.flags = Flags::empty();
        if system::is_little_endian() {
            self.flags.insert(Flags::LITTLE_ENDIAN);
        }
    }

    fn assert_failed(&self, file: &'static str, line: u32) -> SyscallError {
        self.assert_hook.on_failure(file, line);
        SyscallError::PreconditionViolation
    }

    pub fn check_address(&mut self, kind: AddressKind, addr: usize) -> SyscallResult<()> {
        boundary::check(&mut self.user, &mut self.kern, kind, addr)
    }

    // ---- Task Registry & State Machine ----------------------------------

    pub fn task_create(
        &mut self,
        name: [u8; TASK_NAME_BYTES],
        callback: TaskCallback,
        parameter: TaskParameter,
    ) -> SyscallResult<u32> {
        if self.flags.contains(Flags::RUNNING) {
            return Err(self.assert_failed(file!(), line!()));
        }
        let handle = self.kern.alloc(core::mem::size_of::<TaskHeader>())?;
        let header = TaskHeader {
            id: 0,
            state: TaskState::Suspended.to_u8(),
            notification_len: 0,
            _reserved0: 0,
            name,
            notification_value: [0; NOTIFICATION_VALUE_BYTES],
            last_run_time: 0,
            total_run_time: 0,
            timer_period: 0,
            timer_start_time: self.clock.now(),
            wd_timer_period: 0,
            next: task::NULL_OFFSET,
            _reserved1: 0,
        };
        self.tasks
            .link_new(&mut self.kern, handle as u32, header, callback, parameter)
    }

    pub fn task_delete(&mut self, task: u32) -> SyscallResult<()> {
        if self.flags.contains(Flags::RUNNING) {
            return Err(self.assert_failed(file!(), line!()));
        }
        self.tasks.unlink(&mut self.kern, task)?;
        self.kern.free(task as usize)
    }

    fn task_header(&mut self, task: u32) -> SyscallResult<TaskHeader> {
        self.kern.read_payload(task as usize)
    }

    fn task_write(&mut self, task: u32, header: &TaskHeader) -> SyscallResult<()> {
        self.kern.write_payload(task as usize, header)
    }

    pub fn task_resume(&mut self, task: u32) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        header.set_state(task::transition(header.state(), task::TaskOp::Resume));
        self.task_write(task, &header)
    }

    pub fn task_suspend(&mut self, task: u32) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        header.set_state(task::transition(header.state(), task::TaskOp::Suspend));
        self.task_write(task, &header)
    }

    pub fn task_wait(&mut self, task: u32) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        header.set_state(task::transition(header.state(), task::TaskOp::Wait));
        self.task_write(task, &header)
    }

    /// Fills the mailbox only if it's currently empty; a full mailbox
    /// rejects the give rather than overwriting it.
    pub fn task_notify_give(&mut self, task: u32, bytes: u8, value: &[u8]) -> SyscallResult<()> {
        if bytes == 0 || bytes as usize > NOTIFICATION_VALUE_BYTES {
            return Err(SyscallError::InvalidArgument);
        }
        let mut header = self.task_header(task)?;
        if header.has_pending_notification() {
            return Err(SyscallError::PreconditionViolation);
        }
        let mut padded = [0u8; NOTIFICATION_VALUE_BYTES];
        let n = value.len().min(NOTIFICATION_VALUE_BYTES);
        padded[..n].copy_from_slice(&value[..n]);
        header.notification_len = bytes;
        header.notification_value = padded;
        self.task_write(task, &header)
    }

    /// Copies the mailbox out to a freshly allocated user-region
    /// notification, then clears it. Fails if the mailbox is empty.
    pub fn task_notify_take(&mut self, task: u32) -> SyscallResult<usize> {
        let mut header = self.task_header(task)?;
        if !header.has_pending_notification() {
            return Err(SyscallError::PreconditionViolation);
        }
        let notification = Notification {
            len: header.notification_len,
            value: header.notification_value,
        };
        let out = self.user.alloc(core::mem::size_of::<Notification>())?;
        self.user.write_payload(out, &notification)?;

        header.notification_len = 0;
        header.notification_value = [0; NOTIFICATION_VALUE_BYTES];
        self.task_write(task, &header)?;
        Ok(out)
    }

    /// Clears the mailbox unconditionally if non-empty. Idempotence here
    /// means calling this again (or after a `notifyTake`) errors rather
    /// than silently succeeding -- there's nothing to clear.
    pub fn task_notify_state_clear(&mut self, task: u32) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        if !header.has_pending_notification() {
            return Err(SyscallError::PreconditionViolation);
        }
        header.notification_len = 0;
        header.notification_value = [0; NOTIFICATION_VALUE_BYTES];
        self.task_write(task, &header)
    }

    pub fn task_notification_is_waiting(&mut self, task: u32) -> SyscallResult<bool> {
        Ok(self.task_header(task)?.has_pending_notification())
    }

    pub fn task_change_period(&mut self, task: u32, period: Ticks) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        header.timer_period = period;
        self.task_write(task, &header)
    }

    pub fn task_get_period(&mut self, task: u32) -> SyscallResult<Ticks> {
        Ok(self.task_header(task)?.timer_period)
    }

    pub fn task_change_wd_period(&mut self, task: u32, period: Ticks) -> SyscallResult<()> {
        let mut header = self.task_header(task)?;
        header.wd_timer_period = period;
        self.task_write(task, &header)
    }

    pub fn task_get_wd_period(&mut self, task: u32) -> SyscallResult<Ticks> {
        Ok(self.task_header(task)?.wd_timer_period)
    }

    pub fn task_reset_timer(&mut self, task: u32) -> SyscallResult<()> {
        let now = self.clock.now();
        let mut header = self.task_header(task)?;
        header.timer_start_time = now;
        self.task_write(task, &header)
    }

    pub fn task_get_handle_by_name(&mut self, name: &[u8; TASK_NAME_BYTES]) -> SyscallResult<u32> {
        self.tasks.find_by_name(&mut self.kern, name)
    }

    pub fn task_get_handle_by_id(&mut self, id: u32) -> SyscallResult<u32> {
        self.tasks.find_by_id(&mut self.kern, id)
    }

    pub fn task_get_state(&mut self, task: u32) -> SyscallResult<TaskState> {
        Ok(self.task_header(task)?.state())
    }

    pub fn task_get_name(&mut self, task: u32) -> SyscallResult<TaskName> {
        Ok(TaskName(self.task_header(task)?.name))
    }

    pub fn task_get_id(&mut self, task: u32) -> SyscallResult<TaskId> {
        Ok(TaskId(self.task_header(task)?.id))
    }

    fn task_info_of(header: &TaskHeader) -> TaskInfo {
        TaskInfo {
            id: TaskId(header.id),
            name: TaskName(header.name),
            state: header.state,
            _pad: [0; 3],
        }
    }

    /// Allocates a user-region [`TaskInfo`] snapshot for one task.
    pub fn task_get_task_info(&mut self, task: u32) -> SyscallResult<usize> {
        let info = Self::task_info_of(&self.task_header(task)?);
        let out = self.user.alloc(core::mem::size_of::<TaskInfo>())?;
        self.user.write_payload(out, &info)?;
        Ok(out)
    }

    /// Allocates a user-region array of [`TaskInfo`], one per task, in
    /// registry order.
    pub fn task_get_all_task_info(&mut self) -> SyscallResult<(usize, usize)> {
        let count = self.tasks.len();
        if count == 0 {
            return Err(SyscallError::NotFound);
        }
        let out = self.user.alloc(count * core::mem::size_of::<TaskInfo>())?;
        let mut cursor = self.tasks.head();
        let mut i = 0usize;
        while let Some(offset) = cursor {
            let header: TaskHeader = self.kern.read_payload(offset as usize)?;
            let info = Self::task_info_of(&header);
            let dst = &mut self.user.payload_mut(out)?
                [i * core::mem::size_of::<TaskInfo>()..(i + 1) * core::mem::size_of::<TaskInfo>()];
            dst.copy_from_slice(info.as_bytes());
            cursor = (header.next != task::NULL_OFFSET).then_some(header.next);
            i += 1;
        }
        Ok((out, count))
    }

    pub fn task_get_run_time_stats(&mut self, task: u32) -> SyscallResult<usize> {
        let header = self.task_header(task)?;
        let stats = TaskRunTimeStats {
            id: TaskId(header.id),
            last_run_time: header.last_run_time,
            total_run_time: header.total_run_time,
        };
        let out = self.user.alloc(core::mem::size_of::<TaskRunTimeStats>())?;
        self.user.write_payload(out, &stats)?;
        Ok(out)
    }

    pub fn task_get_all_run_time_stats(&mut self) -> SyscallResult<(usize, usize)> {
        let count = self.tasks.len();
        if count == 0 {
            return Err(SyscallError::NotFound);
        }
        let out = self
            .user
            .alloc(count * core::mem::size_of::<TaskRunTimeStats>())?;
        let mut cursor = self.tasks.head();
        let mut i = 0usize;
        while let Some(offset) = cursor {
            let header: TaskHeader = self.kern.read_payload(offset as usize)?;
            let stats = TaskRunTimeStats {
                id: TaskId(header.id),
                last_run_time: header.last_run_time,
                total_run_time: header.total_run_time,
            };
            let size = core::mem::size_of::<TaskRunTimeStats>();
            let dst = &mut self.user.payload_mut(out)?[i * size..(i + 1) * size];
            dst.copy_from_slice(stats.as_bytes());
            cursor = (header.next != task::NULL_OFFSET).then_some(header.next);
            i += 1;
        }
        Ok((out, count))
    }

    pub fn task_get_number_of_tasks(&self) -> usize {
        self.tasks.len()
    }

    // ---- Scheduler -------------------------------------------------------

    pub fn start_scheduler(&mut self) -> SyscallResult<()> {
        if self.flags.contains(Flags::RUNNING) {
            counters::count_event(counters::KernelEvent::SchedulerReentrancyRejected);
            return Err(SyscallError::PreconditionViolation);
        }
        self.flags.insert(Flags::RUNNING);
        while self.flags.contains(Flags::RUNNING) {
            self.tick_once()?;
        }
        Ok(())
    }

    /// Runs exactly one scheduling pass, regardless of `running`. Exposed
    /// for callers stepping the scheduler themselves (simulation, test
    /// harnesses) instead of driving it through `start_scheduler`'s loop.
    pub fn tick_once(&mut self) -> SyscallResult<()> {
        let mut overflow = self.flags.contains(Flags::OVERFLOW);
        sched::tick(&mut self.kern, &mut self.tasks, &self.clock, &mut overflow)?;
        self.flags.set(Flags::OVERFLOW, overflow);
        Ok(())
    }

    pub fn suspend_all(&mut self) {
        self.flags.remove(Flags::RUNNING);
    }

    pub fn resume_all(&mut self) {
        self.flags.insert(Flags::RUNNING);
    }

    // ---- Queue -------------------------------------------------------------

    pub fn queue_create(&mut self, limit: u32) -> SyscallResult<u32> {
        self.queues.create(&mut self.kern, limit)
    }

    pub fn queue_delete(&mut self, queue: u32) -> SyscallResult<()> {
        self.queues.delete(&mut self.kern, queue)
    }

    pub fn queue_send(&mut self, queue: u32, bytes: u8, value: &[u8]) -> SyscallResult<()> {
        queue::send(&mut self.kern, queue, bytes, value)
    }

    pub fn queue_peek(&mut self, queue: u32) -> SyscallResult<Message> {
        queue::peek(&mut self.kern, queue)
    }

    pub fn queue_drop(&mut self, queue: u32) -> SyscallResult<()> {
        queue::drop_head(&mut self.kern, queue)
    }

    pub fn queue_receive(&mut self, queue: u32) -> SyscallResult<Message> {
        queue::receive(&mut self.kern, queue)
    }

    pub fn queue_get_length(&mut self, queue: u32) -> SyscallResult<u32> {
        queue::get_length(&mut self.kern, queue)
    }

    pub fn queue_is_empty(&mut self, queue: u32) -> SyscallResult<bool> {
        queue::is_empty(&mut self.kern, queue)
    }

    pub fn queue_is_full(&mut self, queue: u32) -> SyscallResult<bool> {
        queue::is_full(&mut self.kern, queue)
    }

    pub fn queue_messages_waiting(&mut self, queue: u32) -> SyscallResult<bool> {
        queue::messages_waiting(&mut self.kern, queue)
    }

    pub fn queue_lock(&mut self, queue: u32) -> SyscallResult<()> {
        queue::lock(&mut self.kern, queue)
    }

    pub fn queue_unlock(&mut self, queue: u32) -> SyscallResult<()> {
        queue::unlock(&mut self.kern, queue)
    }

    // ---- Stream --------------------------------------------------------

    pub fn stream_create(&mut self) -> SyscallResult<u32> {
        self.streams.create(&mut self.kern)
    }

    pub fn stream_delete(&mut self, stream: u32) -> SyscallResult<()> {
        self.streams.delete(&mut self.kern, stream)
    }

    pub fn stream_send(&mut self, stream: u32, byte: u8) -> SyscallResult<()> {
        stream::send(&mut self.kern, stream, byte)
    }

    pub fn stream_receive(&mut self, stream: u32) -> SyscallResult<usize> {
        stream::receive(&mut self.kern, &mut self.user, stream)
    }

    pub fn stream_bytes_available(&mut self, stream: u32) -> SyscallResult<u32> {
        stream::bytes_available(&mut self.kern, stream)
    }

    pub fn stream_reset(&mut self, stream: u32) -> SyscallResult<()> {
        stream::reset(&mut self.kern, stream)
    }

    pub fn stream_is_empty(&mut self, stream: u32) -> SyscallResult<bool> {
        stream::is_empty(&mut self.kern, stream)
    }

    pub fn stream_is_full(&mut self, stream: u32) -> SyscallResult<bool> {
        stream::is_full(&mut self.kern, stream)
    }

    // ---- Application Timer ---------------------------------------------

    pub fn timer_create(&mut self, period: Ticks) -> SyscallResult<u32> {
        let now = self.clock.now();
        self.timers.create(&mut self.kern, period, now)
    }

    pub fn timer_delete(&mut self, timer: u32) -> SyscallResult<()> {
        self.timers.delete(&mut self.kern, timer)
    }

    pub fn timer_start(&mut self, timer: u32) -> SyscallResult<()> {
        let now = self.clock.now();
        timer::start(&mut self.kern, timer, now)
    }

    pub fn timer_stop(&mut self, timer: u32) -> SyscallResult<()> {
        timer::stop(&mut self.kern, timer)
    }

    pub fn timer_reset(&mut self, timer: u32) -> SyscallResult<()> {
        let now = self.clock.now();
        timer::reset(&mut self.kern, timer, now)
    }

    pub fn timer_has_expired(&mut self, timer: u32) -> SyscallResult<bool> {
        let now = self.clock.now();
        timer::has_expired(&mut self.kern, timer, now)
    }

    pub fn timer_is_active(&mut self, timer: u32) -> SyscallResult<bool> {
        timer::is_active(&mut self.kern, timer)
    }

    pub fn timer_get_period(&mut self, timer: u32) -> SyscallResult<Ticks> {
        timer::get_period(&mut self.kern, timer)
    }

    pub fn timer_change_period(&mut self, timer: u32, period: Ticks) -> SyscallResult<()> {
        timer::change_period(&mut self.kern, timer, period)
    }

    // ---- System ----------------------------------------------------------

    /// Allocates a user-region [`SystemInfo`] snapshot.
    pub fn get_system_info(&mut self) -> SyscallResult<usize> {
        let info = system::system_info(self.tasks.len() as u32);
        let out = self.user.alloc(core::mem::size_of::<SystemInfo>())?;
        self.user.write_payload(out, &info)?;
        Ok(out)
    }

    pub fn halt(&self) -> ! {
        system::halt(&self.critical_section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hooks::fake::{CountingAssertHook, FakeClock, FakeCriticalSection};

    type TestKernel = Kernel<512, 512, 32, 4, 2, 2, 2, FakeClock, FakeCriticalSection, CountingAssertHook>;

    fn fresh() -> TestKernel {
        let mut k = TestKernel::new(FakeClock::new(), FakeCriticalSection, CountingAssertHook::default());
        k.init();
        k
    }

    fn noop(_p: usize) {}

    #[test]
    fn create_task_then_resume_runs_it_under_the_scheduler() {
        let mut k = fresh();
        let h = k.task_create(*b"worker__", noop, 0).unwrap();
        assert_eq!(k.task_get_state(h).unwrap(), TaskState::Suspended);
        k.task_resume(h).unwrap();
        assert_eq!(k.task_get_state(h).unwrap(), TaskState::Running);
    }

    #[test]
    fn task_create_rejected_while_scheduler_running() {
        let mut k = fresh();
        let h = k.task_create(*b"worker__", noop, 0).unwrap();
        k.task_resume(h).unwrap();
        k.flags.insert(Flags::RUNNING);
        assert!(k.task_create(*b"worker2_", noop, 0).is_err());
        k.flags.remove(Flags::RUNNING);
    }

    #[test]
    fn notify_give_then_take_round_trips_the_value() {
        let mut k = fresh();
        let h = k.task_create(*b"waiter__", noop, 0).unwrap();
        k.task_notify_give(h, 3, b"abc").unwrap();
        let out = k.task_notify_take(h).unwrap();
        let n: Notification = k.user.read_payload(out).unwrap();
        assert_eq!(n.as_slice(), b"abc");
        assert!(k.task_notify_take(h).is_err());
    }

    #[test]
    fn get_system_info_reports_task_count() {
        let mut k = fresh();
        k.task_create(*b"a_______", noop, 0).unwrap();
        k.task_create(*b"b_______", noop, 0).unwrap();
        let out = k.get_system_info().unwrap();
        let info: SystemInfo = k.user.read_payload(out).unwrap();
        assert_eq!(info.number_of_tasks, 2);
        assert_eq!(&info.product_name, b"HeliOS");
    }

    #[test]
    fn queue_and_stream_and_timer_lifecycle_through_the_kernel() {
        let mut k = fresh();
        let q = k.queue_create(5).unwrap();
        k.queue_send(q, 1, &[7]).unwrap();
        assert_eq!(k.queue_get_length(q).unwrap(), 1);
        assert_eq!(k.queue_receive(q).unwrap().as_slice(), &[7]);

        let s = k.stream_create().unwrap();
        k.stream_send(s, b'x').unwrap();
        let out = k.stream_receive(s).unwrap();
        assert_eq!(&k.user.payload(out).unwrap()[..1], b"x");

        let t = k.timer_create(5).unwrap();
        k.timer_start(t).unwrap();
        assert!(k.timer_is_active(t).unwrap());
    }

    #[test]
    fn start_scheduler_rejects_reentry() {
        let mut k = fresh();
        k.flags.insert(Flags::RUNNING);
        assert!(k.start_scheduler().is_err());
        k.flags.remove(Flags::RUNNING);
    }
}
