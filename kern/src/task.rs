// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task records and the registry that owns them.
//!
//! Every task's scheduling-relevant fields live in a [`TaskHeader`] stored
//! in the kernel region, addressed by the offset `alloc` returned for it --
//! that offset IS the task's handle, matching the GLOSSARY's definition of
//! "Handle: an address returned by a create-type syscall". The one field
//! that can't be stored that way is the callback: a `void*`-style function
//! pointer is representable as plain bytes in C, but a Rust function item
//! plus its closed-over capability isn't something `zerocopy` can validate
//! for arbitrary bit patterns. Callbacks instead live in a fixed-capacity
//! side table inside [`TaskRegistry`], indexed by linear scan over the same
//! handle -- keeping the lookup cost in the same O(n) ballpark as everything
//! else here.

use abi::{SyscallError, SyscallResult, TaskState, NOTIFICATION_VALUE_BYTES, TASK_NAME_BYTES};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::mem::region::MemoryRegion;

pub const NULL_OFFSET: u32 = u32::MAX;

/// The opaque capability a task's callback receives. The kernel never
/// interprets this value; it's the application's to assign meaning to.
pub type TaskParameter = usize;

/// A task's work function. Re-expression of the original's
/// `void (*)(void *)`: a plain function item rather than a boxed closure, to
/// keep tasks free of heap allocation.
pub type TaskCallback = fn(TaskParameter);

/// On-disk (in kernel-region) shape of a task record.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TaskHeader {
    pub id: u32,
    pub state: u8,
    pub notification_len: u8,
    pub _reserved0: u16,
    pub name: [u8; TASK_NAME_BYTES],
    pub notification_value: [u8; NOTIFICATION_VALUE_BYTES],
    pub last_run_time: u64,
    pub total_run_time: u64,
    pub timer_period: u64,
    pub timer_start_time: u64,
    pub wd_timer_period: u64,
    pub next: u32,
    pub _reserved1: u32,
}

impl TaskHeader {
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state).unwrap_or(TaskState::Suspended)
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.state = state.to_u8();
    }

    pub fn has_pending_notification(&self) -> bool {
        self.notification_len > 0
    }
}

/// One callback binding: which task handle it belongs to, and the function
/// plus parameter to invoke.
#[derive(Copy, Clone)]
struct CallbackSlot {
    handle: u32,
    callback: TaskCallback,
    parameter: TaskParameter,
}

/// Task registry: the intrusive, address-ordered linked list of
/// [`TaskHeader`]s lives in the kernel region; this struct holds the list's
/// entry/exit points, the monotonic id counter, and the callback side
/// table.
pub struct TaskRegistry<const MAX_TASKS: usize> {
    next_id: u32,
    length: usize,
    head: u32,
    tail: u32,
    callbacks: [Option<CallbackSlot>; MAX_TASKS],
}

impl<const MAX_TASKS: usize> TaskRegistry<MAX_TASKS> {
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            length: 0,
            head: NULL_OFFSET,
            tail: NULL_OFFSET,
            callbacks: [None; MAX_TASKS],
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn head(&self) -> Option<u32> {
        (self.head != NULL_OFFSET).then_some(self.head)
    }

    fn callback_slot(&self, handle: u32) -> Option<usize> {
        self.callbacks
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.handle == handle))
    }

    fn free_slot(&self) -> Option<usize> {
        self.callbacks.iter().position(|slot| slot.is_none())
    }

    pub fn callback_for(&self, handle: u32) -> Option<(TaskCallback, TaskParameter)> {
        self.callback_slot(handle)
            .and_then(|i| self.callbacks[i])
            .map(|s| (s.callback, s.parameter))
    }

    /// Insert a new task header at the tail of the kernel-region list and
    /// bind its callback. `kern` must already hold `header` allocated at
    /// `handle`.
    pub fn link_new<const N: usize, const B: usize>(
        &mut self,
        kern: &mut MemoryRegion<N, B>,
        handle: u32,
        mut header: TaskHeader,
        callback: TaskCallback,
        parameter: TaskParameter,
    ) -> SyscallResult<u32> {
        let slot = self.free_slot().ok_or(SyscallError::ResourceExhaustion)?;

        self.next_id += 1;
        header.id = self.next_id;
        header.next = NULL_OFFSET;
        kern.write_payload(handle as usize, &header)?;

        if self.tail == NULL_OFFSET {
            self.head = handle;
        } else {
            let mut tail_header: TaskHeader = kern.read_payload(self.tail as usize)?;
            tail_header.next = handle;
            kern.write_payload(self.tail as usize, &tail_header)?;
        }
        self.tail = handle;
        self.length += 1;
        self.callbacks[slot] = Some(CallbackSlot {
            handle,
            callback,
            parameter,
        });

        Ok(handle)
    }

    /// Remove a task from the list, reclaiming its callback slot. Does not
    /// free the kernel-region allocation; the caller does that once it has
    /// the header in hand.
    pub fn unlink<const N: usize, const B: usize>(
        &mut self,
        kern: &mut MemoryRegion<N, B>,
        handle: u32,
    ) -> SyscallResult<TaskHeader> {
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: TaskHeader = kern.read_payload(cursor as usize)?;
            if cursor == handle {
                match prev {
                    Some(p) => {
                        let mut prev_header: TaskHeader = kern.read_payload(p as usize)?;
                        prev_header.next = header.next;
                        kern.write_payload(p as usize, &prev_header)?;
                    }
                    None => self.head = header.next,
                }
                if self.tail == handle {
                    self.tail = prev.unwrap_or(NULL_OFFSET);
                }
                self.length -= 1;
                if let Some(i) = self.callback_slot(handle) {
                    self.callbacks[i] = None;
                }
                return Ok(header);
            }
            prev = Some(cursor);
            cursor = header.next;
        }
        Err(SyscallError::NotFound)
    }

    /// Find a task's handle by name. O(n) over the list, as the design's
    /// everything-else is.
    pub fn find_by_name<const N: usize, const B: usize>(
        &self,
        kern: &mut MemoryRegion<N, B>,
        name: &[u8; TASK_NAME_BYTES],
    ) -> SyscallResult<u32> {
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: TaskHeader = kern.read_payload(cursor as usize)?;
            if &header.name == name {
                return Ok(cursor);
            }
            cursor = header.next;
        }
        Err(SyscallError::NotFound)
    }

    pub fn find_by_id<const N: usize, const B: usize>(
        &self,
        kern: &mut MemoryRegion<N, B>,
        id: u32,
    ) -> SyscallResult<u32> {
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: TaskHeader = kern.read_payload(cursor as usize)?;
            if header.id == id {
                return Ok(cursor);
            }
            cursor = header.next;
        }
        Err(SyscallError::NotFound)
    }
}

impl<const MAX_TASKS: usize> Default for TaskRegistry<MAX_TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

/// State machine transitions from §4.3. Pure function of current state and
/// requested transition; callers apply the result to the stored header.
pub fn transition(current: TaskState, op: TaskOp) -> TaskState {
    match op {
        TaskOp::Resume => TaskState::Running,
        TaskOp::Suspend => TaskState::Suspended,
        TaskOp::Wait => TaskState::Waiting,
        // `notifyGive` never changes a Suspended task's state: the mailbox
        // fills, but nothing dispatches it.
        TaskOp::NotifyGiveFired => current,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskOp {
    Resume,
    Suspend,
    Wait,
    NotifyGiveFired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_always_yields_running() {
        for from in [TaskState::Suspended, TaskState::Running, TaskState::Waiting] {
            assert_eq!(transition(from, TaskOp::Resume), TaskState::Running);
        }
    }

    #[test]
    fn notify_give_never_changes_state() {
        for from in [TaskState::Suspended, TaskState::Running, TaskState::Waiting] {
            assert_eq!(transition(from, TaskOp::NotifyGiveFired), from);
        }
    }
}
