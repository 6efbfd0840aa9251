// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared ABI between the kernel and its callers: compile-time configuration,
//! the error taxonomy, and the small wire types that cross the syscall
//! boundary.
//!
//! Nothing in this crate is specific to the kernel's internal layout; it's
//! the contract both sides agree on.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Number of blocks in each memory region.
pub const MEMORY_REGION_SIZE_IN_BLOCKS: usize = 16;
/// Size in bytes of one allocator block.
pub const MEMORY_REGION_BLOCK_SIZE: usize = 32;
/// Fixed width, in bytes, of a task name.
pub const TASK_NAME_BYTES: usize = 8;
/// Fixed width, in bytes, of a queue message value.
pub const MESSAGE_VALUE_BYTES: usize = 8;
/// Fixed width, in bytes, of a direct notification value.
pub const NOTIFICATION_VALUE_BYTES: usize = 8;
/// Smallest queue capacity a caller may request.
pub const QUEUE_MINIMUM_LIMIT: usize = 5;
/// Capacity, in bytes, of a stream buffer.
pub const STREAM_BUFFER_BYTES: usize = 32;
/// Fixed width, in bytes, of a device name.
pub const DEVICE_NAME_BYTES: usize = 8;

/// Whether the scheduler enforces per-task watchdog deadlines. Compiled in by
/// default; disable with `--no-default-features` on `kern`.
pub const TASK_WD_TIMER_ENABLE: bool = cfg!(feature = "watchdog");

/// Product name surfaced by `getSystemInfo`, fixed at six ASCII bytes.
pub const PRODUCT_NAME: [u8; 6] = *b"HeliOS";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_PATCH: u8 = 0;

/// The kernel's single-discriminator error taxonomy.
///
/// Deliberately flat: the reason a syscall failed is not part of the ABI,
/// only whether it did. Implementations may additionally invoke an assert
/// hook for diagnostics, but callers must not branch on anything but the
/// variant here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SyscallError {
    /// Null pointer where one was required, zero/out-of-range size, a name
    /// that's absent, a limit below the configured minimum, and similar
    /// caller mistakes.
    InvalidArgument,
    /// The allocator's internal invariants failed a check. This is terminal:
    /// the region is poisoned for the remainder of the program.
    InvariantViolation,
    /// The call's precondition wasn't met: creating or deleting a task while
    /// the scheduler is running, starting a running timer, peeking an empty
    /// queue, and so on.
    PreconditionViolation,
    /// A handle-by-name or handle-by-id lookup found nothing.
    NotFound,
    /// The allocator has no free entry large enough to serve the request.
    ResourceExhaustion,
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SyscallError::InvalidArgument => "invalid argument",
            SyscallError::InvariantViolation => "invariant violation",
            SyscallError::PreconditionViolation => "precondition violation",
            SyscallError::NotFound => "not found",
            SyscallError::ResourceExhaustion => "resource exhaustion",
        };
        f.write_str(s)
    }
}

impl core::error::Error for SyscallError {}

/// Result alias used throughout the syscall surface: `Result<T, E>` already
/// decouples success/failure from value delivery, which is what the
/// out-parameter convention of a C ABI is working around.
pub type SyscallResult<T> = Result<T, SyscallError>;

/// A task's scheduling state.
///
/// Not `FromBytes`/`IntoBytes`: a 3-variant enum doesn't cover every bit
/// pattern of its `u8` repr, so it can't soundly overlay raw memory.
/// Kernel-region storage keeps this packed as a validated discriminant byte
/// instead (see `kern::task::TaskHeader`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum TaskState {
    Suspended = 0,
    Running = 1,
    Waiting = 2,
}

impl TaskState {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TaskState::Suspended),
            1 => Some(TaskState::Running),
            2 => Some(TaskState::Waiting),
            _ => None,
        }
    }
}

/// A task's numeric identity. Monotonically assigned, never reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(transparent)]
pub struct TaskId(pub u32);

/// Fixed-width task name, caller-padded.
#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct TaskName(pub [u8; TASK_NAME_BYTES]);

impl core::fmt::Debug for TaskName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        match core::str::from_utf8(&self.0[..end]) {
            Ok(s) => f.debug_tuple("TaskName").field(&s).finish(),
            Err(_) => f.debug_tuple("TaskName").field(&&self.0[..]).finish(),
        }
    }
}

/// A direct-notification or queue-message payload: up to its configured
/// width, with an explicit length.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Bytes<const N: usize> {
    pub len: u8,
    pub value: [u8; N],
}

impl<const N: usize> Bytes<N> {
    pub const fn empty() -> Self {
        Self { len: 0, value: [0; N] }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.value[..self.len as usize]
    }
}

pub type Notification = Bytes<NOTIFICATION_VALUE_BYTES>;
pub type Message = Bytes<MESSAGE_VALUE_BYTES>;

/// Snapshot returned by `getSystemInfo`, allocated in the user region so the
/// caller owns and frees it.
///
/// `little_endian` is `0`/`1` rather than `bool`: `bool` isn't valid for
/// arbitrary bytes, so it can't soundly derive `FromBytes`.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SystemInfo {
    pub product_name: [u8; 6],
    pub major_version: u8,
    pub minor_version: u8,
    pub patch_version: u8,
    pub little_endian: u8,
    pub number_of_tasks: u32,
}

/// Snapshot of one task's identity and scheduling state.
///
/// `state` is the raw [`TaskState`] discriminant; use
/// [`TaskState::from_u8`] to interpret it. See the note on `TaskState`
/// for why the enum itself isn't stored directly.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: TaskName,
    pub state: u8,
    pub _pad: [u8; 3],
}

/// Snapshot of one task's runtime accounting.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TaskRunTimeStats {
    pub id: TaskId,
    pub last_run_time: u64,
    pub total_run_time: u64,
}

/// Which memory region an address claims to belong to. The syscall boundary
/// checker uses this to pick which region's `check` to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AddressKind {
    /// Returned by `alloc` against the user region: device buffers, queue
    /// and notification values, config buffers.
    UserPointer,
    /// Returned by a create-type syscall (`TaskCreate`, `QueueCreate`, ...);
    /// always resides in the kernel region.
    Handle,
}

/// Minimum acceptable alignment-in-blocks option for [`crate::SyscallError`]-free
/// region checks. Mirrors the two check modes from the allocator design.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CheckOption {
    /// Walk the region and validate structure only.
    WithoutAddr,
    /// Additionally require that a specific address names an INUSE entry.
    WithAddr,
}
