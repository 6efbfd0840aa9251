// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application timers: standalone periodic timers, independent of a task's
//! own per-task timer fields.

use abi::{SyscallError, SyscallResult};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::hooks::Ticks;
use crate::mem::region::MemoryRegion;

pub const NULL_OFFSET: u32 = u32::MAX;

const SUSPENDED: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TimerHeader {
    pub id: u32,
    pub state: u8,
    pub _pad: [u8; 3],
    pub period: u64,
    pub start_time: u64,
    pub next: u32,
    pub _pad2: u32,
}

pub struct TimerRegistry<const MAX_TIMERS: usize> {
    next_id: u32,
    length: usize,
    head: u32,
    tail: u32,
    _marker: core::marker::PhantomData<[(); MAX_TIMERS]>,
}

impl<const MAX_TIMERS: usize> TimerRegistry<MAX_TIMERS> {
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            length: 0,
            head: NULL_OFFSET,
            tail: NULL_OFFSET,
            _marker: core::marker::PhantomData,
        }
    }

    pub fn create<const N: usize, const B: usize>(
        &mut self,
        kern: &mut MemoryRegion<N, B>,
        period: Ticks,
        now: Ticks,
    ) -> SyscallResult<u32> {
        if self.length >= MAX_TIMERS {
            return Err(SyscallError::ResourceExhaustion);
        }
        let offset = kern.alloc(core::mem::size_of::<TimerHeader>())?;
        self.next_id += 1;
        let header = TimerHeader {
            id: self.next_id,
            state: SUSPENDED,
            _pad: [0; 3],
            period,
            start_time: now,
            next: NULL_OFFSET,
            _pad2: 0,
        };
        kern.write_payload(offset as usize, &header)?;
        if self.tail == NULL_OFFSET {
            self.head = offset as u32;
        } else {
            let mut prev: TimerHeader = kern.read_payload(self.tail as usize)?;
            prev.next = offset as u32;
            kern.write_payload(self.tail as usize, &prev)?;
        }
        self.tail = offset as u32;
        self.length += 1;
        Ok(offset as u32)
    }

    pub fn delete<const N: usize, const B: usize>(
        &mut self,
        kern: &mut MemoryRegion<N, B>,
        timer: u32,
    ) -> SyscallResult<()> {
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: TimerHeader = kern.read_payload(cursor as usize)?;
            if cursor == timer {
                match prev {
                    Some(p) => {
                        let mut prev_header: TimerHeader = kern.read_payload(p as usize)?;
                        prev_header.next = header.next;
                        kern.write_payload(p as usize, &prev_header)?;
                    }
                    None => self.head = header.next,
                }
                if self.tail == timer {
                    self.tail = prev.unwrap_or(NULL_OFFSET);
                }
                self.length -= 1;
                kern.free(cursor as usize)?;
                return Ok(());
            }
            prev = Some(cursor);
            cursor = header.next;
        }
        Err(SyscallError::NotFound)
    }
}

impl<const MAX_TIMERS: usize> Default for TimerRegistry<MAX_TIMERS> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn start<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
    now: Ticks,
) -> SyscallResult<()> {
    let mut header: TimerHeader = kern.read_payload(timer as usize)?;
    if header.state != SUSPENDED {
        return Err(SyscallError::PreconditionViolation);
    }
    header.state = RUNNING;
    header.start_time = now;
    kern.write_payload(timer as usize, &header)
}

pub fn stop<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
) -> SyscallResult<()> {
    let mut header: TimerHeader = kern.read_payload(timer as usize)?;
    if header.state != RUNNING {
        return Err(SyscallError::PreconditionViolation);
    }
    header.state = SUSPENDED;
    kern.write_payload(timer as usize, &header)
}

pub fn reset<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
    now: Ticks,
) -> SyscallResult<()> {
    let mut header: TimerHeader = kern.read_payload(timer as usize)?;
    header.start_time = now;
    kern.write_payload(timer as usize, &header)
}

/// Valid only for a Running timer. True once `now - startTime > period`,
/// and only if `period > 0` (a zero-period timer never expires).
pub fn has_expired<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
    now: Ticks,
) -> SyscallResult<bool> {
    let header: TimerHeader = kern.read_payload(timer as usize)?;
    if header.state != RUNNING {
        return Err(SyscallError::PreconditionViolation);
    }
    Ok(header.period > 0 && now.wrapping_sub(header.start_time) > header.period)
}

pub fn is_active<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
) -> SyscallResult<bool> {
    let header: TimerHeader = kern.read_payload(timer as usize)?;
    Ok(header.state == RUNNING)
}

pub fn get_period<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
) -> SyscallResult<Ticks> {
    let header: TimerHeader = kern.read_payload(timer as usize)?;
    Ok(header.period)
}

pub fn change_period<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    timer: u32,
    period: Ticks,
) -> SyscallResult<()> {
    let mut header: TimerHeader = kern.read_payload(timer as usize)?;
    header.period = period;
    kern.write_payload(timer as usize, &header)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestKern = MemoryRegion<4096, 32>;

    fn fresh() -> TestKern {
        let mut r = TestKern::new();
        r.init();
        r
    }

    #[test]
    fn starts_suspended_and_has_expired_requires_running() {
        let mut kern = fresh();
        let mut timers: TimerRegistry<2> = TimerRegistry::new();
        let t = timers.create(&mut kern, 10, 0).unwrap();
        assert!(!is_active(&mut kern, t).unwrap());
        assert!(has_expired(&mut kern, t, 100).is_err());
    }

    #[test]
    fn expires_only_after_period_elapses() {
        let mut kern = fresh();
        let mut timers: TimerRegistry<2> = TimerRegistry::new();
        let t = timers.create(&mut kern, 10, 0).unwrap();
        start(&mut kern, t, 0).unwrap();
        assert!(!has_expired(&mut kern, t, 10).unwrap());
        assert!(has_expired(&mut kern, t, 11).unwrap());
    }

    #[test]
    fn zero_period_timer_never_expires() {
        let mut kern = fresh();
        let mut timers: TimerRegistry<2> = TimerRegistry::new();
        let t = timers.create(&mut kern, 0, 0).unwrap();
        start(&mut kern, t, 0).unwrap();
        assert!(!has_expired(&mut kern, t, u64::MAX).unwrap());
    }

    #[test]
    fn stop_requires_running_and_start_requires_suspended() {
        let mut kern = fresh();
        let mut timers: TimerRegistry<2> = TimerRegistry::new();
        let t = timers.create(&mut kern, 5, 0).unwrap();
        assert!(stop(&mut kern, t).is_err());
        start(&mut kern, t, 0).unwrap();
        assert!(start(&mut kern, t, 0).is_err());
        stop(&mut kern, t).unwrap();
    }
}
