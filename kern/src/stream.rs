// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity byte streams: append one byte at a time, drain everything
//! at once.
//!
//! Grounded on the same discontiguous-buffer-with-a-length-cursor shape as
//! `circq::CircQ`, simplified to append-only/drain-all since nothing here
//! needs `circq`'s wraparound reads.

use abi::{SyscallError, SyscallResult, STREAM_BUFFER_BYTES};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::mem::region::MemoryRegion;

pub const NULL_OFFSET: u32 = u32::MAX;

#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct StreamHeader {
    pub id: u32,
    pub length: u32,
    pub buffer: [u8; STREAM_BUFFER_BYTES],
    pub next: u32,
    pub _pad: u32,
}

pub struct StreamRegistry<const MAX_STREAMS: usize> {
    next_id: u32,
    length: usize,
    head: u32,
    tail: u32,
    _marker: core::marker::PhantomData<[(); MAX_STREAMS]>,
}

impl<const MAX_STREAMS: usize> StreamRegistry<MAX_STREAMS> {
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
    ) -> SyscallResult<u32> {
        if self.length >= MAX_STREAMS {
            return Err(SyscallError::ResourceExhaustion);
        }
        let offset = kern.alloc(core::mem::size_of::<StreamHeader>())?;
        self.next_id += 1;
        let header = StreamHeader {
            id: self.next_id,
            length: 0,
            buffer: [0; STREAM_BUFFER_BYTES],
            next: NULL_OFFSET,
            _pad: 0,
        };
        kern.write_payload(offset as usize, &header)?;
        if self.tail == NULL_OFFSET {
            self.head = offset as u32;
        } else {
            let mut prev: StreamHeader = kern.read_payload(self.tail as usize)?;
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
        stream: u32,
    ) -> SyscallResult<()> {
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: StreamHeader = kern.read_payload(cursor as usize)?;
            if cursor == stream {
                match prev {
                    Some(p) => {
                        let mut prev_header: StreamHeader = kern.read_payload(p as usize)?;
                        prev_header.next = header.next;
                        kern.write_payload(p as usize, &prev_header)?;
                    }
                    None => self.head = header.next,
                }
                if self.tail == stream {
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

impl<const MAX_STREAMS: usize> Default for StreamRegistry<MAX_STREAMS> {
    fn default() -> Self {
        Self::new()
    }
}

pub fn send<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    stream: u32,
    byte: u8,
) -> SyscallResult<()> {
    let mut header: StreamHeader = kern.read_payload(stream as usize)?;
    if header.length as usize == STREAM_BUFFER_BYTES {
        return Err(SyscallError::PreconditionViolation);
    }
    header.buffer[header.length as usize] = byte;
    header.length += 1;
    kern.write_payload(stream as usize, &header)
}

/// Drains the whole buffer into a user-region allocation, then zeroes the
/// stream's length and contents.
pub fn receive<const N: usize, const B: usize, const UN: usize, const UB: usize>(
    kern: &mut MemoryRegion<N, B>,
    user: &mut MemoryRegion<UN, UB>,
    stream: u32,
) -> SyscallResult<usize> {
    let mut header: StreamHeader = kern.read_payload(stream as usize)?;
    if header.length == 0 {
        return Err(SyscallError::PreconditionViolation);
    }
    let len = header.length as usize;
    let out_offset = user.alloc(len)?;
    user.payload_mut(out_offset)?[..len].copy_from_slice(&header.buffer[..len]);

    header.length = 0;
    header.buffer = [0; STREAM_BUFFER_BYTES];
    kern.write_payload(stream as usize, &header)?;
    Ok(out_offset)
}

pub fn bytes_available<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    stream: u32,
) -> SyscallResult<u32> {
    let header: StreamHeader = kern.read_payload(stream as usize)?;
    if header.length == 0 {
        return Err(SyscallError::PreconditionViolation);
    }
    Ok(header.length)
}

pub fn reset<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    stream: u32,
) -> SyscallResult<()> {
    let mut header: StreamHeader = kern.read_payload(stream as usize)?;
    if header.length == 0 {
        return Err(SyscallError::PreconditionViolation);
    }
    header.length = 0;
    header.buffer = [0; STREAM_BUFFER_BYTES];
    kern.write_payload(stream as usize, &header)
}

pub fn is_empty<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    stream: u32,
) -> SyscallResult<bool> {
    let header: StreamHeader = kern.read_payload(stream as usize)?;
    Ok(header.length == 0)
}

pub fn is_full<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    stream: u32,
) -> SyscallResult<bool> {
    let header: StreamHeader = kern.read_payload(stream as usize)?;
    Ok(header.length as usize == STREAM_BUFFER_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestKern = MemoryRegion<4096, 32>;
    type TestUser = MemoryRegion<4096, 32>;

    fn fresh() -> (TestKern, TestUser) {
        let mut kern = TestKern::new();
        kern.init();
        let mut user = TestUser::new();
        user.init();
        (kern, user)
    }

    #[test]
    fn append_then_drain_all_resets_the_stream() {
        let (mut kern, mut user) = fresh();
        let mut streams: StreamRegistry<2> = StreamRegistry::new();
        let s = streams.create(&mut kern).unwrap();

        for b in b"hi" {
            send(&mut kern, s, *b).unwrap();
        }
        assert_eq!(bytes_available(&mut kern, s).unwrap(), 2);

        let out_offset = receive(&mut kern, &mut user, s).unwrap();
        assert_eq!(&user.payload(out_offset).unwrap()[..2], b"hi");
        assert!(is_empty(&mut kern, s).unwrap());
        assert!(bytes_available(&mut kern, s).is_err());
    }

    #[test]
    fn send_past_capacity_is_precondition_violation() {
        let (mut kern, _user) = fresh();
        let mut streams: StreamRegistry<2> = StreamRegistry::new();
        let s = streams.create(&mut kern).unwrap();
        for _ in 0..STREAM_BUFFER_BYTES {
            send(&mut kern, s, 1).unwrap();
        }
        assert!(send(&mut kern, s, 1).is_err());
        assert!(is_full(&mut kern, s).unwrap());
    }

    #[test]
    fn reset_on_empty_stream_is_precondition_violation() {
        let (mut kern, _user) = fresh();
        let mut streams: StreamRegistry<2> = StreamRegistry::new();
        let s = streams.create(&mut kern).unwrap();
        assert!(reset(&mut kern, s).is_err());
    }
}
