// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded FIFO queues with a lockable send path.
//!
//! A queue header and its messages are both kernel-region residents, each
//! addressed by its own allocation offset -- the queue's `head`/`tail`
//! fields are themselves offsets into the same region, exactly like
//! [`crate::task::TaskHeader::next`]. `getLength` and friends don't trust
//! the stored `length` on its own: they walk the message list and demand
//! the walked count agree, the same self-audit the allocator applies to its
//! own free list.

use abi::{Message, SyscallError, SyscallResult, MESSAGE_VALUE_BYTES};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::counters::{count_event, KernelEvent};
use crate::mem::region::MemoryRegion;

pub const NULL_OFFSET: u32 = u32::MAX;

#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct QueueHeader {
    pub id: u32,
    pub limit: u32,
    pub length: u32,
    pub locked: u8,
    pub _pad: [u8; 3],
    pub head: u32,
    pub tail: u32,
    pub next: u32,
    pub _pad2: u32,
}

#[derive(Copy, Clone, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct MessageNode {
    pub value: Message,
    pub _pad0: [u8; 3],
    pub next: u32,
}

pub struct QueueRegistry<const MAX_QUEUES: usize> {
    next_id: u32,
    length: usize,
    head: u32,
    tail: u32,
    _marker: core::marker::PhantomData<[(); MAX_QUEUES]>,
}

impl<const MAX_QUEUES: usize> QueueRegistry<MAX_QUEUES> {
    pub const fn new() -> Self {
        Self {
            next_id: 0,
            length: 0,
            head: NULL_OFFSET,
            tail: NULL_OFFSET,
            _marker: core::marker::PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    /// Create a queue header in `kern` and link it into the registry's
    /// list. Returns the header's offset -- the queue handle.
    pub fn create<const N: usize, const B: usize>(
        &mut self,
        kern: &mut MemoryRegion<N, B>,
        limit: u32,
    ) -> SyscallResult<u32> {
        if (limit as usize) < abi::QUEUE_MINIMUM_LIMIT {
            return Err(SyscallError::InvalidArgument);
        }
        if self.length >= MAX_QUEUES {
            return Err(SyscallError::ResourceExhaustion);
        }
        let offset = kern.alloc(core::mem::size_of::<QueueHeader>())?;
        self.next_id += 1;
        let header = QueueHeader {
            id: self.next_id,
            limit,
            length: 0,
            locked: 0,
            _pad: [0; 3],
            head: NULL_OFFSET,
            tail: NULL_OFFSET,
            next: NULL_OFFSET,
            _pad2: 0,
        };
        kern.write_payload(offset as usize, &header)?;
        if self.tail == NULL_OFFSET {
            self.head = offset as u32;
        } else {
            let mut prev: QueueHeader = kern.read_payload(self.tail as usize)?;
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
        queue: u32,
    ) -> SyscallResult<()> {
        while !is_empty(kern, queue)? {
            drop_head(kern, queue)?;
        }
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while cursor != NULL_OFFSET {
            let header: QueueHeader = kern.read_payload(cursor as usize)?;
            if cursor == queue {
                match prev {
                    Some(p) => {
                        let mut prev_header: QueueHeader = kern.read_payload(p as usize)?;
                        prev_header.next = header.next;
                        kern.write_payload(p as usize, &prev_header)?;
                    }
                    None => self.head = header.next,
                }
                if self.tail == queue {
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

impl<const MAX_QUEUES: usize> Default for QueueRegistry<MAX_QUEUES> {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the message list from `header.head`, returning the count. The
/// caller compares this against `header.length` -- that comparison is the
/// self-audit.
fn walked_length<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    header: &QueueHeader,
) -> SyscallResult<u32> {
    let mut count = 0u32;
    let mut cursor = header.head;
    while cursor != NULL_OFFSET {
        count += 1;
        let node: MessageNode = kern.read_payload(cursor as usize)?;
        cursor = node.next;
    }
    Ok(count)
}

fn audited_length<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<(QueueHeader, u32)> {
    let header: QueueHeader = kern.read_payload(queue as usize)?;
    let walked = walked_length(kern, &header)?;
    if walked != header.length {
        count_event(KernelEvent::QueueSelfAuditFailed);
        return Err(SyscallError::InvariantViolation);
    }
    Ok((header, walked))
}

pub fn get_length<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<u32> {
    audited_length(kern, queue).map(|(_, len)| len)
}

pub fn is_empty<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<bool> {
    get_length(kern, queue).map(|len| len == 0)
}

/// Whether any message is waiting -- the walk-and-cross-check audit applies
/// here too, same as `get_length`/`is_empty`/`is_full`.
pub fn messages_waiting<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<bool> {
    get_length(kern, queue).map(|len| len > 0)
}

pub fn is_full<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<bool> {
    let (header, len) = audited_length(kern, queue)?;
    Ok(len >= header.limit)
}

pub fn lock<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<()> {
    let mut header: QueueHeader = kern.read_payload(queue as usize)?;
    header.locked = 1;
    kern.write_payload(queue as usize, &header)
}

pub fn unlock<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<()> {
    let mut header: QueueHeader = kern.read_payload(queue as usize)?;
    header.locked = 0;
    kern.write_payload(queue as usize, &header)
}

/// Appends a message at `bytes` of `value` (zero-padded to
/// `MESSAGE_VALUE_BYTES` regardless of the recorded length). Fails if the
/// queue is locked or already at its limit.
pub fn send<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
    bytes: u8,
    value: &[u8],
) -> SyscallResult<()> {
    if bytes == 0 || bytes as usize > MESSAGE_VALUE_BYTES {
        return Err(SyscallError::InvalidArgument);
    }
    let (mut header, len) = audited_length(kern, queue)?;
    if header.locked != 0 || len >= header.limit {
        count_event(KernelEvent::QueueSendRejected);
        return Err(SyscallError::PreconditionViolation);
    }

    let mut padded = [0u8; MESSAGE_VALUE_BYTES];
    padded[..value.len().min(MESSAGE_VALUE_BYTES)]
        .copy_from_slice(&value[..value.len().min(MESSAGE_VALUE_BYTES)]);
    let node_offset = kern.alloc(core::mem::size_of::<MessageNode>())?;
    let node = MessageNode {
        value: Message { len: bytes, value: padded },
        _pad0: [0; 3],
        next: NULL_OFFSET,
    };
    kern.write_payload(node_offset as usize, &node)?;

    if header.tail == NULL_OFFSET {
        header.head = node_offset as u32;
    } else {
        let mut tail_node: MessageNode = kern.read_payload(header.tail as usize)?;
        tail_node.next = node_offset as u32;
        kern.write_payload(header.tail as usize, &tail_node)?;
    }
    header.tail = node_offset as u32;
    header.length = len + 1;
    kern.write_payload(queue as usize, &header)
}

/// Returns a copy of the head message without removing it.
pub fn peek<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<Message> {
    let (header, len) = audited_length(kern, queue)?;
    if len == 0 {
        return Err(SyscallError::PreconditionViolation);
    }
    let node: MessageNode = kern.read_payload(header.head as usize)?;
    Ok(node.value)
}

/// Removes the head message without returning it.
pub fn drop_head<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<()> {
    let (mut header, len) = audited_length(kern, queue)?;
    if len == 0 {
        return Err(SyscallError::PreconditionViolation);
    }
    let node: MessageNode = kern.read_payload(header.head as usize)?;
    let old_head = header.head;
    header.head = node.next;
    if header.head == NULL_OFFSET {
        header.tail = NULL_OFFSET;
    }
    header.length = len - 1;
    kern.write_payload(queue as usize, &header)?;
    kern.free(old_head as usize)
}

/// `peek` + `drop`, atomically: both succeed or neither takes effect.
pub fn receive<const N: usize, const B: usize>(
    kern: &mut MemoryRegion<N, B>,
    queue: u32,
) -> SyscallResult<Message> {
    let value = peek(kern, queue)?;
    drop_head(kern, queue)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestKern = MemoryRegion<4096, 32>;

    fn fresh_kern() -> TestKern {
        let mut r = TestKern::new();
        r.init();
        r
    }

    #[test]
    fn send_receive_preserves_order_and_enforces_limit() {
        let mut kern = fresh_kern();
        let mut queues: QueueRegistry<4> = QueueRegistry::new();
        let q = queues.create(&mut kern, 7).unwrap();

        for i in 1..=7u8 {
            let msg = [b'M', b'E', b'S', b'S', b'A', b'G', b'E', i];
            send(&mut kern, q, 8, &msg).unwrap();
        }
        assert!(send(&mut kern, q, 1, &[1]).is_err());
        assert_eq!(get_length(&mut kern, q).unwrap(), 7);

        let first = peek(&mut kern, q).unwrap();
        assert_eq!(first.as_slice(), b"MESSAGE1");

        let received = receive(&mut kern, q).unwrap();
        assert_eq!(received.as_slice(), b"MESSAGE1");
        let next = receive(&mut kern, q).unwrap();
        assert_eq!(next.as_slice(), b"MESSAGE2");
    }

    #[test]
    fn locked_queue_rejects_send_but_allows_receive() {
        let mut kern = fresh_kern();
        let mut queues: QueueRegistry<4> = QueueRegistry::new();
        let q = queues.create(&mut kern, 5).unwrap();
        send(&mut kern, q, 1, &[9]).unwrap();
        lock(&mut kern, q).unwrap();
        assert!(send(&mut kern, q, 1, &[9]).is_err());
        assert!(receive(&mut kern, q).is_ok());
    }

    #[test]
    fn messages_waiting_tracks_emptiness() {
        let mut kern = fresh_kern();
        let mut queues: QueueRegistry<4> = QueueRegistry::new();
        let q = queues.create(&mut kern, 5).unwrap();
        assert!(!messages_waiting(&mut kern, q).unwrap());
        send(&mut kern, q, 1, &[1]).unwrap();
        assert!(messages_waiting(&mut kern, q).unwrap());
        receive(&mut kern, q).unwrap();
        assert!(!messages_waiting(&mut kern, q).unwrap());
    }

    #[test]
    fn create_below_minimum_limit_is_invalid_argument() {
        let mut kern = fresh_kern();
        let mut queues: QueueRegistry<4> = QueueRegistry::new();
        assert_eq!(
            queues.create(&mut kern, 1).unwrap_err(),
            SyscallError::InvalidArgument
        );
    }

    #[test]
    fn delete_frees_all_messages_and_the_header() {
        let mut kern = fresh_kern();
        let mut queues: QueueRegistry<4> = QueueRegistry::new();
        let q = queues.create(&mut kern, 5).unwrap();
        send(&mut kern, q, 1, &[1]).unwrap();
        send(&mut kern, q, 1, &[2]).unwrap();
        let before = kern.stats().unwrap().blocks_free;
        queues.delete(&mut kern, q).unwrap();
        let after = kern.stats().unwrap().blocks_free;
        assert!(after > before);
    }
}
