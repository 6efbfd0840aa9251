// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The memory region allocator: a fixed-size byte array divided into blocks,
//! serving variable-size allocations behind an address-ordered singly linked
//! list of [`EntryHeader`]s, with a corruption check run on every access.
//!
//! A region is generic over its total byte size `N` and its block size
//! `BLOCK_SIZE`; `BLOCKS = N / BLOCK_SIZE` is derived, not stored, so two
//! regions of the same shape can never disagree about their own geometry.

use unwrap_lite::UnwrapLite;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use abi::{SyscallError, SyscallResult};

use super::entry::{EntryHeader, FREE, INUSE, NULL_OFFSET};
use crate::counters::{count_event, KernelEvent};

/// Liveness of a region. One-way `Healthy -> Poisoned` until the next
/// `init()`; this is the tri-state re-expression of the sticky `memfault`
/// flag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum RegionState {
    /// Never initialized (or its `init()` hasn't run yet this boot).
    Fresh,
    Healthy,
    /// An invariant check failed. Stays this way until `init()`.
    Poisoned,
}

/// Snapshot of a region's usage, derived live by walking -- never cached.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionStats {
    pub blocks_total: usize,
    pub blocks_free: usize,
    pub blocks_used: usize,
    pub minimum_ever_free_bytes: usize,
    pub allocations: u32,
    pub frees: u32,
}

/// A statically sized allocator region of `N` bytes, divided into
/// `BLOCK_SIZE`-byte blocks.
pub struct MemoryRegion<const N: usize, const BLOCK_SIZE: usize> {
    bytes: [u8; N],
    state: RegionState,
    allocations: u32,
    frees: u32,
    minimum_ever_free_bytes: usize,
}

impl<const N: usize, const BLOCK_SIZE: usize> MemoryRegion<N, BLOCK_SIZE> {
    /// Blocks needed to hold one header, rounded up.
    pub const ENTRY_SIZE_BLOCKS: usize =
        (EntryHeader::SIZE + BLOCK_SIZE - 1) / BLOCK_SIZE;
    /// Total number of blocks in the region.
    pub const BLOCKS: usize = N / BLOCK_SIZE;

    pub const fn new() -> Self {
        Self {
            bytes: [0; N],
            state: RegionState::Fresh,
            allocations: 0,
            frees: 0,
            minimum_ever_free_bytes: N,
        }
    }

    /// Zero the region and place a single FREE entry spanning all blocks.
    /// Always succeeds; resets `Poisoned` back to `Healthy`, matching the
    /// rule that only a full re-`init` clears the sticky fault.
    pub fn init(&mut self) {
        self.bytes = [0; N];
        self.allocations = 0;
        self.frees = 0;
        self.minimum_ever_free_bytes = N;
        self.write_header(0, Self::BLOCKS as u32, FREE, NULL_OFFSET);
        self.state = RegionState::Healthy;
    }

    fn write_header(&mut self, offset: usize, blocks: u32, free: u32, next: u32) {
        let header = EntryHeader {
            magic: EntryHeader::expected_magic(offset),
            blocks,
            next,
            free,
        };
        self.bytes[offset..offset + EntryHeader::SIZE]
            .copy_from_slice(header.as_bytes());
    }

    fn header(&self, offset: usize) -> EntryHeader {
        *EntryHeader::ref_from_bytes(&self.bytes[offset..offset + EntryHeader::SIZE])
            .unwrap_lite()
    }

    fn poison(&mut self) -> SyscallError {
        self.state = RegionState::Poisoned;
        count_event(KernelEvent::AllocatorCorruptionDetected);
        SyscallError::InvariantViolation
    }

    fn require_live(&self) -> SyscallResult<()> {
        match self.state {
            RegionState::Healthy => Ok(()),
            RegionState::Poisoned => Err(SyscallError::InvariantViolation),
            RegionState::Fresh => Err(SyscallError::PreconditionViolation),
        }
    }

    /// Walk the region verifying every invariant in §4.1: addresses in
    /// range, magic matches offset, `free` is a valid sentinel, and the
    /// total block count equals `BLOCKS`. If `want_header_offset` is given,
    /// additionally requires the walk to pass through that exact offset and
    /// find it INUSE.
    fn walk_check(&self, want_header_offset: Option<usize>) -> Result<(), ()> {
        let mut offset = 0usize;
        let mut total_blocks = 0usize;
        let mut found = want_header_offset.is_none();
        loop {
            if offset >= N || offset + EntryHeader::SIZE > N {
                return Err(());
            }
            let header = self.header(offset);
            if !header.magic_ok(offset) {
                return Err(());
            }
            if !header.is_valid_free_value() {
                return Err(());
            }
            total_blocks += header.blocks as usize;
            if want_header_offset == Some(offset) {
                found = header.is_inuse();
            }
            if !header.has_next() {
                break;
            }
            offset = header.next as usize;
        }
        if total_blocks != Self::BLOCKS {
            return Err(());
        }
        if !found {
            return Err(());
        }
        Ok(())
    }

    /// `check(region, null, WITHOUT_ADDR)`.
    pub fn check(&mut self) -> SyscallResult<()> {
        self.require_live()?;
        self.walk_check(None).map_err(|()| self.poison())
    }

    /// `check(region, addr, WITH_ADDR)`, where `addr` is the *payload*
    /// address (what `alloc` handed back), not the header offset.
    pub fn check_addr(&mut self, payload_offset: usize) -> SyscallResult<()> {
        self.require_live()?;
        let header_offset = self.header_offset_of(payload_offset)?;
        self.walk_check(Some(header_offset)).map_err(|()| self.poison())
    }

    fn header_offset_of(&self, payload_offset: usize) -> SyscallResult<usize> {
        payload_offset
            .checked_sub(Self::ENTRY_SIZE_BLOCKS * BLOCK_SIZE)
            .ok_or(SyscallError::InvalidArgument)
    }

    /// Allocate at least `size` bytes. Returns the payload address: the byte
    /// immediately after the chosen entry's header.
    pub fn alloc(&mut self, size: usize) -> SyscallResult<usize> {
        if size == 0 {
            return Err(SyscallError::InvalidArgument);
        }
        self.check()?;

        let requested_blocks = Self::ENTRY_SIZE_BLOCKS
            + (size + BLOCK_SIZE - 1) / BLOCK_SIZE;

        let mut offset = 0usize;
        let mut candidate: Option<(usize, EntryHeader)> = None;
        loop {
            let header = self.header(offset);
            if header.is_free()
                && header.blocks as usize >= requested_blocks
                && candidate
                    .map(|(_, c)| header.blocks < c.blocks)
                    .unwrap_or(true)
            {
                candidate = Some((offset, header));
            }
            if !header.has_next() {
                break;
            }
            offset = header.next as usize;
        }

        let (entry_offset, entry) = match candidate {
            Some(c) => c,
            None => {
                count_event(KernelEvent::AllocationFailed);
                return Err(SyscallError::ResourceExhaustion);
            }
        };

        let remainder = entry.blocks as usize - requested_blocks;
        let final_blocks = if remainder >= Self::ENTRY_SIZE_BLOCKS + 1 {
            let high_offset = entry_offset + requested_blocks * BLOCK_SIZE;
            self.write_header(
                high_offset,
                remainder as u32,
                FREE,
                entry.next,
            );
            self.write_header(
                entry_offset,
                requested_blocks as u32,
                INUSE,
                high_offset as u32,
            );
            requested_blocks
        } else {
            self.write_header(entry_offset, entry.blocks, INUSE, entry.next);
            entry.blocks as usize
        };

        let payload_offset = entry_offset + Self::ENTRY_SIZE_BLOCKS * BLOCK_SIZE;
        let payload_len = final_blocks * BLOCK_SIZE - Self::ENTRY_SIZE_BLOCKS * BLOCK_SIZE;
        self.bytes[payload_offset..payload_offset + payload_len].fill(0);

        self.allocations += 1;
        let free_bytes = self.free_bytes_unchecked();
        if free_bytes < self.minimum_ever_free_bytes {
            self.minimum_ever_free_bytes = free_bytes;
        }
        count_event(KernelEvent::AllocationSucceeded);

        Ok(payload_offset)
    }

    /// Release the allocation at `payload_offset`, then defragment: any two
    /// adjacent FREE entries are merged.
    pub fn free(&mut self, payload_offset: usize) -> SyscallResult<()> {
        self.check_addr(payload_offset)?;
        let header_offset = self.header_offset_of(payload_offset)?;
        let header = self.header(header_offset);
        self.write_header(header_offset, header.blocks, FREE, header.next);
        self.frees += 1;

        let mut offset = 0usize;
        loop {
            let current = self.header(offset);
            if current.is_free() && current.has_next() {
                let next_offset = current.next as usize;
                let next = self.header(next_offset);
                if next.is_free() {
                    let combined_blocks = current.blocks + next.blocks;
                    self.write_header(offset, combined_blocks, FREE, next.next);
                    let clear_len = EntryHeader::SIZE.min(BLOCK_SIZE);
                    self.bytes[next_offset..next_offset + clear_len].fill(0);
                    continue;
                }
            }
            if !current.has_next() {
                break;
            }
            offset = current.next as usize;
        }

        Ok(())
    }

    fn free_bytes_unchecked(&self) -> usize {
        let mut offset = 0usize;
        let mut free_blocks = 0usize;
        loop {
            let header = self.header(offset);
            if header.is_free() {
                free_blocks += header.blocks as usize;
            }
            if !header.has_next() {
                break;
            }
            offset = header.next as usize;
        }
        free_blocks * BLOCK_SIZE
    }

    /// Derive usage statistics by walking. Never cached.
    pub fn stats(&mut self) -> SyscallResult<RegionStats> {
        self.check()?;
        let free_bytes = self.free_bytes_unchecked();
        let blocks_free = free_bytes / BLOCK_SIZE;
        Ok(RegionStats {
            blocks_total: Self::BLOCKS,
            blocks_free,
            blocks_used: Self::BLOCKS - blocks_free,
            minimum_ever_free_bytes: self.minimum_ever_free_bytes,
            allocations: self.allocations,
            frees: self.frees,
        })
    }

    /// Number of usable payload bytes at a validated payload address.
    fn payload_len(&self, header_offset: usize) -> usize {
        let header = self.header(header_offset);
        header.blocks as usize * BLOCK_SIZE - Self::ENTRY_SIZE_BLOCKS * BLOCK_SIZE
    }

    /// Borrow the payload bytes at `payload_offset` mutably, after
    /// validating the address names a live INUSE entry.
    pub fn payload_mut(&mut self, payload_offset: usize) -> SyscallResult<&mut [u8]> {
        self.check_addr(payload_offset)?;
        let header_offset = self.header_offset_of(payload_offset)?;
        let len = self.payload_len(header_offset);
        Ok(&mut self.bytes[payload_offset..payload_offset + len])
    }

    /// Borrow the payload bytes at `payload_offset` immutably, after
    /// validating the address names a live INUSE entry.
    pub fn payload(&mut self, payload_offset: usize) -> SyscallResult<&[u8]> {
        self.check_addr(payload_offset)?;
        let header_offset = self.header_offset_of(payload_offset)?;
        let len = self.payload_len(header_offset);
        Ok(&self.bytes[payload_offset..payload_offset + len])
    }

    /// Write a POD value into the payload at `payload_offset`.
    pub fn write_payload<T: IntoBytes + Immutable>(
        &mut self,
        payload_offset: usize,
        value: &T,
    ) -> SyscallResult<()> {
        let dst = self.payload_mut(payload_offset)?;
        let bytes = value.as_bytes();
        if bytes.len() > dst.len() {
            return Err(SyscallError::InvalidArgument);
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Read a POD value out of the payload at `payload_offset`.
    pub fn read_payload<T: FromBytes + Immutable + KnownLayout + Copy>(
        &mut self,
        payload_offset: usize,
    ) -> SyscallResult<T> {
        let src = self.payload(payload_offset)?;
        let len = core::mem::size_of::<T>();
        if len > src.len() {
            return Err(SyscallError::InvalidArgument);
        }
        Ok(*T::ref_from_bytes(&src[..len]).unwrap_lite())
    }
}

impl<const N: usize, const BLOCK_SIZE: usize> Default for MemoryRegion<N, BLOCK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestRegion = MemoryRegion<512, 32>;

    #[test]
    fn init_yields_single_free_entry_spanning_all_blocks() {
        let mut region = TestRegion::new();
        region.init();
        let stats = region.stats().unwrap();
        assert_eq!(stats.blocks_free, TestRegion::BLOCKS);
        assert_eq!(stats.blocks_used, 0);
    }

    #[test]
    fn alloc_before_init_is_precondition_violation() {
        let mut region = TestRegion::new();
        assert_eq!(region.alloc(8), Err(SyscallError::PreconditionViolation));
    }

    #[test]
    fn zero_size_alloc_is_invalid_argument() {
        let mut region = TestRegion::new();
        region.init();
        assert_eq!(region.alloc(0), Err(SyscallError::InvalidArgument));
    }

    #[test]
    fn alloc_free_cycle_restores_single_free_entry() {
        // End-to-end scenario 1.
        let mut region = TestRegion::new();
        region.init();
        let p1 = region.alloc(100).unwrap();
        let p2 = region.alloc(50).unwrap();
        region.free(p1).unwrap();
        let p3 = region.alloc(60).unwrap();
        region.free(p2).unwrap();
        region.free(p3).unwrap();

        let stats = region.stats().unwrap();
        assert_eq!(stats.blocks_free, TestRegion::BLOCKS);
        assert_eq!(stats.blocks_used, 0);
    }

    #[test]
    fn round_trip_alloc_then_free_restores_free_bytes() {
        let mut region = TestRegion::new();
        region.init();
        let before = region.stats().unwrap();
        let p = region.alloc(40).unwrap();
        region.free(p).unwrap();
        let after = region.stats().unwrap();
        assert_eq!(before.blocks_free, after.blocks_free);
    }

    #[test]
    fn smallest_fit_selects_exact_match_over_larger_candidates() {
        // End-to-end scenario 2: construct free entries of {4, 8, 3, 10}
        // blocks by allocating four chunks then freeing all of them so each
        // becomes its own free entry of a known size, with coalescing
        // prevented by interleaving a tiny permanent allocation between
        // each pair.
        let mut region: MemoryRegion<{ 64 * 32 }, 32> = MemoryRegion::new();
        region.init();

        // Sizes chosen (in payload bytes) so freeing each leaves the exact
        // block counts {4, 8, 3, 10} once its header block is included.
        // `keep*` entries stay INUSE so that freeing `a`..`d` never finds a
        // FREE neighbor to coalesce with; `keep4` mops up the rest of the
        // region so `d` isn't adjacent to a leftover tail entry either.
        let a = region.alloc(3 * 32).unwrap(); // 4 blocks total
        let keep1 = region.alloc(32).unwrap();
        let b = region.alloc(7 * 32).unwrap(); // 8 blocks total
        let keep2 = region.alloc(32).unwrap();
        let c = region.alloc(2 * 32).unwrap(); // 3 blocks total
        let keep3 = region.alloc(32).unwrap();
        let d = region.alloc(9 * 32).unwrap(); // 10 blocks total
        let keep4 = region.alloc(32 * 32).unwrap(); // consumes the remaining tail exactly

        region.free(a).unwrap();
        region.free(b).unwrap();
        region.free(c).unwrap();
        region.free(d).unwrap();

        // Requesting 3 blocks worth of payload (2 blocks of data, rounds to
        // one payload block plus header = needs <= 3-block free entry) must
        // land in the exact-fit entry `c`, not the larger ones.
        let got = region.alloc(2 * 32).unwrap();
        assert_eq!(got, c);

        let _ = (keep1, keep2, keep3, keep4);
    }

    #[test]
    fn corruption_in_magic_poisons_region_permanently() {
        // End-to-end scenario 3.
        let mut region = TestRegion::new();
        region.init();
        let p = region.alloc(16).unwrap();
        let header_offset = p - TestRegion::ENTRY_SIZE_BLOCKS * 32;
        region.bytes[header_offset] ^= 0xFF;

        assert_eq!(region.check(), Err(SyscallError::InvariantViolation));
        assert_eq!(region.alloc(8), Err(SyscallError::InvariantViolation));

        region.init();
        assert!(region.check().is_ok());
    }

    #[test]
    fn split_threshold_is_entry_size_plus_one() {
        let mut region = TestRegion::new();
        region.init();
        // Allocate everything but leave exactly ENTRY_SIZE_BLOCKS blocks
        // free; that remainder must NOT be split off as its own entry.
        let total = TestRegion::BLOCKS;
        let leave = TestRegion::ENTRY_SIZE_BLOCKS;
        let take_blocks = total - leave;
        let take_payload_blocks = take_blocks - TestRegion::ENTRY_SIZE_BLOCKS;
        let p = region.alloc(take_payload_blocks * 32).unwrap();
        let stats = region.stats().unwrap();
        assert_eq!(stats.blocks_used + stats.blocks_free, total);
        region.free(p).unwrap();
    }
}
