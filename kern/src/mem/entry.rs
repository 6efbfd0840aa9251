// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The header that prefixes every allocation and every free run.
//!
//! The header is addressed by byte offset into the region's owned backing
//! array, never by raw pointer: `offset` doubles as the tamper-detection
//! input (see [`MAGIC_CONST`]) and as the only handle a caller ever sees.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// XOR'd with an entry's own offset to produce its `magic` field. Any other
/// value in that field means the header was overwritten or the offset/header
/// pairing no longer matches -- corruption, in either case.
pub const MAGIC_CONST: u32 = 0xB16B_00B5;

/// Sentinel marking an entry as free. Not 0 or 1, so zeroed or garbage
/// memory never passes for a valid entry.
pub const FREE: u32 = 0xD5;
/// Sentinel marking an entry as in use.
pub const INUSE: u32 = 0xAA;

/// `next` value meaning "end of list". Regions are small enough in practice
/// that this never collides with a real offset.
pub const NULL_OFFSET: u32 = u32::MAX;

/// On-disk (in-region) shape of an entry header.
///
/// `free` is a full `u32` rather than the single sentinel byte the original
/// design describes: with three `u32` fields ahead of it, `repr(C)` already
/// rounds the header up to 16 bytes, so widening costs nothing, and it lets
/// the whole struct derive `FromBytes`/`IntoBytes` with no implicit padding
/// bytes for `zerocopy` to reject.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct EntryHeader {
    pub magic: u32,
    pub blocks: u32,
    pub next: u32,
    pub free: u32,
}

impl EntryHeader {
    pub const SIZE: usize = core::mem::size_of::<EntryHeader>();

    pub fn expected_magic(offset: usize) -> u32 {
        (offset as u32) ^ MAGIC_CONST
    }

    pub fn magic_ok(&self, offset: usize) -> bool {
        self.magic == Self::expected_magic(offset)
    }

    pub fn is_free(&self) -> bool {
        self.free == FREE
    }

    pub fn is_inuse(&self) -> bool {
        self.free == INUSE
    }

    pub fn is_valid_free_value(&self) -> bool {
        self.free == FREE || self.free == INUSE
    }

    pub fn has_next(&self) -> bool {
        self.next != NULL_OFFSET
    }
}
