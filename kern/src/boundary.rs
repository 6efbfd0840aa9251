// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The syscall boundary: every address a caller hands back to the kernel is
//! either a user-region pointer (from `alloc` against the user region) or a
//! handle (returned by a create-type syscall, always kernel-region). This
//! module's only job is picking the right region to run `check_addr`
//! against.

use abi::{AddressKind, SyscallResult};

use crate::mem::region::MemoryRegion;

/// Validates `addr` against the region `kind` claims it belongs to. On
/// failure the caller must not have mutated any state yet -- this check
/// always runs first.
pub fn check<const UN: usize, const KN: usize, const B: usize>(
    user: &mut MemoryRegion<UN, B>,
    kern: &mut MemoryRegion<KN, B>,
    kind: AddressKind,
    addr: usize,
) -> SyscallResult<()> {
    match kind {
        AddressKind::UserPointer => user.check_addr(addr),
        AddressKind::Handle => kern.check_addr(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Region = MemoryRegion<4096, 32>;

    #[test]
    fn user_pointer_checked_against_user_region() {
        let mut user = Region::new();
        user.init();
        let mut kern = Region::new();
        kern.init();
        let addr = user.alloc(4).unwrap();
        assert!(check(&mut user, &mut kern, AddressKind::UserPointer, addr).is_ok());
        assert!(check(&mut user, &mut kern, AddressKind::Handle, addr).is_err());
    }

    #[test]
    fn handle_checked_against_kernel_region() {
        let mut user = Region::new();
        user.init();
        let mut kern = Region::new();
        kern.init();
        let handle = kern.alloc(4).unwrap();
        assert!(check(&mut user, &mut kern, AddressKind::Handle, handle).is_ok());
        assert!(check(&mut user, &mut kern, AddressKind::UserPointer, handle).is_err());
    }
}
