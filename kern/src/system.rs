// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! System identity and the byte-order probe `getSystemInfo` reports.

use abi::SystemInfo;

/// Probes the running target's byte order the same way the kernel this one
/// descends from does: inspect the low byte of a known 16-bit value rather
/// than trust a compile-time `cfg`, so the answer reflects what the
/// hardware (or host, in tests) actually does.
pub fn is_little_endian() -> bool {
    0x0102u16.to_ne_bytes()[0] == 0x02
}

pub fn system_info(number_of_tasks: u32) -> SystemInfo {
    SystemInfo {
        product_name: abi::PRODUCT_NAME,
        major_version: abi::VERSION_MAJOR,
        minor_version: abi::VERSION_MINOR,
        patch_version: abi::VERSION_PATCH,
        little_endian: is_little_endian() as u8,
        number_of_tasks,
    }
}

/// Disables interrupts and spins forever. Never returns; the only way out
/// is a reset.
pub fn halt(critical_section: &impl crate::hooks::CriticalSection) -> ! {
    critical_section.with(|| loop {
        core::hint::spin_loop();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_info_carries_the_product_identity() {
        let info = system_info(3);
        assert_eq!(&info.product_name, b"HeliOS");
        assert_eq!(info.number_of_tasks, 3);
        assert_eq!(info.little_endian, is_little_endian() as u8);
    }
}
