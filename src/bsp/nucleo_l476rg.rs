// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NUCLEO-L476RG: STM32L476RG, 1 MiB dual-bank flash in 2 KiB pages, 96 KiB
//! SRAM1.

use crate::bsp::{Bsp, DeviceMemoryMap, FaultPolicy};
use crate::flash::RdpLevel;
use crate::guard::{ProtectionTarget, WrpCoverage};
use crate::region::{ProtectedRegions, Region};

pub enum Board {}

impl Bsp for Board {
    const MEMORY_MAP: DeviceMemoryMap = DeviceMemoryMap {
        flash: Region::new(0x0800_0000, 0x0810_0000),
        page_size: 0x800,
        bank_pages: 256,
        image_start: 0x0801_0000,
        // Rest of bank 1, less one page for the trailer.
        image_size: 0x6_F800,
        protected: ProtectedRegions {
            rom: Region::new(0x0800_0000, 0x0801_0000),
            ram: Region::new(0x2000_0000, 0x2000_4000),
        },
        shared_ram: Region::new(0x2001_7C00, 0x2001_8000),
        handoff_magic: 0x5EC0_B007,
    };

    const PROTECTION: ProtectionTarget = ProtectionTarget {
        wrp_zone: 0,
        coverage: WrpCoverage::WholeImage,
        boot_zone: Some(1),
        rdp: RdpLevel::Level1,
    };

    const FAULT_POLICY: FaultPolicy = FaultPolicy::Halt;
}
