// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NUCLEO-L4R5ZI: STM32L4R5ZI, 2 MiB flash in dual-bank mode (4 KiB pages),
//! 192 KiB SRAM1.

use crate::bsp::{Bsp, DeviceMemoryMap};
use crate::flash::RdpLevel;
use crate::guard::{ProtectionTarget, WrpCoverage};
use crate::region::{ProtectedRegions, Region};

pub enum Board {}

impl Bsp for Board {
    const MEMORY_MAP: DeviceMemoryMap = DeviceMemoryMap {
        flash: Region::new(0x0800_0000, 0x0820_0000),
        page_size: 0x1000,
        bank_pages: 256,
        image_start: 0x0801_0000,
        image_size: 0xE_F000,
        protected: ProtectedRegions {
            rom: Region::new(0x0800_0000, 0x0801_0000),
            ram: Region::new(0x2000_0000, 0x2000_4000),
        },
        shared_ram: Region::new(0x2002_FC00, 0x2003_0000),
        handoff_magic: 0x5EC0_B007,
    };

    const PROTECTION: ProtectionTarget = ProtectionTarget {
        wrp_zone: 0,
        coverage: WrpCoverage::WholeImage,
        boot_zone: Some(1),
        rdp: RdpLevel::Level1,
    };
}
