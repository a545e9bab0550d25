// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! B-L475E-IOT01A discovery kit: STM32L475VG, same flash and SRAM1 geometry
//! as the L476.
//!
//! This board exercises tamper detection on the bench. Only the trailer is
//! write protected, so a running image can rewrite its own pages and the next
//! boot has to refuse them. Installing a newly signed image means rewriting
//! the trailer too, which takes an RDP regression (and its mass erase) and a
//! full reflash.

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
        image_size: 0x6_F800,
        protected: ProtectedRegions {
            rom: Region::new(0x0800_0000, 0x0801_0000),
            ram: Region::new(0x2000_0000, 0x2000_4000),
        },
        shared_ram: Region::new(0x2001_7C00, 0x2001_8000),
        handoff_magic: 0x5EC0_B007,
    };

    const PROTECTION: ProtectionTarget = ProtectionTarget {
        wrp_zone: 1,
        coverage: WrpCoverage::Trailer,
        boot_zone: Some(0),
        rdp: RdpLevel::Level1,
    };

    // Unattended in the test rack; come back around rather than sit dead.
    const FAULT_POLICY: FaultPolicy = FaultPolicy::Reset;
}
