// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types and hooks for implementing Board Support Packages (BSPs).
//!
//! The boot core cares about very little on the board beyond where things
//! live in memory and how strict to be. The exact properties are in the `Bsp`
//! trait below.
//!
//! To implement a BSP:
//!
//! 1. Create a module within `secboot::bsp` named after your board.
//! 2. Define a type in the module called `Board`. This type will never be
//!    instantiated, so it can be arbitrary; an empty enum is easy.
//! 3. Implement `secboot::bsp::Bsp` for your `Board` type.
//! 4. Add a `target-board-*` feature to `Cargo.toml`.
//! 5. Add a branch to the `cfg_if` in `src/bin/secboot.rs` to detect your
//!    board and select the right `Board` type.

// Every BSP is compiled regardless of the selected board, so they all get
// built and tested.
pub mod b_l475e_iot01a;
pub mod nucleo_l476rg;
pub mod nucleo_l4r5zi;

use crate::flash::OptionByteEncoding;
use crate::guard::ProtectionTarget;
use crate::layout::{FirmwareLayout, LayoutError};
use crate::region::{ProtectedRegions, Region};

/// Where everything lives on a particular board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceMemoryMap {
    /// The whole on-chip flash array.
    pub flash: Region,
    pub page_size: u32,
    /// Pages per flash bank.
    pub bank_pages: u32,
    /// Start of the application slot. The image's vector table sits here.
    pub image_start: u32,
    /// Size of the image the slot holds, before page rounding. The signer pads
    /// shorter binaries up to this.
    pub image_size: u32,
    /// The boot core's own flash and RAM.
    pub protected: ProtectedRegions,
    /// RAM the image may share with the boot core, scrubbed before handoff.
    pub shared_ram: Region,
    /// Left in `r0` for the image at handoff.
    pub handoff_magic: u32,
}

impl DeviceMemoryMap {
    pub fn flash_base(&self) -> u32 {
        self.flash.start
    }

    pub fn layout(&self) -> Result<FirmwareLayout, LayoutError> {
        FirmwareLayout::new(self.image_start, self.image_size, self.page_size)
    }
}

/// What to do once a boot has failed and the fault has been indicated.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultPolicy {
    /// Spin with interrupts masked until someone power cycles the board.
    Halt,
    /// Reset and try again from the top.
    Reset,
}

/// Requirements placed upon a BSP type.
pub trait Bsp {
    const MEMORY_MAP: DeviceMemoryMap;
    const PROTECTION: ProtectionTarget;
    const OPTION_BYTES: OptionByteEncoding = crate::stm32::L4_OPTION_BYTES;
    const FAULT_POLICY: FaultPolicy = FaultPolicy::Halt;

    /// Indicate a boot failure. No information is provided as to _what_
    /// failure, because generally speaking we only have one bit of output.
    ///
    /// Boards without a spare output keep the default, which does nothing.
    fn indicate_fault() {}
}
