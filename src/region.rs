// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Address ranges, and checks for buffers that poke into memory the boot core
//! reserves for itself.

use core::ops::Range;

use crate::BootError;

/// A contiguous address range. `end` is exclusive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub start: u32,
    pub end: u32,
}

/// Where a buffer sits relative to a protected region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Placement {
    /// No byte of the buffer is in the region.
    Outside,
    /// Every byte of the buffer is in the region.
    Inside,
    /// Some bytes are in the region and some are not. Nobody legitimately
    /// hands us a buffer like this.
    Straddling,
}

impl Region {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn as_range(&self) -> Range<u32> {
        self.start..self.end
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Checks whether `other` lies entirely within `self`.
    pub fn covers(&self, other: &Region) -> bool {
        other.is_empty() || (self.start <= other.start && other.end <= self.end)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start < other.end
            && other.start < self.end
    }

    /// Classifies `buffer` relative to this region.
    ///
    /// An empty buffer touches nothing and is always `Outside`.
    pub fn placement_of(&self, buffer: &Region) -> Placement {
        if !self.overlaps(buffer) {
            Placement::Outside
        } else if self.covers(buffer) {
            Placement::Inside
        } else {
            Placement::Straddling
        }
    }
}

/// Memory the boot core keeps to itself: its own code in flash and its
/// working RAM.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtectedRegions {
    pub rom: Region,
    pub ram: Region,
}

impl ProtectedRegions {
    /// Requires `buffer` to lie wholly outside the protected ROM.
    ///
    /// A buffer partly inside is an intrusion attempt. A buffer wholly inside
    /// is not an attack in itself, but nothing we check or jump to may live
    /// there either, so it is refused too.
    pub fn check_outside_rom(&self, buffer: &Region) -> Result<(), BootError> {
        check_outside(&self.rom, buffer)
    }

    /// Same as [`Self::check_outside_rom`], for the protected RAM.
    pub fn check_outside_ram(&self, buffer: &Region) -> Result<(), BootError> {
        check_outside(&self.ram, buffer)
    }
}

fn check_outside(protected: &Region, buffer: &Region) -> Result<(), BootError> {
    match protected.placement_of(buffer) {
        Placement::Outside => Ok(()),
        Placement::Inside => {
            log::error!(
                "buffer {:#x}..{:#x} lies inside protected region {:#x}..{:#x}",
                buffer.start,
                buffer.end,
                protected.start,
                protected.end,
            );
            Err(BootError::InvalidArgument)
        }
        Placement::Straddling => {
            log::error!(
                "buffer {:#x}..{:#x} straddles protected region {:#x}..{:#x}",
                buffer.start,
                buffer.end,
                protected.start,
                protected.end,
            );
            Err(BootError::BufferIntrusion)
        }
    }
}
