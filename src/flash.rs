// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash controller abstraction and the option-byte protection model.
//!
//! The boot core never touches flash control registers directly; it goes
//! through a [`FlashController`]. On hardware that's the register-level driver
//! in [`crate::stm32`]; in tests it's an in-memory fake.
//!
//! Unlocking is always scoped. [`FlashSession`] unlocks the control interface
//! and relocks it when dropped, and [`OptionByteSession`] does the same for the
//! option bytes, nested inside a flash session. Leaving either unlocked past
//! the end of the operation that needed it is a security hazard, and the guard
//! types make it impossible to forget, including on error paths.

use crate::region::Region;

/// Upper bound on the number of write protection zones any supported part
/// has. Parts with fewer zones leave the trailing entries unused.
pub const MAX_WRP_ZONES: usize = 4;

/// Things that go wrong talking to the flash controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashError {
    /// The unlock key sequence was not accepted.
    UnlockFailed,
    /// An operation was attempted while the interface was locked.
    Locked,
    /// Address or length falls outside flash.
    OutOfBounds,
    /// Address or length doesn't meet the programming granularity.
    Unaligned,
    /// The target page is write protected.
    WriteProtected,
    /// The controller reported an error while programming.
    ProgramFailed,
    /// The controller reported an error while erasing.
    EraseFailed,
    /// The controller refused the option byte update.
    OptionBytesFailed,
}

/// Readout protection level. Ordered by increasing restriction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum RdpLevel {
    /// No protection.
    Level0,
    /// Debug access to flash is blocked; regressing to level 0 mass-erases.
    Level1,
    /// Debug is permanently disabled and option bytes are frozen. There is no
    /// way back from this level.
    Level2,
}

impl RdpLevel {
    pub const MAX: Self = Self::Level2;
}

/// An inclusive range of page offsets, counted from the base of flash, as the
/// write protection hardware describes it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WrpRange {
    pub start_page: u32,
    pub end_page: u32,
}

impl WrpRange {
    pub const fn new(start_page: u32, end_page: u32) -> Self {
        Self {
            start_page,
            end_page,
        }
    }

    /// Smallest page range covering every byte of `region`, or `None` if the
    /// region is empty or starts below `flash_base`.
    pub fn covering(region: &Region, flash_base: u32, page_size: u32) -> Option<Self> {
        if region.is_empty() || region.start < flash_base || page_size == 0 {
            return None;
        }
        let start_page = (region.start - flash_base) / page_size;
        let end_page = (region.end - 1 - flash_base) / page_size;
        Some(Self::new(start_page, end_page))
    }

    pub fn covers(&self, other: &WrpRange) -> bool {
        self.start_page <= other.start_page && other.end_page <= self.end_page
    }

    pub fn contains_page(&self, page: u32) -> bool {
        self.start_page <= page && page <= self.end_page
    }

    /// Smallest range covering both `self` and `other`.
    pub fn hull(&self, other: &WrpRange) -> Self {
        Self::new(
            self.start_page.min(other.start_page),
            self.end_page.max(other.end_page),
        )
    }
}

/// Decoded option-byte protection state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OptionByteConfig {
    pub rdp: RdpLevel,
    pub wrp: [Option<WrpRange>; MAX_WRP_ZONES],
}

impl OptionByteConfig {
    /// Checks whether some zone already protects every page in `target`.
    pub fn covers(&self, target: &WrpRange) -> bool {
        self.wrp.iter().flatten().any(|zone| zone.covers(target))
    }
}

/// Option bytes as the hardware stores them: one RDP byte and one word per
/// write protection zone.
///
/// Zone words may carry bits besides the page fields; those are preserved
/// across a decode/encode cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawOptionBytes {
    pub rdp: u8,
    pub wrp: [u32; MAX_WRP_ZONES],
}

/// How a particular device family encodes its option bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OptionByteEncoding {
    /// RDP byte meaning "level 0". Every byte that isn't `rdp_level0` or
    /// `rdp_level2` reads back as level 1.
    pub rdp_level0: u8,
    /// RDP byte written to select level 1.
    pub rdp_level1: u8,
    /// RDP byte meaning "level 2".
    pub rdp_level2: u8,
    /// Number of WRP zones actually present on the part.
    pub wrp_zones: usize,
    /// Bit position of the zone's start page field.
    pub wrp_start_shift: u32,
    /// Bit position of the zone's end page field.
    pub wrp_end_shift: u32,
    /// Width mask of each page field, unshifted.
    pub wrp_field_mask: u32,
}

impl OptionByteEncoding {
    pub fn decode_rdp(&self, raw: u8) -> RdpLevel {
        if raw == self.rdp_level0 {
            RdpLevel::Level0
        } else if raw == self.rdp_level2 {
            RdpLevel::Level2
        } else {
            RdpLevel::Level1
        }
    }

    pub fn encode_rdp(&self, level: RdpLevel) -> u8 {
        match level {
            RdpLevel::Level0 => self.rdp_level0,
            RdpLevel::Level1 => self.rdp_level1,
            RdpLevel::Level2 => self.rdp_level2,
        }
    }

    /// Decodes one zone word. A start page past the end page means the zone
    /// is disabled.
    pub fn decode_wrp(&self, raw: u32) -> Option<WrpRange> {
        let start = (raw >> self.wrp_start_shift) & self.wrp_field_mask;
        let end = (raw >> self.wrp_end_shift) & self.wrp_field_mask;
        if start > end {
            None
        } else {
            Some(WrpRange::new(start, end))
        }
    }

    /// Encodes `range` into the zone word `previous`, leaving unrelated bits
    /// alone. `None` disables the zone.
    pub fn encode_wrp(&self, previous: u32, range: Option<WrpRange>) -> u32 {
        let (start, end) = match range {
            Some(r) => (r.start_page, r.end_page),
            None => (self.wrp_field_mask, 0),
        };
        let fields = (self.wrp_field_mask << self.wrp_start_shift)
            | (self.wrp_field_mask << self.wrp_end_shift);
        (previous & !fields)
            | ((start & self.wrp_field_mask) << self.wrp_start_shift)
            | ((end & self.wrp_field_mask) << self.wrp_end_shift)
    }

    /// Whether `range` can be represented at all.
    pub fn fits(&self, range: &WrpRange) -> bool {
        range.start_page <= self.wrp_field_mask && range.end_page <= self.wrp_field_mask
    }

    pub fn decode(&self, raw: &RawOptionBytes) -> OptionByteConfig {
        let mut wrp = [None; MAX_WRP_ZONES];
        for (zone, (dst, &word)) in wrp.iter_mut().zip(&raw.wrp).enumerate() {
            if zone < self.wrp_zones {
                *dst = self.decode_wrp(word);
            }
        }
        OptionByteConfig {
            rdp: self.decode_rdp(raw.rdp),
            wrp,
        }
    }
}

/// Operations the boot core needs from the flash controller.
///
/// Reads of flash contents work whether or not the interface is unlocked.
/// Everything that modifies flash or option bytes requires the matching
/// unlock first; callers should use [`FlashSession`] rather than calling
/// `unlock`/`lock` by hand.
pub trait FlashController {
    /// Unlocks the flash control interface.
    fn unlock(&mut self) -> Result<(), FlashError>;
    /// Relocks the flash control interface. Cannot fail.
    fn lock(&mut self);
    /// Unlocks the option-byte interface. Requires the flash control interface
    /// to be unlocked already.
    fn unlock_option_bytes(&mut self) -> Result<(), FlashError>;
    /// Relocks the option-byte interface. Cannot fail.
    fn lock_option_bytes(&mut self);

    /// Copies flash contents at `addr` into `buf`.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    /// Erases the page with the given page number (counted from flash base).
    fn erase_page(&mut self, page: u32) -> Result<(), FlashError>;
    /// Programs `data` at `addr`. The target must be erased.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Reads the option bytes currently in effect.
    fn read_option_bytes(&self) -> Result<RawOptionBytes, FlashError>;
    /// Writes new option bytes. They take effect only after [`Self::relaunch`].
    fn write_option_bytes(&mut self, raw: &RawOptionBytes) -> Result<(), FlashError>;
    /// Reloads option bytes into the hardware, which resets the device. On
    /// real hardware this does not return.
    fn relaunch(&mut self);
}

/// An unlocked flash control interface. Relocks on drop.
pub struct FlashSession<'a, F: FlashController + ?Sized> {
    flash: &'a mut F,
}

impl<'a, F: FlashController + ?Sized> FlashSession<'a, F> {
    pub fn open(flash: &'a mut F) -> Result<Self, FlashError> {
        if let Err(e) = flash.unlock() {
            // A failed key sequence can leave the interface in an unknown
            // state; force it back to locked.
            flash.lock();
            return Err(e);
        }
        Ok(Self { flash })
    }

    pub fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.flash.read(addr, buf)
    }

    /// The boot sequence never erases or programs image flash. These are for
    /// an in-field updater holding the same session discipline.
    pub fn erase_page(&mut self, page: u32) -> Result<(), FlashError> {
        self.flash.erase_page(page)
    }

    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.flash.program(addr, data)
    }

    /// Additionally unlocks the option bytes for the lifetime of the returned
    /// guard.
    pub fn option_bytes(&mut self) -> Result<OptionByteSession<'_, F>, FlashError> {
        if let Err(e) = self.flash.unlock_option_bytes() {
            self.flash.lock_option_bytes();
            return Err(e);
        }
        Ok(OptionByteSession { flash: &mut *self.flash })
    }
}

impl<F: FlashController + ?Sized> Drop for FlashSession<'_, F> {
    fn drop(&mut self) {
        self.flash.lock();
    }
}

/// An unlocked option-byte interface. Relocks the option bytes on drop; the
/// enclosing [`FlashSession`] relocks the rest.
pub struct OptionByteSession<'a, F: FlashController + ?Sized> {
    flash: &'a mut F,
}

impl<F: FlashController + ?Sized> OptionByteSession<'_, F> {
    pub fn read(&self) -> Result<RawOptionBytes, FlashError> {
        self.flash.read_option_bytes()
    }

    pub fn write(&mut self, raw: &RawOptionBytes) -> Result<(), FlashError> {
        self.flash.write_option_bytes(raw)
    }
}

impl<F: FlashController + ?Sized> Drop for OptionByteSession<'_, F> {
    fn drop(&mut self) {
        self.flash.lock_option_bytes();
    }
}
