// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level [`FlashController`] for the STM32L4 family flash interface.
//!
//! This talks to the FLASH peripheral by raw address rather than through a
//! PAC: the handful of registers involved hasn't changed across the L4 and L4+
//! parts we support, and it keeps the boot core free of a per-part PAC
//! dependency.

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{compiler_fence, Ordering};

use crate::flash::{FlashController, FlashError, OptionByteEncoding, RawOptionBytes};
use crate::region::Region;

/// Option byte layout shared by the L4 and L4+ parts.
///
/// RDP lives in the low byte of `FLASH_OPTR`. WRP zones are, in order, WRP1A,
/// WRP1B, WRP2A and WRP2B, each with the start page in bits 0..8 and the end
/// page in bits 16..24.
pub const L4_OPTION_BYTES: OptionByteEncoding = OptionByteEncoding {
    rdp_level0: 0xAA,
    rdp_level1: 0xBB,
    rdp_level2: 0xCC,
    wrp_zones: 4,
    wrp_start_shift: 0,
    wrp_end_shift: 16,
    wrp_field_mask: 0xFF,
};

/// Base address of the FLASH register block.
pub const FLASH_REGS_BASE: u32 = 0x4002_2000;

const KEYR: u32 = 0x08;
const OPTKEYR: u32 = 0x0C;
const SR: u32 = 0x10;
const CR: u32 = 0x14;
const OPTR: u32 = 0x20;
const WRP_REGS: [u32; 4] = [0x2C, 0x30, 0x4C, 0x50];

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;
const OPT_KEY1: u32 = 0x0819_2A3B;
const OPT_KEY2: u32 = 0x4C5D_6E7F;

const SR_EOP: u32 = 1 << 0;
const SR_OPERR: u32 = 1 << 1;
const SR_PROGERR: u32 = 1 << 3;
const SR_WRPERR: u32 = 1 << 4;
const SR_PGAERR: u32 = 1 << 5;
const SR_SIZERR: u32 = 1 << 6;
const SR_PGSERR: u32 = 1 << 7;
const SR_MISERR: u32 = 1 << 8;
const SR_FASTERR: u32 = 1 << 9;
const SR_OPTVERR: u32 = 1 << 15;
const SR_BSY: u32 = 1 << 16;
const SR_ERRORS: u32 = SR_OPERR
    | SR_PROGERR
    | SR_WRPERR
    | SR_PGAERR
    | SR_SIZERR
    | SR_PGSERR
    | SR_MISERR
    | SR_FASTERR
    | SR_OPTVERR;

const CR_PG: u32 = 1 << 0;
const CR_PER: u32 = 1 << 1;
const CR_PNB_SHIFT: u32 = 3;
const CR_PNB_MASK: u32 = 0xFF << CR_PNB_SHIFT;
const CR_BKER: u32 = 1 << 11;
const CR_STRT: u32 = 1 << 16;
const CR_OPTSTRT: u32 = 1 << 17;
const CR_OBL_LAUNCH: u32 = 1 << 27;
const CR_OPTLOCK: u32 = 1 << 30;
const CR_LOCK: u32 = 1 << 31;

/// Programming granularity: one double word.
const PROGRAM_UNIT: usize = 8;

/// The on-chip flash of an STM32L4-family part.
pub struct Stm32Flash {
    regs: u32,
    flash: Region,
    page_size: u32,
    /// Pages per bank. Page numbers past this go to bank 2.
    bank_pages: u32,
}

impl Stm32Flash {
    /// # Safety
    ///
    /// Claims the FLASH peripheral at `FLASH_REGS_BASE`. There must be only one
    /// of these, and nothing else may drive the peripheral while it exists.
    pub unsafe fn new(flash: Region, page_size: u32, bank_pages: u32) -> Self {
        Self {
            regs: FLASH_REGS_BASE,
            flash,
            page_size,
            bank_pages,
        }
    }

    fn read_reg(&self, offset: u32) -> u32 {
        // Safety: `new`'s contract gives us the register block.
        unsafe { read_volatile((self.regs + offset) as *const u32) }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        // Safety: `new`'s contract gives us the register block.
        unsafe { write_volatile((self.regs + offset) as *mut u32, value) }
    }

    fn modify_cr(&mut self, f: impl FnOnce(u32) -> u32) {
        let cr = self.read_reg(CR);
        self.write_reg(CR, f(cr));
    }

    fn wait_idle(&self) {
        while self.read_reg(SR) & SR_BSY != 0 {}
    }

    fn clear_status(&mut self) {
        // Write-one-to-clear.
        self.write_reg(SR, SR_ERRORS | SR_EOP);
    }

    /// Waits out the current operation and turns its error flags into a
    /// `FlashError`, with `otherwise` standing in for anything that isn't
    /// write protection.
    fn finish(&mut self, otherwise: FlashError) -> Result<(), FlashError> {
        self.wait_idle();
        let sr = self.read_reg(SR);
        self.clear_status();
        if sr & SR_WRPERR != 0 {
            Err(FlashError::WriteProtected)
        } else if sr & SR_ERRORS != 0 {
            log::error!("flash SR {sr:#010x}");
            Err(otherwise)
        } else {
            Ok(())
        }
    }

    fn check_unlocked(&self) -> Result<(), FlashError> {
        if self.read_reg(CR) & CR_LOCK != 0 {
            Err(FlashError::Locked)
        } else {
            Ok(())
        }
    }

    fn check_bounds(&self, addr: u32, len: usize) -> Result<(), FlashError> {
        let end = addr.checked_add(len as u32).ok_or(FlashError::OutOfBounds)?;
        if self.flash.covers(&Region::new(addr, end)) {
            Ok(())
        } else {
            Err(FlashError::OutOfBounds)
        }
    }
}

impl FlashController for Stm32Flash {
    fn unlock(&mut self) -> Result<(), FlashError> {
        if self.read_reg(CR) & CR_LOCK != 0 {
            self.write_reg(KEYR, KEY1);
            self.write_reg(KEYR, KEY2);
        }
        // A bad key sequence locks the interface until the next reset, so
        // there's nothing to retry.
        if self.read_reg(CR) & CR_LOCK != 0 {
            return Err(FlashError::UnlockFailed);
        }
        Ok(())
    }

    fn lock(&mut self) {
        self.modify_cr(|cr| cr | CR_LOCK);
    }

    fn unlock_option_bytes(&mut self) -> Result<(), FlashError> {
        self.check_unlocked()?;
        if self.read_reg(CR) & CR_OPTLOCK != 0 {
            self.write_reg(OPTKEYR, OPT_KEY1);
            self.write_reg(OPTKEYR, OPT_KEY2);
        }
        if self.read_reg(CR) & CR_OPTLOCK != 0 {
            return Err(FlashError::UnlockFailed);
        }
        Ok(())
    }

    fn lock_option_bytes(&mut self) {
        self.modify_cr(|cr| cr | CR_OPTLOCK);
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check_bounds(addr, buf.len())?;
        // Safety: bounds checked against the flash array, which is always
        // readable by the core.
        let src = unsafe { core::slice::from_raw_parts(addr as *const u8, buf.len()) };
        buf.copy_from_slice(src);
        Ok(())
    }

    fn erase_page(&mut self, page: u32) -> Result<(), FlashError> {
        self.check_unlocked()?;
        if page >= self.flash.len() / self.page_size {
            return Err(FlashError::OutOfBounds);
        }
        let (bank2, pnb) = if page >= self.bank_pages {
            (CR_BKER, page - self.bank_pages)
        } else {
            (0, page)
        };

        self.wait_idle();
        self.clear_status();
        self.modify_cr(|cr| {
            (cr & !(CR_PNB_MASK | CR_BKER)) | CR_PER | bank2 | ((pnb << CR_PNB_SHIFT) & CR_PNB_MASK)
        });
        self.modify_cr(|cr| cr | CR_STRT);
        let result = self.finish(FlashError::EraseFailed);
        self.modify_cr(|cr| cr & !(CR_PER | CR_PNB_MASK | CR_BKER));
        result
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.check_unlocked()?;
        if addr as usize % PROGRAM_UNIT != 0 || data.len() % PROGRAM_UNIT != 0 {
            return Err(FlashError::Unaligned);
        }
        self.check_bounds(addr, data.len())?;

        self.wait_idle();
        self.clear_status();
        self.modify_cr(|cr| cr | CR_PG);

        let mut result = Ok(());
        for (i, unit) in data.chunks_exact(PROGRAM_UNIT).enumerate() {
            let dst = (addr as usize + i * PROGRAM_UNIT) as *mut u32;
            let lo = u32::from_le_bytes([unit[0], unit[1], unit[2], unit[3]]);
            let hi = u32::from_le_bytes([unit[4], unit[5], unit[6], unit[7]]);
            // Safety: bounds checked above, and PG is set so the writes
            // program the array. The two halves must go out in order.
            unsafe {
                write_volatile(dst, lo);
                compiler_fence(Ordering::SeqCst);
                write_volatile(dst.add(1), hi);
            }
            result = self.finish(FlashError::ProgramFailed);
            if result.is_err() {
                break;
            }
        }

        self.modify_cr(|cr| cr & !CR_PG);
        result
    }

    fn read_option_bytes(&self) -> Result<RawOptionBytes, FlashError> {
        let mut wrp = [0; 4];
        for (dst, &reg) in wrp.iter_mut().zip(&WRP_REGS) {
            *dst = self.read_reg(reg);
        }
        Ok(RawOptionBytes {
            rdp: self.read_reg(OPTR) as u8,
            wrp,
        })
    }

    fn write_option_bytes(&mut self, raw: &RawOptionBytes) -> Result<(), FlashError> {
        self.check_unlocked()?;
        if self.read_reg(CR) & CR_OPTLOCK != 0 {
            return Err(FlashError::Locked);
        }

        self.wait_idle();
        self.clear_status();

        let optr = self.read_reg(OPTR);
        self.write_reg(OPTR, (optr & !0xFF) | u32::from(raw.rdp));
        for (&reg, &word) in WRP_REGS.iter().zip(&raw.wrp) {
            self.write_reg(reg, word);
        }

        self.modify_cr(|cr| cr | CR_OPTSTRT);
        self.finish(FlashError::OptionBytesFailed)
    }

    fn relaunch(&mut self) {
        // OBL_LAUNCH is only writable with OPTLOCK clear. Nothing else happens
        // between here and the reset, so there is no session to scope.
        if self.unlock().and_then(|_| self.unlock_option_bytes()).is_ok() {
            self.modify_cr(|cr| cr | CR_OBL_LAUNCH);
        } else {
            // The new option bytes still load on the next power-on reset.
            log::error!("option byte reload refused, resetting instead");
            cortex_m::peripheral::SCB::sys_reset();
        }
        loop {
            // The reload resets the part. Spin until it does.
            compiler_fence(Ordering::SeqCst);
        }
    }
}
