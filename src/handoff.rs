// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handing control to a verified image.
//!
//! Before the jump, the RAM region shared between the boot core and the image
//! is zeroed, so nothing the boot core left there (key material, digests,
//! scratch) is visible to the image. Then control passes through a trampoline
//! that zeroes the boot core's own RAM, stack included, sets up the image's
//! stack and vector table and branches to its reset handler. The handoff magic
//! is left in `r0` so the image can tell it was launched by us.
//!
//! The boot core's RAM can only be wiped from code that no longer needs a
//! stack, which is why that half lives in the trampoline.
//!
//! The scrub and the jump go through a [`HandoffMechanism`] so the sequencing
//! can be tested off-target. [`CortexMHandoff`] is the real one.

use core::sync::atomic::{compiler_fence, Ordering};

use crate::region::{ProtectedRegions, Region};
use crate::BootError;

/// Arguments to the trampoline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrampolineCall {
    /// Address of the trampoline routine.
    pub trampoline: u32,
    /// Value left in `r0` for the image.
    pub magic: u32,
    /// Address of the image's vector table.
    pub entry: u32,
    /// The boot core's RAM, zeroed by the trampoline before the jump.
    pub wipe: Region,
}

/// Board-provided handoff parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HandoffPlan {
    /// RAM shared with the image. Must be word aligned at both ends.
    pub shared_ram: Region,
    pub trampoline: u32,
    pub magic: u32,
}

/// The two primitive steps of a handoff.
pub trait HandoffMechanism {
    /// Zeroes every word of `region`.
    fn scrub(&mut self, region: &Region);
    /// Jumps through the trampoline. Doesn't return on hardware.
    fn enter(&mut self, call: &TrampolineCall);
}

/// Scrubs the shared RAM in `plan` and enters the image at `entry`, asking the
/// trampoline to wipe `protected.ram` on the way.
///
/// The shared RAM has to stay clear of the boot core's own RAM: a region that
/// straddles it is refused as an intrusion, before anything is written.
pub fn handoff<H: HandoffMechanism + ?Sized>(
    mechanism: &mut H,
    protected: &ProtectedRegions,
    plan: &HandoffPlan,
    entry: u32,
) -> Result<(), BootError> {
    let ram = plan.shared_ram;
    for region in [&ram, &protected.ram] {
        if region.start % 4 != 0 || region.end % 4 != 0 || region.end < region.start {
            log::error!("RAM {:#x}..{:#x} is not word aligned", region.start, region.end);
            return Err(BootError::InvalidArgument);
        }
    }
    protected.check_outside_ram(&ram)?;

    mechanism.scrub(&ram);

    // Every store above has to be issued before the jump below.
    compiler_fence(Ordering::SeqCst);

    log::info!("entering image at {entry:#x}");
    mechanism.enter(&TrampolineCall {
        trampoline: plan.trampoline,
        magic: plan.magic,
        entry,
        wipe: protected.ram,
    });
    Ok(())
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::cortex_m_handoff::{trampoline_address, CortexMHandoff};

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod cortex_m_handoff {
    use super::{HandoffMechanism, TrampolineCall};
    use crate::region::Region;

    // Expects r0 = magic, r1 = image vector table, r2..r3 = the boot core's
    // RAM, word aligned. Zeroes that RAM, which destroys the caller's stack, so
    // nothing past the loop may touch memory except the image's vector table.
    // Installs the image's vector table and stack, clears every register the
    // image doesn't control, unmasks interrupts as reset would have left them,
    // and branches to the image's reset handler with r0 untouched.
    core::arch::global_asm!(
        ".syntax unified",
        ".thumb",
        ".section .text.secboot_trampoline",
        ".global secboot_trampoline",
        ".type secboot_trampoline, %function",
        ".thumb_func",
        "secboot_trampoline:",
        "    movs r4, #0",
        "1:  cmp r2, r3",
        "    bhs 2f",
        "    str r4, [r2], #4",
        "    b 1b",
        "2:  ldr r2, [r1]",
        "    ldr r3, [r1, #4]",
        "    movw r4, #:lower16:0xE000ED08",
        "    movt r4, #:upper16:0xE000ED08",
        "    str r1, [r4]",
        "    dsb",
        "    isb",
        "    msr MSP, r2",
        "    movs r1, #0",
        "    movs r2, #0",
        "    movs r4, #0",
        "    movs r5, #0",
        "    movs r6, #0",
        "    movs r7, #0",
        "    mov r8, r7",
        "    mov r9, r7",
        "    mov r10, r7",
        "    mov r11, r7",
        "    mov r12, r7",
        "    mov r14, r7",
        "    cpsie i",
        "    bx r3",
    );

    extern "C" {
        fn secboot_trampoline();
    }

    /// Address to put in [`super::HandoffPlan::trampoline`].
    pub fn trampoline_address() -> u32 {
        secboot_trampoline as usize as u32
    }

    /// Handoff on the running Cortex-M core.
    pub struct CortexMHandoff;

    impl HandoffMechanism for CortexMHandoff {
        fn scrub(&mut self, region: &Region) {
            for addr in region.as_range().step_by(4) {
                // Safety: the caller checked the region is word aligned and
                // clear of our own RAM, so nothing we still use lives here.
                unsafe {
                    core::ptr::write_volatile(addr as *mut u32, 0);
                }
            }
        }

        fn enter(&mut self, call: &TrampolineCall) {
            // No handler may run on a stack that's being zeroed. The
            // trampoline unmasks again right before the image starts.
            cortex_m::interrupt::disable();
            cortex_m::asm::dsb();

            // Safety: there's no coming back from this, and the trampoline
            // takes only register arguments.
            unsafe {
                core::arch::asm!(
                    "bx r12",
                    in("r0") call.magic,
                    in("r1") call.entry,
                    in("r2") call.wipe.start,
                    in("r3") call.wipe.end,
                    // Thumb bit.
                    in("r12") call.trampoline | 1,
                    options(noreturn),
                )
            }
        }
    }
}
