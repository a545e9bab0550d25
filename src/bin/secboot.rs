// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The secure boot program.
//!
//! This contains the entry point and fault handling for the boot core. The
//! lib crate does all of the actual checking; the code here wires it to the
//! real hardware for the selected board.

#![no_std]
#![no_main]

use core::sync::atomic::{compiler_fence, Ordering};

use cortex_m_rt::{entry, exception, ExceptionFrame};
use secboot::boot::{BootConfig, BootOrchestrator, BootState};
use secboot::bsp::{Bsp, FaultPolicy};
use secboot::crypto::SoftCrypto;
use secboot::handoff::{trampoline_address, CortexMHandoff};
use secboot::stm32::Stm32Flash;

// Select the appropriate BSP type as `Board`
cfg_if::cfg_if! {
    if #[cfg(feature = "target-board-nucleo-l476rg")] {
        use secboot::bsp::nucleo_l476rg::Board;
    } else if #[cfg(feature = "target-board-b-l475e-iot01a")] {
        use secboot::bsp::b_l475e_iot01a::Board;
    } else if #[cfg(feature = "target-board-nucleo-l4r5zi")] {
        use secboot::bsp::nucleo_l4r5zi::Board;
    }
}

/// Boot core entry point, reached after `cortex_m_rt` has set up RAM.
#[entry]
fn main() -> ! {
    let map = Board::MEMORY_MAP;

    // Safety: this is the only place the flash peripheral is claimed, and
    // `entry` keeps `main` from being called again.
    let mut flash = unsafe { Stm32Flash::new(map.flash, map.page_size, map.bank_pages) };
    let mut crypto = SoftCrypto::new();
    let mut handoff = CortexMHandoff;
    let config = BootConfig::for_board::<Board>(trampoline_address());

    match BootOrchestrator::new(&mut flash, &mut crypto, &mut handoff, config).run() {
        BootState::Faulted(e) => log::error!("boot failed: {e}"),
        // The handoff doesn't come back.
        state => log::error!("boot returned in state {state:?}"),
    }
    fault()
}

/// The single exit for every fatal condition.
fn fault() -> ! {
    cortex_m::interrupt::disable();
    Board::indicate_fault();

    match Board::FAULT_POLICY {
        FaultPolicy::Reset => cortex_m::peripheral::SCB::sys_reset(),
        FaultPolicy::Halt => loop {
            // Keeps LLVM from turning the loop into a UDF without costing an
            // instruction.
            compiler_fence(Ordering::SeqCst);
        },
    }
}

#[panic_handler]
fn panic_handler(_: &core::panic::PanicInfo) -> ! {
    // We use a BKPT instruction to wake any attached debugger. If no debugger
    // is attached, BKPT escalates into a HardFault, falling to the handler
    // below, which applies the board's fault policy.
    loop {
        cortex_m::asm::bkpt();
    }
}

#[exception]
unsafe fn HardFault(_ef: &ExceptionFrame) -> ! {
    fault()
}
