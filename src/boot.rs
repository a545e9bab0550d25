// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boot sequence.
//!
//! ```text
//! Start -> ProtectionChecked -> DigestVerified -> SignatureVerified -> HandoffReady
//!   \              \                  \                  \
//!    `--------------`------------------`------------------`--> Faulted
//! ```
//!
//! There are no transitions out of `Faulted` and nothing is retried. The
//! sequence runs once per power-on, which `run` taking `self` enforces.

use crate::bsp::{Bsp, DeviceMemoryMap};
use crate::crypto::CryptoProvider;
use crate::flash::{FlashController, OptionByteEncoding};
use crate::guard::{apply_protection, ProtectionOutcome, ProtectionPolicy, ProtectionTarget};
use crate::handoff::{handoff, HandoffMechanism, HandoffPlan};
use crate::keys::TRUSTED_PUBLIC_KEY;
use crate::layout::{FirmwareLayout, DIGEST_LEN};
use crate::{digest, signature, BootError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootState {
    Start,
    ProtectionChecked,
    DigestVerified,
    SignatureVerified,
    HandoffReady,
    Faulted(BootError),
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::HandoffReady | Self::Faulted(_))
    }
}

/// Everything board-specific the sequence needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BootConfig {
    pub memory: DeviceMemoryMap,
    pub option_bytes: OptionByteEncoding,
    pub protection: ProtectionTarget,
    /// Address of the handoff trampoline.
    pub trampoline: u32,
}

impl BootConfig {
    pub fn for_board<B: Bsp>(trampoline: u32) -> Self {
        Self {
            memory: B::MEMORY_MAP,
            option_bytes: B::OPTION_BYTES,
            protection: B::PROTECTION,
            trampoline,
        }
    }
}

pub struct BootOrchestrator<'a, F, P, H>
where
    F: FlashController + ?Sized,
    P: CryptoProvider + ?Sized,
    H: HandoffMechanism + ?Sized,
{
    flash: &'a mut F,
    crypto: &'a mut P,
    handoff: &'a mut H,
    config: BootConfig,
    state: BootState,
    /// Filled in by the digest step, consumed by the signature step.
    digest: [u8; DIGEST_LEN],
}

impl<'a, F, P, H> BootOrchestrator<'a, F, P, H>
where
    F: FlashController + ?Sized,
    P: CryptoProvider + ?Sized,
    H: HandoffMechanism + ?Sized,
{
    pub fn new(flash: &'a mut F, crypto: &'a mut P, handoff: &'a mut H, config: BootConfig) -> Self {
        Self {
            flash,
            crypto,
            handoff,
            config,
            state: BootState::Start,
            digest: [0; DIGEST_LEN],
        }
    }

    /// Runs the sequence to a terminal state.
    ///
    /// On hardware, reaching `HandoffReady` means the image is already running
    /// and this never returns. Off-target the handoff mechanism returns, and so
    /// does this.
    pub fn run(mut self) -> BootState {
        while !self.state.is_terminal() {
            let next = self.step().unwrap_or_else(BootState::Faulted);
            match next {
                BootState::Faulted(e) => log::error!("{:?} -> Faulted: {e}", self.state),
                _ => log::info!("{:?} -> {next:?}", self.state),
            }
            self.state = next;
        }

        if self.state == BootState::HandoffReady {
            if let Err(e) = self.enter_image() {
                log::error!("HandoffReady -> Faulted: {e}");
                self.state = BootState::Faulted(e);
            }
        }
        self.state
    }

    fn step(&mut self) -> Result<BootState, BootError> {
        let layout = self.config.memory.layout()?;
        match self.state {
            BootState::Start => {
                // Nothing we protect, hash or read the trailer from may
                // overlap our own code.
                self.config
                    .memory
                    .protected
                    .check_outside_rom(&layout.footprint())?;
                self.check_protection()?;
                Ok(BootState::ProtectionChecked)
            }
            BootState::ProtectionChecked => {
                self.digest = digest::verify_digest(&*self.flash, &mut *self.crypto, &layout)?;
                Ok(BootState::DigestVerified)
            }
            BootState::DigestVerified => {
                self.check_signature(&layout)?;
                Ok(BootState::SignatureVerified)
            }
            BootState::SignatureVerified => Ok(BootState::HandoffReady),
            terminal => Ok(terminal),
        }
    }

    fn check_protection(&mut self) -> Result<(), BootError> {
        let policy = ProtectionPolicy::for_board(&self.config.memory, &self.config.protection)?;
        match apply_protection(&mut *self.flash, &self.config.option_bytes, &policy)? {
            ProtectionOutcome::Unchanged => Ok(()),
            // On hardware the reload has already reset us. Anywhere it
            // returns, the new option bytes are in effect.
            ProtectionOutcome::Applied => Ok(()),
            ProtectionOutcome::Rejected => Err(BootError::PolicyRejected),
        }
    }

    fn check_signature(&mut self, layout: &FirmwareLayout) -> Result<(), BootError> {
        let trailer = layout.read_trailer(&*self.flash)?;
        signature::verify_signature(
            &mut *self.crypto,
            &self.digest,
            &trailer.signature,
            &trailer.public_key,
            &TRUSTED_PUBLIC_KEY,
        )
    }

    fn enter_image(&mut self) -> Result<(), BootError> {
        let memory = &self.config.memory;
        let plan = HandoffPlan {
            shared_ram: memory.shared_ram,
            trampoline: self.config.trampoline,
            magic: memory.handoff_magic,
        };
        handoff(&mut *self.handoff, &memory.protected, &plan, memory.image_start)
    }
}
