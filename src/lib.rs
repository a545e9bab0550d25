// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Secure boot core: authenticates a flash-resident firmware image and hands
//! control to it.
//!
//! Every boot runs the same sequence, driven by [`boot::BootOrchestrator`]:
//!
//! 1. Make sure flash write/read protection covers the image trailer
//!    ([`guard`]).
//! 2. Recompute the image's SHA-256 digest and compare it to the stored one
//!    ([`digest`]).
//! 3. Check the stored ECDSA-P256 signature over that digest, using a public
//!    key that must match the one compiled into this program ([`signature`]).
//! 4. Scrub shared RAM and jump to the image ([`handoff`]).
//!
//! Any failure is fatal; there is no retry and no degraded boot.
//!
//! The three checks are also available as free functions
//! ([`apply_protection`], [`verify_digest`], [`verify_signature`]) so other
//! front ends can drive them individually.

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod bsp;
pub mod crypto;
pub mod digest;
pub mod flash;
pub mod guard;
pub mod handoff;
pub mod keys;
pub mod layout;
pub mod region;
pub mod signature;
pub mod stm32;

#[cfg(test)]
mod testutil;

use core::fmt;

pub use guard::apply_protection;
pub use digest::verify_digest;
pub use signature::verify_signature;

use crypto::ProviderError;
use flash::FlashError;
use layout::LayoutError;

/// Everything that can stop a boot.
///
/// All of these are fatal. The distinctions exist for diagnostics only.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootError {
    /// Requested protection is weaker than what the part is already locked
    /// to, or doesn't cover the image trailer.
    PolicyRejected,
    /// Writing option bytes or flash failed part way.
    ProgrammingFailure,
    /// Recomputed digest differs from the stored one.
    DigestMismatch,
    /// Hash provider failed, or produced a digest of the wrong length.
    DigestComputationFailure,
    /// Embedded public key differs from the trusted one.
    KeyMismatch,
    /// Embedded public key is not a usable curve point.
    PointValidationFailure,
    /// Signature does not verify.
    SignatureInvalid,
    /// Signature provider returned an error or an unrecognized verdict.
    ProviderError,
    /// Caller passed something unusable, such as an empty digest.
    InvalidArgument,
    /// A buffer straddles the edge of a protected region.
    BufferIntrusion,
    /// The board's memory map doesn't describe a valid image layout.
    Layout(LayoutError),
    /// Flash access failed outside of option byte programming.
    Flash(FlashError),
}

impl BootError {
    /// Collapses the signature-stage failures into the single "authentication
    /// failed" verdict they represent.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::KeyMismatch
                | Self::PointValidationFailure
                | Self::SignatureInvalid
                | Self::ProviderError
        )
    }
}

impl From<LayoutError> for BootError {
    fn from(e: LayoutError) -> Self {
        Self::Layout(e)
    }
}

impl From<FlashError> for BootError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

impl From<ProviderError> for BootError {
    fn from(_: ProviderError) -> Self {
        Self::ProviderError
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyRejected => f.write_str("protection policy rejected"),
            Self::ProgrammingFailure => f.write_str("option byte programming failed"),
            Self::DigestMismatch => f.write_str("image digest mismatch"),
            Self::DigestComputationFailure => f.write_str("image digest computation failed"),
            Self::KeyMismatch => f.write_str("embedded public key is not trusted"),
            Self::PointValidationFailure => f.write_str("public key is not a valid curve point"),
            Self::SignatureInvalid => f.write_str("image signature invalid"),
            Self::ProviderError => f.write_str("crypto provider error"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::BufferIntrusion => f.write_str("buffer straddles protected region"),
            Self::Layout(e) => write!(f, "bad image layout: {e:?}"),
            Self::Flash(e) => write!(f, "flash error: {e:?}"),
        }
    }
}
