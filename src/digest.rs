// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image digest check.

use subtle::ConstantTimeEq;

use crate::crypto::{CryptoProvider, ProviderError, MAX_DIGEST_LEN};
use crate::flash::FlashController;
use crate::layout::{FirmwareLayout, DIGEST_LEN};
use crate::BootError;

/// Bytes of flash fed to the hash per step. Flash is memory mapped on every
/// part we support, so this only bounds the stack buffer.
const CHUNK_SIZE: usize = 256;

/// Recomputes the SHA-256 of the page-aligned image and compares it with the
/// stored digest record. On success, returns the digest, which is what the
/// signature covers.
///
/// Padding between the end of the image and the page boundary is hashed
/// too; it is part of what was signed.
#[inline(never)]
pub fn verify_digest<F, P>(
    flash: &F,
    crypto: &mut P,
    layout: &FirmwareLayout,
) -> Result<[u8; DIGEST_LEN], BootError>
where
    F: FlashController + ?Sized,
    P: CryptoProvider + ?Sized,
{
    let mut computed = [0; MAX_DIGEST_LEN];
    let len = hash_region(flash, crypto, layout, &mut computed)?;

    // A provider handing back the wrong amount of digest is broken, not
    // tampered with. Both stop the boot, but they shouldn't read the same in
    // a log.
    if len != DIGEST_LEN {
        log::error!("hash provider produced {len} bytes, expected {DIGEST_LEN}");
        return Err(BootError::DigestComputationFailure);
    }

    let mut stored = [0; DIGEST_LEN];
    flash.read(layout.digest_offset(), &mut stored)?;

    let matches: bool = computed[..DIGEST_LEN].ct_eq(&stored).into();
    if !matches {
        log::error!("image digest mismatch");
        return Err(BootError::DigestMismatch);
    }

    log::info!("image digest ok");
    Ok(stored)
}

fn hash_region<F, P>(
    flash: &F,
    crypto: &mut P,
    layout: &FirmwareLayout,
    out: &mut [u8; MAX_DIGEST_LEN],
) -> Result<usize, BootError>
where
    F: FlashController + ?Sized,
    P: CryptoProvider + ?Sized,
{
    let computation_failed = |e: ProviderError| {
        log::error!("hash provider error: {e:?}");
        BootError::DigestComputationFailure
    };

    let region = layout.image_region();
    let mut state = crypto.hash_start().map_err(computation_failed)?;
    let mut buf = [0u8; CHUNK_SIZE];
    let mut addr = region.start;
    while addr < region.end {
        let n = (region.end - addr).min(CHUNK_SIZE as u32) as usize;
        let chunk = &mut buf[..n];
        flash.read(addr, chunk)?;
        crypto
            .hash_update(&mut state, chunk)
            .map_err(computation_failed)?;
        addr += n as u32;
    }
    crypto.hash_finish(state, out).map_err(computation_failed)
}
