// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image signature check.
//!
//! The image trailer carries an ECDSA-P256 signature over the image digest
//! and a copy of the public key that made it. The embedded copy is only
//! accepted if it is identical to [`TRUSTED_PUBLIC_KEY`]; after that, it's
//! checked to be a real curve point and the signature is handed to the crypto
//! provider.
//!
//! Each step short-circuits. In particular the key comparison happens before
//! any provider resources exist, and the provider context, once created, is
//! released no matter which step fails.
//!
//! [`TRUSTED_PUBLIC_KEY`]: crate::keys::TRUSTED_PUBLIC_KEY

use subtle::ConstantTimeEq;

use crate::crypto::{
    CryptoProvider, PointCheck, ProviderError, SignatureStatus, VerificationContext, P256,
};
use crate::layout::{COORDINATE_LEN, DIGEST_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::BootError;

/// Checks `signature` (raw `R || S`) over `digest` using `embedded_key` (raw
/// `X || Y`), which must equal `trusted_key`.
#[inline(never)]
pub fn verify_signature<P: CryptoProvider + ?Sized>(
    crypto: &mut P,
    digest: &[u8],
    signature: &[u8],
    embedded_key: &[u8],
    trusted_key: &[u8; PUBLIC_KEY_LEN],
) -> Result<(), BootError> {
    if digest.len() != DIGEST_LEN
        || signature.len() != SIGNATURE_LEN
        || embedded_key.len() != PUBLIC_KEY_LEN
    {
        log::error!(
            "bad record lengths: digest {}, signature {}, key {}",
            digest.len(),
            signature.len(),
            embedded_key.len(),
        );
        return Err(BootError::InvalidArgument);
    }

    let key_matches: bool = embedded_key.ct_eq(&trusted_key[..]).into();
    if !key_matches {
        log::error!("embedded public key does not match trusted key");
        return Err(BootError::KeyMismatch);
    }

    let provider_failed = |e: ProviderError| {
        log::error!("signature provider error: {e:?}");
        BootError::ProviderError
    };

    // From here on the context must be released on every path, which its
    // Drop takes care of.
    let mut ctx = VerificationContext::new(crypto, &P256).map_err(provider_failed)?;

    let (x, y) = embedded_key.split_at(COORDINATE_LEN);
    ctx.set_public_key(x, y).map_err(provider_failed)?;
    let (r, s) = signature.split_at(COORDINATE_LEN);
    ctx.set_signature(r, s).map_err(provider_failed)?;

    match ctx.check_public_key().map_err(provider_failed)? {
        PointCheck::OnCurve => (),
        bad => {
            log::error!("public key rejected: {bad:?}");
            return Err(BootError::PointValidationFailure);
        }
    }

    let raw = ctx.verify(digest).map_err(provider_failed)?;
    match SignatureStatus::from_raw(raw) {
        Some(SignatureStatus::Valid) => {
            log::info!("image signature ok");
            Ok(())
        }
        Some(SignatureStatus::Invalid) => {
            log::error!("image signature invalid");
            Err(BootError::SignatureInvalid)
        }
        None => {
            log::error!("signature provider returned unknown verdict {raw:#x}");
            Err(BootError::ProviderError)
        }
    }
}
