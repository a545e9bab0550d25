// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the hash and signature primitives.
//!
//! The boot core treats the primitives as a black box behind
//! [`CryptoProvider`]. The interface mirrors the shape of vendor crypto
//! libraries and hardware accelerators: a hash is streamed through
//! start/update/finish, and a signature check builds up a context object (curve
//! parameters, then a public key point, then a signature), checks it, and must
//! then release it.
//!
//! That last step is the one that's easy to get wrong, so nothing outside this
//! module calls `context_release` directly. A [`VerificationContext`] owns the
//! provider's context and releases it when dropped, on every path out.
//!
//! [`SoftCrypto`] implements the provider in software using the RustCrypto
//! `sha2` and `p256` crates.

use hex_literal::hex;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use p256::elliptic_curve::sec1::FromEncodedPoint;
use p256::{EncodedPoint, FieldBytes, PublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::layout::{COORDINATE_LEN, DIGEST_LEN, SIGNATURE_LEN};

/// Largest digest any provider may hand back. Providers that produce more than
/// `DIGEST_LEN` bytes are detected and rejected rather than truncated.
pub const MAX_DIGEST_LEN: usize = 64;

/// Opaque error code from a crypto provider.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProviderError(pub u32);

impl ProviderError {
    pub const UNSUPPORTED_CURVE: Self = Self(1);
    pub const BAD_LENGTH: Self = Self(2);
    pub const NOT_LOADED: Self = Self(3);
}

/// Short Weierstrass curve domain parameters, big-endian.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CurveParams {
    pub p: [u8; 32],
    pub a: [u8; 32],
    pub b: [u8; 32],
    pub n: [u8; 32],
    pub gx: [u8; 32],
    pub gy: [u8; 32],
}

/// NIST P-256 / secp256r1.
pub const P256: CurveParams = CurveParams {
    p: hex!("ffffffff00000001000000000000000000000000ffffffffffffffffffffffff"),
    a: hex!("ffffffff00000001000000000000000000000000fffffffffffffffffffffffc"),
    b: hex!("5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b"),
    n: hex!("ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551"),
    gx: hex!("6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296"),
    gy: hex!("4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5"),
};

/// Result of checking a public key point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PointCheck {
    OnCurve,
    NotOnCurve,
    Infinity,
}

/// Raw verdict words a provider returns from a signature check.
///
/// These are deliberately not 0/1: a glitched or uninitialized result word is
/// vanishingly unlikely to land on `Valid`, and anything that isn't one of
/// these two values is treated as a provider failure.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum SignatureStatus {
    Valid = 0x5ac3_3ca5,
    Invalid = 0xa53c_c35a,
}

impl SignatureStatus {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::from_u32(raw)
    }
}

/// Hash and signature primitives.
pub trait CryptoProvider {
    /// In-progress hash computation.
    type HashState;
    /// Everything the provider needs to check one signature: curve, key point,
    /// signature, and whatever scratch memory it uses.
    type Context;

    fn hash_start(&mut self) -> Result<Self::HashState, ProviderError>;
    fn hash_update(
        &mut self,
        state: &mut Self::HashState,
        data: &[u8],
    ) -> Result<(), ProviderError>;
    /// Finishes the hash, writes the digest to the front of `out`, and returns
    /// its length.
    fn hash_finish(
        &mut self,
        state: Self::HashState,
        out: &mut [u8; MAX_DIGEST_LEN],
    ) -> Result<usize, ProviderError>;

    /// One-shot hash of `data`.
    fn hash(
        &mut self,
        data: &[u8],
        out: &mut [u8; MAX_DIGEST_LEN],
    ) -> Result<usize, ProviderError> {
        let mut state = self.hash_start()?;
        self.hash_update(&mut state, data)?;
        self.hash_finish(state, out)
    }

    fn context_create(&mut self, curve: &CurveParams) -> Result<Self::Context, ProviderError>;
    fn context_set_public_key(
        &mut self,
        ctx: &mut Self::Context,
        x: &[u8],
        y: &[u8],
    ) -> Result<(), ProviderError>;
    fn context_set_signature(
        &mut self,
        ctx: &mut Self::Context,
        r: &[u8],
        s: &[u8],
    ) -> Result<(), ProviderError>;
    fn context_check_public_key(
        &mut self,
        ctx: &mut Self::Context,
    ) -> Result<PointCheck, ProviderError>;
    /// Checks the loaded signature over `digest`, returning a raw
    /// [`SignatureStatus`] word.
    fn context_verify(
        &mut self,
        ctx: &mut Self::Context,
        digest: &[u8],
    ) -> Result<u32, ProviderError>;
    /// Frees everything associated with `ctx`. Must tolerate a context that
    /// was only partially loaded.
    fn context_release(&mut self, ctx: &mut Self::Context);
}

/// A provider context that is released when this goes out of scope.
pub struct VerificationContext<'p, P: CryptoProvider + ?Sized> {
    provider: &'p mut P,
    ctx: P::Context,
}

impl<'p, P: CryptoProvider + ?Sized> VerificationContext<'p, P> {
    pub fn new(provider: &'p mut P, curve: &CurveParams) -> Result<Self, ProviderError> {
        let ctx = provider.context_create(curve)?;
        Ok(Self { provider, ctx })
    }

    pub fn set_public_key(&mut self, x: &[u8], y: &[u8]) -> Result<(), ProviderError> {
        self.provider.context_set_public_key(&mut self.ctx, x, y)
    }

    pub fn set_signature(&mut self, r: &[u8], s: &[u8]) -> Result<(), ProviderError> {
        self.provider.context_set_signature(&mut self.ctx, r, s)
    }

    pub fn check_public_key(&mut self) -> Result<PointCheck, ProviderError> {
        self.provider.context_check_public_key(&mut self.ctx)
    }

    pub fn verify(&mut self, digest: &[u8]) -> Result<u32, ProviderError> {
        self.provider.context_verify(&mut self.ctx, digest)
    }
}

impl<P: CryptoProvider + ?Sized> Drop for VerificationContext<'_, P> {
    fn drop(&mut self) {
        self.provider.context_release(&mut self.ctx);
    }
}

/// Software provider built on RustCrypto.
#[derive(Default)]
pub struct SoftCrypto;

impl SoftCrypto {
    pub const fn new() -> Self {
        Self
    }
}

/// Context for [`SoftCrypto`]: raw key and signature bytes, wiped on release.
#[derive(Zeroize)]
pub struct SoftContext {
    x: [u8; COORDINATE_LEN],
    y: [u8; COORDINATE_LEN],
    signature: [u8; SIGNATURE_LEN],
    key_loaded: bool,
    signature_loaded: bool,
}

impl SoftContext {
    fn encoded_point(&self) -> EncodedPoint {
        EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&self.x),
            FieldBytes::from_slice(&self.y),
            false,
        )
    }
}

fn copy_exact(dst: &mut [u8], src: &[u8]) -> Result<(), ProviderError> {
    if dst.len() != src.len() {
        return Err(ProviderError::BAD_LENGTH);
    }
    dst.copy_from_slice(src);
    Ok(())
}

impl CryptoProvider for SoftCrypto {
    type HashState = Sha256;
    type Context = SoftContext;

    fn hash_start(&mut self) -> Result<Sha256, ProviderError> {
        Ok(Sha256::new())
    }

    fn hash_update(&mut self, state: &mut Sha256, data: &[u8]) -> Result<(), ProviderError> {
        state.update(data);
        Ok(())
    }

    fn hash_finish(
        &mut self,
        state: Sha256,
        out: &mut [u8; MAX_DIGEST_LEN],
    ) -> Result<usize, ProviderError> {
        out[..DIGEST_LEN].copy_from_slice(&state.finalize());
        Ok(DIGEST_LEN)
    }

    fn context_create(&mut self, curve: &CurveParams) -> Result<SoftContext, ProviderError> {
        if curve != &P256 {
            return Err(ProviderError::UNSUPPORTED_CURVE);
        }
        Ok(SoftContext {
            x: [0; COORDINATE_LEN],
            y: [0; COORDINATE_LEN],
            signature: [0; SIGNATURE_LEN],
            key_loaded: false,
            signature_loaded: false,
        })
    }

    fn context_set_public_key(
        &mut self,
        ctx: &mut SoftContext,
        x: &[u8],
        y: &[u8],
    ) -> Result<(), ProviderError> {
        copy_exact(&mut ctx.x, x)?;
        copy_exact(&mut ctx.y, y)?;
        ctx.key_loaded = true;
        Ok(())
    }

    fn context_set_signature(
        &mut self,
        ctx: &mut SoftContext,
        r: &[u8],
        s: &[u8],
    ) -> Result<(), ProviderError> {
        let (r_dst, s_dst) = ctx.signature.split_at_mut(COORDINATE_LEN);
        copy_exact(r_dst, r)?;
        copy_exact(s_dst, s)?;
        ctx.signature_loaded = true;
        Ok(())
    }

    fn context_check_public_key(
        &mut self,
        ctx: &mut SoftContext,
    ) -> Result<PointCheck, ProviderError> {
        if !ctx.key_loaded {
            return Err(ProviderError::NOT_LOADED);
        }
        // Affine (0, 0) is how the identity is conventionally spelled in raw
        // X || Y form; it is not on P-256.
        if ctx.x.iter().chain(&ctx.y).all(|&b| b == 0) {
            return Ok(PointCheck::Infinity);
        }
        let on_curve: Option<PublicKey> =
            PublicKey::from_encoded_point(&ctx.encoded_point()).into();
        Ok(if on_curve.is_some() {
            PointCheck::OnCurve
        } else {
            PointCheck::NotOnCurve
        })
    }

    fn context_verify(
        &mut self,
        ctx: &mut SoftContext,
        digest: &[u8],
    ) -> Result<u32, ProviderError> {
        if !ctx.key_loaded || !ctx.signature_loaded {
            return Err(ProviderError::NOT_LOADED);
        }
        let Ok(key) = VerifyingKey::from_encoded_point(&ctx.encoded_point()) else {
            return Ok(SignatureStatus::Invalid as u32);
        };
        // Zero or out-of-range scalars can't be a valid signature.
        let Ok(signature) = Signature::from_slice(&ctx.signature) else {
            return Ok(SignatureStatus::Invalid as u32);
        };
        Ok(match key.verify_prehash(digest, &signature) {
            Ok(()) => SignatureStatus::Valid as u32,
            Err(_) => SignatureStatus::Invalid as u32,
        })
    }

    fn context_release(&mut self, ctx: &mut SoftContext) {
        ctx.zeroize();
    }
}
