// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fakes and fixtures shared by the unit tests.

use hex_literal::hex;
use p256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::crypto::{CryptoProvider, CurveParams, PointCheck, ProviderError, MAX_DIGEST_LEN};
use crate::flash::{FlashController, FlashError, OptionByteEncoding, RawOptionBytes, RdpLevel};
use crate::handoff::{HandoffMechanism, TrampolineCall};
use crate::keys::TRUSTED_PUBLIC_KEY;
use crate::layout::{FirmwareLayout, ImageTrailer};
use crate::region::Region;
use crate::stm32;

pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE: u32 = 512 * 1024;
pub const PAGE_SIZE: u32 = 0x800;
pub const L4_ENCODING: OptionByteEncoding = stm32::L4_OPTION_BYTES;

/// Where test images go: just past a 64 KiB boot core.
pub const IMAGE_START: u32 = FLASH_BASE + 0x1_0000;

/// Private half of [`TRUSTED_PUBLIC_KEY`]: SHA-256 of "secboot development
/// signing key".
pub const DEV_SIGNING_KEY: [u8; 32] =
    hex!("7142ffa69e6d489f3da24560ab062e7cb682088c98079cf0ff307a4cf7e19854");

/// An image that doesn't end on a page boundary, so padding gets exercised.
pub fn test_layout() -> FirmwareLayout {
    FirmwareLayout::new(IMAGE_START, 60_000, PAGE_SIZE).unwrap()
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&DEV_SIGNING_KEY.into()).unwrap()
}

/// Signs a prehashed digest with the development key, as raw `R || S`.
pub fn sign_digest(digest: &[u8]) -> [u8; 64] {
    let signature: Signature = signing_key().sign_prehash(digest).unwrap();
    let mut out = [0; 64];
    out.copy_from_slice(&signature.to_bytes());
    out
}

/// Development public key as raw `X || Y`, derived from the private key.
pub fn test_public_key() -> [u8; 64] {
    let key = VerifyingKey::from(&signing_key());
    let point = key.to_encoded_point(false);
    let mut out = [0; 64];
    // Skip the SEC1 uncompressed tag.
    out.copy_from_slice(&point.as_bytes()[1..]);
    out
}

/// Builds the flash contents for a signed image described by `layout`:
/// pattern bytes, erased padding, then the trailer.
pub fn signed_image_bytes(layout: &FirmwareLayout) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..layout.image_size()).map(|i| (i * 7 + 3) as u8).collect();
    bytes.resize(layout.page_aligned_size() as usize, 0xFF);

    let digest = Sha256::digest(&bytes);
    let trailer = ImageTrailer {
        digest: digest.into(),
        signature: sign_digest(&digest),
        public_key: TRUSTED_PUBLIC_KEY,
    };
    bytes.extend_from_slice(zerocopy::AsBytes::as_bytes(&trailer));
    bytes
}

/// Writes a correctly signed image into `flash`, as an updater would.
pub fn install_signed_image(flash: &mut FakeFlash, layout: &FirmwareLayout) {
    flash.install(layout.image_start(), &signed_image_bytes(layout));
}

/// In-memory flash with a simulated option byte engine.
///
/// Option byte writes are staged and only take effect on `relaunch`, like the
/// real reload. At RDP level 2 the option bytes refuse writes. Pages inside an
/// active WRP zone refuse erase and program.
pub struct FakeFlash {
    memory: Vec<u8>,
    locked: bool,
    option_bytes_locked: bool,
    loaded: RawOptionBytes,
    staged: Option<RawOptionBytes>,
    unlocks: usize,
    option_byte_writes: usize,
    relaunches: usize,
    pub fail_unlock: bool,
    pub fail_option_write: bool,
}

impl FakeFlash {
    /// Factory-fresh part: erased, RDP level 0, no write protection.
    pub fn new() -> Self {
        let disabled = L4_ENCODING.encode_wrp(0, None);
        Self::with_option_bytes(RawOptionBytes {
            rdp: L4_ENCODING.rdp_level0,
            wrp: [disabled; 4],
        })
    }

    pub fn with_option_bytes(loaded: RawOptionBytes) -> Self {
        Self {
            memory: vec![0xFF; FLASH_SIZE as usize],
            locked: true,
            option_bytes_locked: true,
            loaded,
            staged: None,
            unlocks: 0,
            option_byte_writes: 0,
            relaunches: 0,
            fail_unlock: false,
            fail_option_write: false,
        }
    }

    /// Writes bytes directly, bypassing locks and protection.
    pub fn install(&mut self, addr: u32, data: &[u8]) {
        let start = (addr - FLASH_BASE) as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
    }

    /// XORs `mask` into one byte, bypassing locks and protection.
    pub fn corrupt(&mut self, addr: u32, mask: u8) {
        self.memory[(addr - FLASH_BASE) as usize] ^= mask;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn option_bytes_locked(&self) -> bool {
        self.option_bytes_locked
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocks
    }

    pub fn option_byte_writes(&self) -> usize {
        self.option_byte_writes
    }

    pub fn relaunches(&self) -> usize {
        self.relaunches
    }

    /// Option bytes currently in effect.
    pub fn option_bytes(&self) -> RawOptionBytes {
        self.loaded
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, FlashError> {
        let start = addr.checked_sub(FLASH_BASE).ok_or(FlashError::OutOfBounds)? as usize;
        if start + len > self.memory.len() {
            return Err(FlashError::OutOfBounds);
        }
        Ok(start)
    }

    fn page_protected(&self, page: u32) -> bool {
        L4_ENCODING
            .decode(&self.loaded)
            .wrp
            .iter()
            .flatten()
            .any(|zone| zone.contains_page(page))
    }
}

impl FlashController for FakeFlash {
    fn unlock(&mut self) -> Result<(), FlashError> {
        if self.fail_unlock {
            return Err(FlashError::UnlockFailed);
        }
        self.unlocks += 1;
        self.locked = false;
        Ok(())
    }

    fn lock(&mut self) {
        self.locked = true;
        // Locking the control interface locks option bytes too.
        self.option_bytes_locked = true;
    }

    fn unlock_option_bytes(&mut self) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        self.option_bytes_locked = false;
        Ok(())
    }

    fn lock_option_bytes(&mut self) {
        self.option_bytes_locked = true;
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = self.offset(addr, buf.len())?;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        Ok(())
    }

    fn erase_page(&mut self, page: u32) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        if self.page_protected(page) {
            return Err(FlashError::WriteProtected);
        }
        let start = self.offset(FLASH_BASE + page * PAGE_SIZE, PAGE_SIZE as usize)?;
        self.memory[start..start + PAGE_SIZE as usize].fill(0xFF);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.locked {
            return Err(FlashError::Locked);
        }
        if addr % 8 != 0 || data.len() % 8 != 0 {
            return Err(FlashError::Unaligned);
        }
        if data.is_empty() {
            return Ok(());
        }
        let start = self.offset(addr, data.len())?;
        let first = (addr - FLASH_BASE) / PAGE_SIZE;
        let last = (addr - FLASH_BASE + data.len() as u32 - 1) / PAGE_SIZE;
        if (first..=last).any(|page| self.page_protected(page)) {
            return Err(FlashError::WriteProtected);
        }
        let dst = &mut self.memory[start..start + data.len()];
        if dst.iter().any(|&b| b != 0xFF) {
            return Err(FlashError::ProgramFailed);
        }
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_option_bytes(&self) -> Result<RawOptionBytes, FlashError> {
        Ok(self.loaded)
    }

    fn write_option_bytes(&mut self, raw: &RawOptionBytes) -> Result<(), FlashError> {
        if self.locked || self.option_bytes_locked {
            return Err(FlashError::Locked);
        }
        let frozen = L4_ENCODING.decode_rdp(self.loaded.rdp) == RdpLevel::MAX;
        if self.fail_option_write || frozen {
            return Err(FlashError::OptionBytesFailed);
        }
        self.option_byte_writes += 1;
        self.staged = Some(*raw);
        Ok(())
    }

    fn relaunch(&mut self) {
        self.relaunches += 1;
        if let Some(staged) = self.staged.take() {
            self.loaded = staged;
        }
        self.locked = true;
        self.option_bytes_locked = true;
    }
}

/// Wraps a provider, counting context lifecycle calls and optionally
/// misbehaving.
pub struct CountingProvider<P> {
    inner: P,
    pub created: usize,
    pub released: usize,
    pub key_checks: usize,
    pub verifies: usize,
    /// Report this digest length instead of the real one.
    pub digest_len: Option<usize>,
    /// Report this verdict word instead of the real one.
    pub verdict: Option<u32>,
    pub fail_hash: bool,
    pub fail_create: bool,
    pub fail_verify: bool,
}

impl<P> CountingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            created: 0,
            released: 0,
            key_checks: 0,
            verifies: 0,
            digest_len: None,
            verdict: None,
            fail_hash: false,
            fail_create: false,
            fail_verify: false,
        }
    }
}

const INJECTED: ProviderError = ProviderError(0xdead);

impl<P: CryptoProvider> CryptoProvider for CountingProvider<P> {
    type HashState = P::HashState;
    type Context = P::Context;

    fn hash_start(&mut self) -> Result<P::HashState, ProviderError> {
        if self.fail_hash {
            return Err(INJECTED);
        }
        self.inner.hash_start()
    }

    fn hash_update(&mut self, state: &mut P::HashState, data: &[u8]) -> Result<(), ProviderError> {
        self.inner.hash_update(state, data)
    }

    fn hash_finish(
        &mut self,
        state: P::HashState,
        out: &mut [u8; MAX_DIGEST_LEN],
    ) -> Result<usize, ProviderError> {
        let len = self.inner.hash_finish(state, out)?;
        Ok(self.digest_len.unwrap_or(len))
    }

    fn context_create(&mut self, curve: &CurveParams) -> Result<P::Context, ProviderError> {
        if self.fail_create {
            return Err(INJECTED);
        }
        let ctx = self.inner.context_create(curve)?;
        self.created += 1;
        Ok(ctx)
    }

    fn context_set_public_key(
        &mut self,
        ctx: &mut P::Context,
        x: &[u8],
        y: &[u8],
    ) -> Result<(), ProviderError> {
        self.inner.context_set_public_key(ctx, x, y)
    }

    fn context_set_signature(
        &mut self,
        ctx: &mut P::Context,
        r: &[u8],
        s: &[u8],
    ) -> Result<(), ProviderError> {
        self.inner.context_set_signature(ctx, r, s)
    }

    fn context_check_public_key(
        &mut self,
        ctx: &mut P::Context,
    ) -> Result<PointCheck, ProviderError> {
        self.key_checks += 1;
        self.inner.context_check_public_key(ctx)
    }

    fn context_verify(&mut self, ctx: &mut P::Context, digest: &[u8]) -> Result<u32, ProviderError> {
        self.verifies += 1;
        if self.fail_verify {
            return Err(INJECTED);
        }
        let raw = self.inner.context_verify(ctx, digest)?;
        Ok(self.verdict.unwrap_or(raw))
    }

    fn context_release(&mut self, ctx: &mut P::Context) {
        self.released += 1;
        self.inner.context_release(ctx);
    }
}

/// What a [`RecordingHandoff`] was asked to do, in order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HandoffEvent {
    Scrub(Region),
    Enter(TrampolineCall),
}

/// Handoff that simulates RAM and records calls instead of jumping.
pub struct RecordingHandoff {
    pub ram_base: u32,
    pub ram: Vec<u32>,
    pub events: Vec<HandoffEvent>,
}

impl RecordingHandoff {
    /// Simulated RAM at `ram_base`, filled with a recognizable secret.
    pub fn new(ram_base: u32, words: usize) -> Self {
        Self {
            ram_base,
            ram: vec![0xC0FF_EE00; words],
            events: Vec::new(),
        }
    }

    pub fn entries(&self) -> Vec<TrampolineCall> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HandoffEvent::Enter(call) => Some(*call),
                HandoffEvent::Scrub(_) => None,
            })
            .collect()
    }
}

impl HandoffMechanism for RecordingHandoff {
    fn scrub(&mut self, region: &Region) {
        self.events.push(HandoffEvent::Scrub(*region));
        for addr in region.as_range().step_by(4) {
            let index = ((addr - self.ram_base) / 4) as usize;
            self.ram[index] = 0;
        }
    }

    /// Records the call and does the trampoline's wipe of the boot core's
    /// RAM, for whatever part of it is simulated.
    fn enter(&mut self, call: &TrampolineCall) {
        self.events.push(HandoffEvent::Enter(*call));
        for addr in call.wipe.as_range().step_by(4) {
            if let Some(word) = self.ram.get_mut(((addr - self.ram_base) / 4) as usize) {
                *word = 0;
            }
        }
    }
}

#[test]
fn development_key_pair_matches_trust_anchor() {
    assert_eq!(test_public_key(), TRUSTED_PUBLIC_KEY);
}
