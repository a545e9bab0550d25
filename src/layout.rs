// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Flash layout of a signed firmware image.
//!
//! A signed image occupies a contiguous range of flash, padded out to the
//! flash page size, and is immediately followed by a fixed-size trailer:
//!
//! ```text
//! [image bytes][padding to page boundary][digest 32B][signature 64B][public key 64B]
//! ```
//!
//! Rather than computing the trailer addresses with ad hoc pointer arithmetic,
//! everything goes through a [`FirmwareLayout`], which checks the arithmetic
//! once at construction time.

use core::mem::size_of;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::flash::{FlashController, FlashError};
use crate::region::Region;

/// Length of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Length of a raw `R || S` P-256 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a raw `X || Y` P-256 public key (no SEC1 tag byte).
pub const PUBLIC_KEY_LEN: usize = 64;

/// Length of one big-endian P-256 coordinate or scalar.
pub const COORDINATE_LEN: usize = 32;

/// The three records stored after the page-aligned image, in flash order.
///
/// The byte layout here is the on-flash format and must not change.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct ImageTrailer {
    pub digest: [u8; DIGEST_LEN],
    pub signature: [u8; SIGNATURE_LEN],
    pub public_key: [u8; PUBLIC_KEY_LEN],
}

const_assert_eq!(size_of::<ImageTrailer>(), DIGEST_LEN + SIGNATURE_LEN + PUBLIC_KEY_LEN);

impl ImageTrailer {
    pub const SIZE: usize = size_of::<Self>();

    /// Splits the stored signature into its `(R, S)` halves.
    pub fn signature_halves(&self) -> (&[u8], &[u8]) {
        self.signature.split_at(COORDINATE_LEN)
    }

    /// Splits the stored public key into its `(X, Y)` halves.
    pub fn public_key_halves(&self) -> (&[u8], &[u8]) {
        self.public_key.split_at(COORDINATE_LEN)
    }
}

/// Reasons a [`FirmwareLayout`] can't be built.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LayoutError {
    /// Page size was zero or not a power of two.
    BadPageSize,
    /// Image had no bytes in it.
    EmptyImage,
    /// Image plus padding plus trailer runs off the end of the address space.
    Overflow,
}

/// Location of a signed image and its trailer in flash.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FirmwareLayout {
    image_start: u32,
    image_size: u32,
    page_size: u32,
    aligned_size: u32,
}

impl FirmwareLayout {
    /// Computes the layout of an image of `image_size` bytes at `image_start`,
    /// on a part whose erase/program granularity is `page_size` bytes.
    pub fn new(
        image_start: u32,
        image_size: u32,
        page_size: u32,
    ) -> Result<Self, LayoutError> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(LayoutError::BadPageSize);
        }
        if image_size == 0 {
            return Err(LayoutError::EmptyImage);
        }
        let aligned_size = image_size
            .checked_add(page_size - 1)
            .ok_or(LayoutError::Overflow)?
            & !(page_size - 1);

        // Make sure the trailer itself fits, so every accessor below can use
        // plain arithmetic.
        image_start
            .checked_add(aligned_size)
            .and_then(|end| end.checked_add(ImageTrailer::SIZE as u32))
            .ok_or(LayoutError::Overflow)?;

        Ok(Self {
            image_start,
            image_size,
            page_size,
            aligned_size,
        })
    }

    pub fn image_start(&self) -> u32 {
        self.image_start
    }

    /// Size of the image as written, before padding.
    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Size of the image rounded up to a whole number of pages. This is the
    /// range covered by the digest.
    pub fn page_aligned_size(&self) -> u32 {
        self.aligned_size
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The hashed region, `[start, start + page_aligned_size)`.
    pub fn image_region(&self) -> Region {
        Region::new(self.image_start, self.digest_offset())
    }

    pub fn digest_offset(&self) -> u32 {
        self.image_start + self.aligned_size
    }

    pub fn signature_offset(&self) -> u32 {
        self.digest_offset() + DIGEST_LEN as u32
    }

    pub fn public_key_offset(&self) -> u32 {
        self.signature_offset() + SIGNATURE_LEN as u32
    }

    /// One past the last byte of the embedded public key.
    pub fn trailer_end(&self) -> u32 {
        self.public_key_offset() + PUBLIC_KEY_LEN as u32
    }

    /// Everything this layout occupies: image, padding, and trailer.
    pub fn footprint(&self) -> Region {
        Region::new(self.image_start, self.trailer_end())
    }

    /// The bytes write protection must cover at a minimum: the digest and the
    /// signature.
    pub fn required_wrp_region(&self) -> Region {
        Region::new(self.digest_offset(), self.public_key_offset())
    }

    /// Reads the digest, signature and embedded key records out of flash.
    pub fn read_trailer<F: FlashController + ?Sized>(
        &self,
        flash: &F,
    ) -> Result<ImageTrailer, FlashError> {
        let mut trailer = ImageTrailer::new_zeroed();
        flash.read(self.digest_offset(), trailer.as_bytes_mut())?;
        Ok(trailer)
    }
}
