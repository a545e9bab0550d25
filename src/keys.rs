// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compiled-in trust anchor.

use hex_literal::hex;

use crate::layout::PUBLIC_KEY_LEN;

/// The only public key images may be signed with, as raw `X || Y`.
///
/// An image's embedded key must equal this byte-for-byte. Someone able to
/// rewrite flash can swap the embedded key, but not this one, unless they can
/// also get past write and readout protection.
///
/// This is the development key. Its private half is derived from the SHA-256
/// of the string "secboot development signing key" and must never sign a
/// production image; product builds replace this constant.
pub const TRUSTED_PUBLIC_KEY: [u8; PUBLIC_KEY_LEN] = hex!(
    "bfee5160260465550219073d8b756e4e147112c4b3e012da977afc251b918424"
    "0d73cd65d2d92536e1964c0121e132c5975f73fbcb51dec66c2d118bdf73fae8"
);
