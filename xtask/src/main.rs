// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
use anyhow::{bail, Context, Result};
use clap::Parser;
use p256::ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey};
use secboot::bsp::{self, Bsp, DeviceMemoryMap};
use secboot::keys::TRUSTED_PUBLIC_KEY;
use secboot::layout::{FirmwareLayout, ImageTrailer};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use zerocopy::AsBytes;

#[derive(Debug, Parser)]
enum Xtask {
    /// Pads a raw firmware binary to its slot and appends the signed trailer
    Sign {
        #[arg(long)]
        board: String,
        /// Raw binary, linked to run from the board's image slot
        #[arg(long)]
        input: PathBuf,
        /// File holding the P-256 private scalar as 64 hex digits
        #[arg(long)]
        key: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prints where the trailer records live for a board
    Layout {
        #[arg(long)]
        board: String,
    },
}

fn memory_map(board: &str) -> Result<DeviceMemoryMap> {
    Ok(match board {
        "nucleo-l476rg" => bsp::nucleo_l476rg::Board::MEMORY_MAP,
        "b-l475e-iot01a" => bsp::b_l475e_iot01a::Board::MEMORY_MAP,
        "nucleo-l4r5zi" => bsp::nucleo_l4r5zi::Board::MEMORY_MAP,
        _ => bail!("unknown board {board}"),
    })
}

fn layout_for(board: &str) -> Result<FirmwareLayout> {
    let map = memory_map(board)?;
    map.layout()
        .map_err(|e| anyhow::anyhow!("board {board} has a bad image layout: {e:?}"))
}

fn read_key(path: &PathBuf) -> Result<SigningKey> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading key from {}", path.display()))?;
    let scalar = hex::decode(text.trim()).context("key is not hex")?;
    if scalar.len() != 32 {
        bail!("key is {} bytes, expected 32", scalar.len());
    }
    SigningKey::from_slice(&scalar).context("key is not a valid P-256 scalar")
}

fn sign(board: String, input: PathBuf, key: PathBuf, out: PathBuf) -> Result<()> {
    let layout = layout_for(&board)?;
    let key = read_key(&key)?;

    let mut image = std::fs::read(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    if image.len() > layout.image_size() as usize {
        bail!(
            "{} is {} bytes, slot holds {}",
            input.display(),
            image.len(),
            layout.image_size()
        );
    }
    // Erased flash reads as 0xFF, and the padding is hashed with the rest.
    image.resize(layout.page_aligned_size() as usize, 0xFF);

    let digest = Sha256::digest(&image);
    let signature: Signature = key.sign_prehash(&digest)?;

    let point = key.verifying_key().to_encoded_point(false);
    let mut public_key = [0; 64];
    public_key.copy_from_slice(&point.as_bytes()[1..]);
    if public_key != TRUSTED_PUBLIC_KEY {
        eprintln!("warning: signing key does not match the key compiled into secboot");
    }

    let mut trailer = ImageTrailer {
        digest: digest.into(),
        signature: [0; 64],
        public_key,
    };
    trailer.signature.copy_from_slice(&signature.to_bytes());
    image.extend_from_slice(trailer.as_bytes());

    std::fs::write(&out, &image).with_context(|| format!("writing {}", out.display()))?;
    println!(
        "signed {} for {board}: {} bytes at {:#010x}, digest {}",
        input.display(),
        image.len(),
        layout.image_start(),
        hex::encode(digest),
    );
    Ok(())
}

fn print_layout(board: String) -> Result<()> {
    let layout = layout_for(&board)?;
    println!("image       {:#010x} + {:#x}", layout.image_start(), layout.image_size());
    println!("padded size {:#x}", layout.page_aligned_size());
    println!("digest      {:#010x}", layout.digest_offset());
    println!("signature   {:#010x}", layout.signature_offset());
    println!("public key  {:#010x}", layout.public_key_offset());
    println!("end         {:#010x}", layout.trailer_end());
    Ok(())
}

fn main() -> Result<()> {
    let xtask = Xtask::parse();

    match xtask {
        Xtask::Sign {
            board,
            input,
            key,
            out,
        } => {
            sign(board, input, key, out)?;
        }
        Xtask::Layout { board } => {
            print_layout(board)?;
        }
    }
    Ok(())
}
