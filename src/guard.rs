// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Write and readout protection of the image and the boot core.
//!
//! [`apply_protection`] brings the option bytes up to a [`ProtectionPolicy`].
//! It only ever tightens protection: write protection zones grow to cover the
//! target, and the readout protection level only goes up. Once a part is at
//! RDP level 2 its option bytes are frozen, so all we can do is check that the
//! frozen state is at least as strict as the policy.
//!
//! The boot core's own pages hold the trusted key and the verifier, so a
//! board's policy normally protects them in a second zone. Leaving them
//! writable would let a running image replace the key.
//!
//! Programming new option bytes requires an option byte reload, which resets
//! the part. The next boot then finds everything in place and sees
//! [`ProtectionOutcome::Unchanged`].

use crate::bsp::DeviceMemoryMap;
use crate::flash::{FlashController, FlashSession, OptionByteEncoding, RdpLevel, WrpRange};
use crate::layout::FirmwareLayout;
use crate::region::Region;
use crate::BootError;

/// What a call to [`apply_protection`] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProtectionOutcome {
    /// Option bytes already satisfied the policy.
    Unchanged,
    /// New option bytes were programmed and a reload was requested. On real
    /// hardware this value is never observed, since the reload resets.
    Applied,
    /// The part is locked at RDP level 2 in a state weaker than the policy.
    /// This can't be fixed from software.
    Rejected,
}

/// How much of the image the write protection zone has to span.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WrpCoverage {
    /// Only the pages holding the digest, signature and key.
    Trailer,
    /// The image and its trailer.
    WholeImage,
}

/// Board-level protection settings, before they're tied to a layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtectionTarget {
    /// Zone protecting the image.
    pub wrp_zone: usize,
    pub coverage: WrpCoverage,
    /// Zone protecting the boot core's flash, if any.
    pub boot_zone: Option<usize>,
    pub rdp: RdpLevel,
}

/// Concrete option byte requirements for one image layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtectionPolicy {
    pub wrp_zone: usize,
    pub wrp: WrpRange,
    /// Zone and pages for the boot core.
    pub boot: Option<(usize, WrpRange)>,
    pub rdp: RdpLevel,
}

impl ProtectionPolicy {
    /// Builds a policy, refusing any write protection range that leaves part
    /// of the digest or signature writable.
    pub fn new(
        layout: &FirmwareLayout,
        flash_base: u32,
        wrp_zone: usize,
        wrp: WrpRange,
        rdp: RdpLevel,
    ) -> Result<Self, BootError> {
        let required = WrpRange::covering(
            &layout.required_wrp_region(),
            flash_base,
            layout.page_size(),
        )
        .ok_or(BootError::PolicyRejected)?;
        if !wrp.covers(&required) {
            log::error!(
                "WRP pages {}..={} leave trailer pages {}..={} writable",
                wrp.start_page,
                wrp.end_page,
                required.start_page,
                required.end_page,
            );
            return Err(BootError::PolicyRejected);
        }
        Ok(Self {
            wrp_zone,
            wrp,
            boot: None,
            rdp,
        })
    }

    /// Derives the image part of the policy for `layout` from the board's
    /// settings. The boot core zone, if any, is left out.
    pub fn for_layout(
        layout: &FirmwareLayout,
        flash_base: u32,
        target: &ProtectionTarget,
    ) -> Result<Self, BootError> {
        let region = match target.coverage {
            WrpCoverage::Trailer => layout.required_wrp_region(),
            WrpCoverage::WholeImage => layout.footprint(),
        };
        let wrp = WrpRange::covering(&region, flash_base, layout.page_size())
            .ok_or(BootError::PolicyRejected)?;
        Self::new(layout, flash_base, target.wrp_zone, wrp, target.rdp)
    }

    /// The whole policy for a board: the image zone, plus the boot core zone
    /// when the board names one.
    pub fn for_board(
        memory: &DeviceMemoryMap,
        target: &ProtectionTarget,
    ) -> Result<Self, BootError> {
        let policy = Self::for_layout(&memory.layout()?, memory.flash_base(), target)?;
        match target.boot_zone {
            Some(zone) => policy.with_boot_core(
                zone,
                &memory.protected.rom,
                memory.flash_base(),
                memory.page_size,
            ),
            None => Ok(policy),
        }
    }

    /// Adds a second zone covering the boot core's flash.
    pub fn with_boot_core(
        mut self,
        zone: usize,
        rom: &Region,
        flash_base: u32,
        page_size: u32,
    ) -> Result<Self, BootError> {
        if zone == self.wrp_zone {
            log::error!("boot core and image can't share WRP zone {zone}");
            return Err(BootError::PolicyRejected);
        }
        let pages =
            WrpRange::covering(rom, flash_base, page_size).ok_or(BootError::PolicyRejected)?;
        self.boot = Some((zone, pages));
        Ok(self)
    }

    /// Every zone this policy programs, image first.
    pub fn zones(&self) -> impl Iterator<Item = (usize, WrpRange)> {
        core::iter::once((self.wrp_zone, self.wrp)).chain(self.boot)
    }
}

/// Brings the option bytes up to `policy`.
///
/// Returns `Err` only for conditions that leave the protection state unknown
/// (the flash interface wouldn't unlock, or programming failed) or for a
/// policy this part can't express. Callers must treat both `Err` and
/// [`ProtectionOutcome::Rejected`] as fatal.
pub fn apply_protection<F: FlashController + ?Sized>(
    flash: &mut F,
    encoding: &OptionByteEncoding,
    policy: &ProtectionPolicy,
) -> Result<ProtectionOutcome, BootError> {
    for (zone, range) in policy.zones() {
        if zone >= encoding.wrp_zones || !encoding.fits(&range) {
            log::error!("policy cannot be expressed in option bytes (zone {zone})");
            return Err(BootError::PolicyRejected);
        }
    }
    if matches!(policy.boot, Some((zone, _)) if zone == policy.wrp_zone) {
        log::error!("boot core and image share WRP zone {}", policy.wrp_zone);
        return Err(BootError::PolicyRejected);
    }

    {
        let mut session = FlashSession::open(flash)?;
        let mut option_bytes = session.option_bytes()?;

        let raw = option_bytes.read()?;
        let current = encoding.decode(&raw);
        log::debug!("option bytes: {current:?}");

        if current.rdp == RdpLevel::MAX {
            // Frozen. Either it's already good enough or we're stuck. Any
            // zone will do, since nothing can be moved around any more.
            let covered = policy.zones().all(|(_, range)| current.covers(&range));
            if policy.rdp < RdpLevel::MAX || !covered {
                log::error!("part is at RDP level 2 with weaker protection than policy");
                return Ok(ProtectionOutcome::Rejected);
            }
            return Ok(ProtectionOutcome::Unchanged);
        }

        let mut next = raw;
        let mut changed = false;

        for (zone, range) in policy.zones() {
            if current.covers(&range) {
                continue;
            }
            // Grow, never shrink, whatever the zone already protects.
            let wrp = match current.wrp[zone] {
                Some(existing) => existing.hull(&range),
                None => range,
            };
            log::info!(
                "WRP zone {zone}: protecting pages {}..={}",
                wrp.start_page,
                wrp.end_page
            );
            next.wrp[zone] = encoding.encode_wrp(raw.wrp[zone], Some(wrp));
            changed = true;
        }

        if current.rdp < policy.rdp {
            log::info!("raising RDP from {:?} to {:?}", current.rdp, policy.rdp);
            next.rdp = encoding.encode_rdp(policy.rdp);
            changed = true;
        }

        if !changed {
            return Ok(ProtectionOutcome::Unchanged);
        }

        option_bytes.write(&next).map_err(|e| {
            log::error!("option byte programming failed: {e:?}");
            BootError::ProgrammingFailure
        })?;
    }

    // Both interfaces are relocked by now. Reloading the option bytes resets
    // the part, so on hardware nothing below runs.
    flash.relaunch();
    Ok(ProtectionOutcome::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::RawOptionBytes;
    use crate::flash::FlashError;
    use crate::testutil::{test_layout, FakeFlash, FLASH_BASE, IMAGE_START, L4_ENCODING, PAGE_SIZE};

    fn boot_rom() -> Region {
        Region::new(FLASH_BASE, IMAGE_START)
    }

    fn with_boot_core(rdp: RdpLevel) -> ProtectionPolicy {
        policy(rdp)
            .with_boot_core(1, &boot_rom(), FLASH_BASE, PAGE_SIZE)
            .unwrap()
    }

    fn policy(rdp: RdpLevel) -> ProtectionPolicy {
        let target = ProtectionTarget {
            wrp_zone: 0,
            coverage: WrpCoverage::WholeImage,
            boot_zone: None,
            rdp,
        };
        ProtectionPolicy::for_layout(&test_layout(), FLASH_BASE, &target).unwrap()
    }

    #[test]
    fn second_apply_is_a_no_op() {
        let mut flash = FakeFlash::new();
        let policy = policy(RdpLevel::Level1);

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Applied)
        );
        assert_eq!(flash.relaunches(), 1);
        assert!(flash.is_locked() && flash.option_bytes_locked());

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Unchanged)
        );
        assert_eq!(flash.relaunches(), 1);
        assert!(flash.is_locked() && flash.option_bytes_locked());

        let config = L4_ENCODING.decode(&flash.option_bytes());
        assert_eq!(config.rdp, RdpLevel::Level1);
        assert_eq!(config.wrp[0], Some(policy.wrp));
    }

    #[test]
    fn level2_refuses_weaker_requests() {
        let mut flash = FakeFlash::new();
        let strict = policy(RdpLevel::Level2);
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &strict),
            Ok(ProtectionOutcome::Applied)
        );
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &strict),
            Ok(ProtectionOutcome::Unchanged)
        );

        for weaker in [RdpLevel::Level0, RdpLevel::Level1] {
            assert_eq!(
                apply_protection(&mut flash, &L4_ENCODING, &policy(weaker)),
                Ok(ProtectionOutcome::Rejected)
            );
        }
        assert_eq!(flash.option_byte_writes(), 1);
        assert_eq!(flash.relaunches(), 1);
        assert!(flash.is_locked() && flash.option_bytes_locked());
    }

    #[test]
    fn level2_with_uncovered_range_is_rejected() {
        let mut flash = FakeFlash::with_option_bytes(RawOptionBytes {
            rdp: 0xCC,
            wrp: [
                L4_ENCODING.encode_wrp(0, Some(WrpRange::new(0, 1))),
                L4_ENCODING.encode_wrp(0, None),
                L4_ENCODING.encode_wrp(0, None),
                L4_ENCODING.encode_wrp(0, None),
            ],
        });
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy(RdpLevel::Level2)),
            Ok(ProtectionOutcome::Rejected)
        );
        assert_eq!(flash.option_byte_writes(), 0);
    }

    #[test]
    fn never_lowers_rdp() {
        let mut flash = FakeFlash::new();
        apply_protection(&mut flash, &L4_ENCODING, &policy(RdpLevel::Level1)).unwrap();
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy(RdpLevel::Level0)),
            Ok(ProtectionOutcome::Unchanged)
        );
        assert_eq!(
            L4_ENCODING.decode(&flash.option_bytes()).rdp,
            RdpLevel::Level1
        );
    }

    #[test]
    fn existing_wider_zone_is_kept() {
        let policy = policy(RdpLevel::Level0);
        let wider_low = WrpRange::new(0, policy.wrp.start_page + 1);
        let mut raw = FakeFlash::new().option_bytes();
        raw.wrp[0] = L4_ENCODING.encode_wrp(raw.wrp[0], Some(wider_low));
        let mut flash = FakeFlash::with_option_bytes(raw);

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Applied)
        );
        let wrp = L4_ENCODING.decode(&flash.option_bytes()).wrp[0].unwrap();
        assert_eq!(wrp, WrpRange::new(0, policy.wrp.end_page));
    }

    #[test]
    fn programming_failure_is_fatal_and_relocks() {
        let mut flash = FakeFlash::new();
        flash.fail_option_write = true;
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy(RdpLevel::Level1)),
            Err(BootError::ProgrammingFailure)
        );
        assert_eq!(flash.relaunches(), 0);
        assert!(flash.is_locked() && flash.option_bytes_locked());
    }

    #[test]
    fn unlock_failure_is_reported() {
        let mut flash = FakeFlash::new();
        flash.fail_unlock = true;
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy(RdpLevel::Level1)),
            Err(BootError::Flash(crate::flash::FlashError::UnlockFailed))
        );
        assert!(flash.is_locked() && flash.option_bytes_locked());
    }

    #[test]
    fn protected_pages_refuse_writes_after_apply() {
        let mut flash = FakeFlash::new();
        let policy = policy(RdpLevel::Level1);
        apply_protection(&mut flash, &L4_ENCODING, &policy).unwrap();

        let layout = test_layout();
        let mut session = FlashSession::open(&mut flash).unwrap();
        assert_eq!(
            session.erase_page(policy.wrp.end_page),
            Err(crate::flash::FlashError::WriteProtected)
        );
        assert_eq!(
            session.program(layout.digest_offset(), &[0; 8]),
            Err(crate::flash::FlashError::WriteProtected)
        );
    }

    #[test]
    fn policy_must_cover_digest_and_signature() {
        let layout = test_layout();
        let required =
            WrpRange::covering(&layout.required_wrp_region(), FLASH_BASE, layout.page_size())
                .unwrap();
        let short = WrpRange::new(0, required.start_page - 1);
        assert_eq!(
            ProtectionPolicy::new(&layout, FLASH_BASE, 0, short, RdpLevel::Level1),
            Err(BootError::PolicyRejected)
        );

        let trailer_only = ProtectionPolicy::for_layout(
            &layout,
            FLASH_BASE,
            &ProtectionTarget {
                wrp_zone: 1,
                coverage: WrpCoverage::Trailer,
                boot_zone: None,
                rdp: RdpLevel::Level1,
            },
        )
        .unwrap();
        assert_eq!(trailer_only.wrp, required);
    }

    #[test]
    fn unrepresentable_zone_is_rejected() {
        let mut flash = FakeFlash::new();
        let mut policy = policy(RdpLevel::Level1);
        policy.wrp_zone = L4_ENCODING.wrp_zones;
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Err(BootError::PolicyRejected)
        );
        assert_eq!(flash.unlock_count(), 0);
    }

    #[test]
    fn boot_core_pages_are_protected_with_the_image() {
        let mut flash = FakeFlash::new();
        let policy = with_boot_core(RdpLevel::Level1);
        assert_eq!(policy.boot, Some((1, WrpRange::new(0, 31))));

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Applied)
        );
        // Both zones go in with a single reload.
        assert_eq!(flash.option_byte_writes(), 1);
        assert_eq!(flash.relaunches(), 1);

        let config = L4_ENCODING.decode(&flash.option_bytes());
        assert_eq!(config.wrp[0], Some(policy.wrp));
        assert_eq!(config.wrp[1], Some(WrpRange::new(0, 31)));

        let mut session = FlashSession::open(&mut flash).unwrap();
        assert_eq!(session.erase_page(0), Err(FlashError::WriteProtected));
        assert_eq!(session.erase_page(31), Err(FlashError::WriteProtected));
        assert_eq!(
            session.program(FLASH_BASE + 0x400, &[0; 8]),
            Err(FlashError::WriteProtected)
        );
        drop(session);

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Unchanged)
        );
    }

    #[test]
    fn boot_core_cannot_share_the_image_zone() {
        assert_eq!(
            policy(RdpLevel::Level1).with_boot_core(0, &boot_rom(), FLASH_BASE, PAGE_SIZE),
            Err(BootError::PolicyRejected)
        );

        let mut flash = FakeFlash::new();
        let mut shared = with_boot_core(RdpLevel::Level1);
        shared.boot = Some((0, WrpRange::new(0, 31)));
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &shared),
            Err(BootError::PolicyRejected)
        );
        assert_eq!(flash.unlock_count(), 0);
    }

    #[test]
    fn level2_accepts_coverage_from_another_zone() {
        let policy = with_boot_core(RdpLevel::Level2);
        let disabled = L4_ENCODING.encode_wrp(0, None);
        // Image covered by zone 2, boot core by zone 3, nothing where the
        // policy would have put them.
        let mut flash = FakeFlash::with_option_bytes(RawOptionBytes {
            rdp: 0xCC,
            wrp: [
                disabled,
                disabled,
                L4_ENCODING.encode_wrp(0, Some(policy.wrp)),
                L4_ENCODING.encode_wrp(0, Some(WrpRange::new(0, 31))),
            ],
        });
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Unchanged)
        );

        // Drop the boot core's zone and the frozen part falls short.
        let mut flash = FakeFlash::with_option_bytes(RawOptionBytes {
            rdp: 0xCC,
            wrp: [
                disabled,
                disabled,
                L4_ENCODING.encode_wrp(0, Some(policy.wrp)),
                disabled,
            ],
        });
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Rejected)
        );
        assert_eq!(flash.option_byte_writes(), 0);
    }

    #[test]
    fn drifted_zone_is_programmed_again() {
        let mut flash = FakeFlash::new();
        let policy = policy(RdpLevel::Level1);
        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Applied)
        );
        assert_eq!(flash.relaunches(), 1);

        // Someone with the unlock keys clears the zone between boots.
        {
            let mut session = FlashSession::open(&mut flash).unwrap();
            let mut option_bytes = session.option_bytes().unwrap();
            let mut raw = option_bytes.read().unwrap();
            raw.wrp[0] = L4_ENCODING.encode_wrp(raw.wrp[0], None);
            option_bytes.write(&raw).unwrap();
        }
        flash.relaunch();
        assert_eq!(L4_ENCODING.decode(&flash.option_bytes()).wrp[0], None);
        let relaunches = flash.relaunches();

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Applied)
        );
        assert_eq!(flash.relaunches(), relaunches + 1);
        let config = L4_ENCODING.decode(&flash.option_bytes());
        assert_eq!(config.wrp[0], Some(policy.wrp));
        assert_eq!(config.rdp, RdpLevel::Level1);

        assert_eq!(
            apply_protection(&mut flash, &L4_ENCODING, &policy),
            Ok(ProtectionOutcome::Unchanged)
        );
        assert_eq!(flash.relaunches(), relaunches + 1);
    }
}
