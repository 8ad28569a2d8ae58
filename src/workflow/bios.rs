/*
 * SPDX-FileCopyrightText: Copyright (c) 2023 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

//! ATF/UEFI from a BFB image, pulled by the BMC through rshim.

use std::path::Path;
use std::time::Duration;

use crate::access::Rshim;
use crate::image::{self, ImageKind};
use crate::model::Component;
use crate::session::ManagementSession;
use crate::tracker::JobOutcome;
use crate::transfer::{SimpleUpdateTarget, TransportNegotiator};
use crate::UpdateError;

use super::{Module, UpdateReport};

const VERSION_TRIES: u32 = 3;
const READY_WAIT: Duration = Duration::from_secs(3 * 60);
const READY_INTERVAL: Duration = Duration::from_secs(4);

fn describe(atf: &str, uefi: &str) -> String {
    format!("ATF--{atf}, UEFI--{uefi}")
}

pub fn update(s: &ManagementSession, image: &Path) -> Result<UpdateReport, UpdateError> {
    image::verify(image, ImageKind::BootFirmware)?;
    // Only the ATF version can be read from the image. ATF and UEFI ship
    // together, so it stands for both.
    let embedded = image::require_atf_version(image)?;

    let old_atf = s.get_version_with_retry(Component::ATF, VERSION_TRIES);
    let old_uefi = s.get_version_with_retry(Component::UEFI, VERSION_TRIES);
    if s.ctx().skip_same_version() && !old_atf.is_empty() && embedded.contains(&old_atf) {
        println!("Skip updating the same firmware version: ATF--{old_atf} UEFI--{old_uefi}");
        return Ok(UpdateReport::Skipped {
            module: Module::BIOS,
            version: describe(&old_atf, &old_uefi),
        });
    }

    Rshim::new(s).require()?;
    let outcome = TransportNegotiator::new(s).simple_update(image, SimpleUpdateTarget::Os)?;
    if outcome == JobOutcome::SkippedIdentical {
        return Ok(UpdateReport::Skipped {
            module: Module::BIOS,
            version: describe(&old_atf, &old_uefi),
        });
    }

    println!("Wait for BIOS ready");
    let atf_uri = ManagementSession::inventory_uri(Component::ATF);
    s.wait_until(READY_WAIT, READY_INTERVAL, true, || {
        s.get_version(&atf_uri).map(|v| !v.is_empty()).unwrap_or(false)
    });

    let new_atf = s.get_version_with_retry(Component::ATF, VERSION_TRIES);
    let new_uefi = s.get_version_with_retry(Component::UEFI, VERSION_TRIES);
    if new_atf.is_empty() || !embedded.contains(&new_atf) {
        return Err(UpdateError::VerificationFailed(format!(
            "New BIOS version is not the version we want to update: ATF--{new_atf}, image has {embedded}"
        )));
    }
    Ok(UpdateReport::Updated {
        module: Module::BIOS,
        old: describe(&old_atf, &old_uefi),
        new: describe(&new_atf, &new_uefi),
    })
}
