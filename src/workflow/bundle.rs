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

//! Full BFB bundle: every DPU firmware component in one SimpleUpdate,
//! optionally through live firmware patching (LFWP) instead of a reboot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::Rshim;
use crate::clock::Clock;
use crate::image;
use crate::model::Component;
use crate::nvidia_dpu::Bluefield;
use crate::session::ManagementSession;
use crate::transfer::{SimpleUpdateTarget, TransportNegotiator};
use crate::version::{comparison_table, VersionRegistry};
use crate::UpdateError;

use super::UpdateReport;

const LFWP_SETTLE: Duration = Duration::from_secs(120);
const RESET_BIOS_SETTLE: Duration = Duration::from_secs(60);
const RUNTIME_UPGRADE_WAIT: Duration = Duration::from_secs(30 * 60);
const RUNTIME_UPGRADE_INTERVAL: Duration = Duration::from_secs(60);
const RUNTIME_UPGRADE_DONE: &str = "Runtime upgrade finished";
const REPORTED: [Component; 5] = [
    Component::BMC,
    Component::CEC,
    Component::ATF,
    Component::UEFI,
    Component::NIC,
];
const NOT_AVAILABLE: &str = "NA";

#[derive(Debug, Clone)]
pub struct BundleOptions {
    pub image: PathBuf,
    pub lfwp: bool,
    /// Reset UEFI settings after the update. Ignored with LFWP.
    pub reset_bios: bool,
    pub manifest: Option<BundleManifest>,
}

/// The version table shipped next to a BFB (`--bundle-info`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BundleManifest {
    #[serde(default)]
    pub members: Vec<ManifestMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestMember {
    pub name: String,
    pub version: String,
}

impl BundleManifest {
    pub fn load(path: &Path) -> Result<BundleManifest, UpdateError> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| UpdateError::FileNotAccessible(format!("Bundle info: {}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| {
            UpdateError::InvalidInput(format!("Bundle info {}: {e}", path.display()))
        })
    }

    fn entry_name(module: &str) -> Option<&'static str> {
        Some(match module {
            "ATF" => "BF3_ATF",
            "UEFI" => "BF3_UEFI",
            "BMC" => "BF3_BMC_FW",
            "CEC" => "BF3_CEC_FW",
            "NIC" => "BF3_NIC_FW",
            _ => return None,
        })
    }

    /// The bundled version of `module`, spelled the way the BMC inventory
    /// spells it. ATF comes from the image itself.
    pub fn version_of(&self, module: &str, atf_line: &str) -> String {
        let Some(name) = Self::entry_name(module) else {
            return NOT_AVAILABLE.to_string();
        };
        let Some(member) = self.members.iter().find(|m| m.name == name) else {
            return NOT_AVAILABLE.to_string();
        };
        match module {
            "BMC" => format!("BF-{}", member.version),
            "CEC" => format!("{}_n02", member.version),
            "ATF" => atf_line.to_string(),
            _ => member.version.clone(),
        }
    }
}

fn bundled_version(manifest: Option<&BundleManifest>, module: &str, atf_line: &str) -> String {
    manifest
        .map(|m| m.version_of(module, atf_line))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Waits for the rshim console to report the end of a live update. Gives
/// up silently after 30 minutes.
fn wait_runtime_upgrade(s: &ManagementSession, rshim: &Rshim<'_>) {
    println!("Waiting for NIC Firmware to be updated and mlxfwreset to be done");
    let done = s.wait_until(RUNTIME_UPGRADE_WAIT, RUNTIME_UPGRADE_INTERVAL, true, || {
        rshim
            .read_misc()
            .map(|misc| misc.contains(RUNTIME_UPGRADE_DONE))
            .unwrap_or(false)
    });
    if !done {
        s.log("NIC Firmware update timeout");
        warn!("No '{RUNTIME_UPGRADE_DONE}' on the rshim console");
    }
}

pub fn update(s: &ManagementSession, options: &BundleOptions) -> Result<UpdateReport, UpdateError> {
    let dpu = Bluefield::new(s);
    let rshim = Rshim::new(s);
    let clock = s.ctx().clock();

    if options.lfwp && !dpu.lfwp_supported()? {
        return Err(UpdateError::UnsupportedModule(
            "LFWP.Set is not supported on this BMC".to_string(),
        ));
    }

    let registry = VersionRegistry::new(s);
    let old = registry.list_all()?;

    rshim.require()?;
    rshim.set_display_level()?;

    if options.lfwp {
        dpu.set_lfwp(true)?;
    }
    TransportNegotiator::new(s).simple_update(&options.image, SimpleUpdateTarget::Os)?;
    if options.lfwp {
        dpu.set_lfwp(false)?;
        // NIC firmware update and mlxfwreset run after the job completes
        clock.sleep(LFWP_SETTLE);
    } else {
        dpu.wait_for_dpu_ready();
    }

    if options.reset_bios && !options.lfwp {
        dpu.send_reset_bios()?;
        dpu.wait_for_dpu_ready();
        clock.sleep(RESET_BIOS_SETTLE);
    }

    if options.lfwp {
        wait_runtime_upgrade(s, &rshim);
    }

    let new = registry.list_all()?;
    dpu.check_and_clear_event_log(
        old.get("BMC").unwrap_or_default(),
        new.get("BMC").unwrap_or_default(),
    );

    let manifest = options.manifest.as_ref();
    let atf_line = match manifest {
        Some(_) => image::atf_version_line(&options.image)?.unwrap_or_default(),
        None => String::new(),
    };
    let table = comparison_table(&old, &new, &REPORTED, |module| {
        bundled_version(manifest, module, &atf_line)
    });
    println!("{table}");

    if options.lfwp {
        let bundled_nic = bundled_version(manifest, "NIC", &atf_line);
        let running_nic = s.get_version_with_retry(Component::NIC, 3);
        if bundled_nic != running_nic {
            println!(
                "\nWARNING: LFWP NIC firmware update is complete. Please check the running NIC firmware version on the DPU."
            );
        }
    }
    info!("Bundle update finished");
    Ok(UpdateReport::Bundle { old, new, table })
}
