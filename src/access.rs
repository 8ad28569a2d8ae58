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

// The rshim channel between the BMC and the DPU. Boot firmware, config
// and bundle transfers all go through it, so it has to be on first.

use serde_json::json;
use tracing::{info, warn};

use crate::model::oem::nvidia_dpu::ManagerNvidia;
use crate::progress::Progress;
use crate::session::ManagementSession;
use crate::UpdateError;

const MANAGER_OEM: &str = "Managers/Bluefield_BMC/Oem/Nvidia";
const DISPLAY_LEVEL_COMMAND: &str = "/bin/bash -c \"echo DISPLAY_LEVEL 2 > /dev/rshim0/misc\"";
const MISC_READ_COMMAND: &str = "/bin/bash -c \"cat /dev/rshim0/misc\"";

pub struct Rshim<'a> {
    s: &'a ManagementSession,
}

impl<'a> Rshim<'a> {
    pub fn new(s: &'a ManagementSession) -> Rshim<'a> {
        Rshim { s }
    }

    pub fn is_enabled(&self) -> Result<bool, UpdateError> {
        let oem: ManagerNvidia = self.s.get_resource("Get rshim enable state", MANAGER_OEM)?;
        oem.bmc_r_shim.map(|r| r.enabled).ok_or_else(|| {
            UpdateError::BadResponseFormat(format!(
                "Missing key BmcRShim.BmcRShimEnabled in JSON at {}",
                self.s.url(MANAGER_OEM)
            ))
        })
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), UpdateError> {
        let title = if enabled { "Enable rshim" } else { "Disable rshim" };
        let data = json!({"BmcRShim": {"BmcRShimEnabled": enabled}});
        let response = self.s.patch(title, MANAGER_OEM, &data)?;
        self.s.handle_status(&response, &[200], None)
    }

    /// Makes sure rshim is on. Enabling takes a while to settle, and a
    /// stuck rshim usually recovers after one off/on cycle. Returns false
    /// if it is still off after that.
    pub fn try_enable(&self) -> Result<bool, UpdateError> {
        if self.is_enabled()? {
            return Ok(true);
        }
        info!("Try to enable rshim on BMC");
        let clock = self.s.ctx().clock();
        let progress = Progress::new();

        self.set_enabled(true)?;
        progress.sleep_graded(clock, 10, 0, 30);
        if self.is_enabled()? {
            progress.sleep_graded(clock, 1, 30, 100);
            progress.finish();
            return Ok(true);
        }

        self.set_enabled(false)?;
        progress.sleep_graded(clock, 10, 30, 60);
        self.set_enabled(true)?;
        progress.sleep_graded(clock, 10, 60, 90);
        let enabled = self.is_enabled()?;
        if enabled {
            progress.sleep_graded(clock, 1, 90, 100);
        }
        progress.finish();
        if !enabled {
            warn!("rshim is still disabled after an off/on cycle");
        }
        Ok(enabled)
    }

    /// try_enable, with "still off" as an error.
    pub fn require(&self) -> Result<(), UpdateError> {
        if self.try_enable()? {
            Ok(())
        } else {
            Err(UpdateError::AccessModeFailed(
                "Please make sure rshim on Host side is disabled".to_string(),
            ))
        }
    }

    /// Makes the DPU console log boot progress to the misc device.
    pub fn set_display_level(&self) -> Result<(), UpdateError> {
        self.run_on_bmc(DISPLAY_LEVEL_COMMAND).map(|_| ())
    }

    /// Current contents of the rshim misc device.
    pub fn read_misc(&self) -> Result<String, UpdateError> {
        self.run_on_bmc(MISC_READ_COMMAND)
    }

    fn run_on_bmc(&self, command: &str) -> Result<String, UpdateError> {
        let target = self.s.ctx().bmc_ssh_target();
        let out = self.s.ctx().runner().run(command, Some(&target))?;
        if !out.success() {
            return Err(UpdateError::RemoteCommand {
                command: command.to_string(),
                status: out.status,
                output: out.output,
            });
        }
        Ok(out.output)
    }
}
