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

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chassis/Bluefield_ERoT. Only the ERoT exposes the background copy fields.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ErotChassis {
    #[serde(default)]
    pub oem: ErotChassisOem,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ErotChassisOem {
    pub nvidia: Option<ErotChassisNvidia>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ErotChassisNvidia {
    pub automatic_background_copy_enabled: Option<bool>,
    pub background_copy_status: Option<BackgroundCopyStatus>,
    pub inband_update_policy_enabled: Option<bool>,
}

impl ErotChassis {
    pub fn background_copy_status(&self) -> Option<BackgroundCopyStatus> {
        self.oem.nvidia.as_ref().and_then(|n| n.background_copy_status)
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
pub enum BackgroundCopyStatus {
    InProgress,
    Completed,
    Pending,
}

impl fmt::Display for BackgroundCopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Managers/Bluefield_BMC/Oem/Nvidia
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ManagerNvidia {
    pub bmc_r_shim: Option<BmcRShim>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct BmcRShim {
    #[serde(rename = "BmcRShimEnabled")]
    pub enabled: bool,
}

/// Systems/Bluefield, just enough to follow the boot.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct DpuSystem {
    pub power_state: Option<String>,
    pub boot_progress: Option<BootProgress>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct BootProgress {
    pub last_state: Option<String>,
    pub oem_last_state: Option<String>,
}

impl DpuSystem {
    pub const OS_RUNNING: &'static str = "OsIsRunning";

    pub fn is_os_running(&self) -> bool {
        self.boot_progress
            .as_ref()
            .and_then(|b| b.oem_last_state.as_deref())
            == Some(Self::OS_RUNNING)
    }
}

/// Systems/Bluefield/Oem/Nvidia
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct SystemNvidia {
    #[serde(default)]
    pub actions: serde_json::Map<String, serde_json::Value>,
}

impl SystemNvidia {
    pub fn supports_lfwp(&self) -> bool {
        self.actions.contains_key("#LFWP.Set")
    }
}
