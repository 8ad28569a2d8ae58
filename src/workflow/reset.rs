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

//! `-C`: back to factory configuration.

use tracing::info;

use crate::nvidia_dpu::Bluefield;
use crate::session::ManagementSession;
use crate::UpdateError;

use super::Module;

pub fn reset_config(s: &ManagementSession, module: Module) -> Result<(), UpdateError> {
    let dpu = Bluefield::new(s);
    match module {
        Module::BMC => dpu.factory_reset_bmc(),
        Module::BIOS => dpu.send_reset_bios(),
        other => Err(UpdateError::UnsupportedModule(format!(
            "Unsupported module to reset config: {other}"
        ))),
    }?;
    info!("{module} configuration reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{self, ScriptedBmc};

    #[test]
    fn test_reset_bmc() {
        let bmc = ScriptedBmc::new();
        bmc.on(
            "POST",
            "/redfish/v1/Managers/Bluefield_BMC/Actions/Manager.ResetToDefaults",
            200,
            json!({}),
        )
        .on(
            "GET",
            "/redfish/v1/UpdateService/FirmwareInventory/BMC_Firmware",
            200,
            json!({"Version": "BF-24.10-33"}),
        )
        .on(
            "GET",
            "/redfish/v1/UpdateService/FirmwareInventory/Bluefield_FW_ERoT",
            200,
            json!({"Version": "00.02.0195.0000_n02"}),
        );
        let s = testing::session(&bmc, &ManualClock::new());
        reset_config(&s, Module::BMC).unwrap();
        assert!(bmc.sent()[0].body.contains("ResetAll"));
    }

    #[test]
    fn test_reset_unsupported() {
        let s = testing::session(&ScriptedBmc::new(), &ManualClock::new());
        for module in [Module::CEC, Module::FRU, Module::CONFIG, Module::BUNDLE] {
            assert!(matches!(
                reset_config(&s, module),
                Err(UpdateError::UnsupportedModule(_))
            ));
        }
    }
}
