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

// nvidia_dpu.rs
// BMC, ERoT and system actions specific to a BlueField DPU.

use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::model::oem::nvidia_dpu::{BackgroundCopyStatus, DpuSystem, ErotChassis, SystemNvidia};
use crate::network::Response;
use crate::session::{error_code, ManagementSession};
use crate::version::{threshold_crossing, EVENT_LOG_THRESHOLD};
use crate::UpdateError;

const BMC_RESET: &str = "Managers/Bluefield_BMC/Actions/Manager.Reset";
const BMC_RESET_TO_DEFAULTS: &str = "Managers/Bluefield_BMC/Actions/Manager.ResetToDefaults";
const EROT_CHASSIS: &str = "Chassis/Bluefield_ERoT";
const EROT_RESET: &str = "Chassis/Bluefield_ERoT/Actions/Chassis.Reset";
const SYSTEM: &str = "Systems/Bluefield";
const SYSTEM_OEM: &str = "Systems/Bluefield/Oem/Nvidia";
const RESET_BIOS: &str = "Systems/Bluefield/Bios/Actions/Bios.ResetBios";
const CLEAR_EVENT_LOG: &str =
    "Systems/Bluefield/LogServices/EventLog/Actions/LogService.ClearLog";
const LFWP_SET: &str = "Systems/Bluefield/Oem/Nvidia/Actions/LFWP.Set";

const POWER_WAIT: Duration = Duration::from_secs(3 * 60);
const POWER_WAIT_INTERVAL: Duration = Duration::from_secs(4);
const BACKGROUND_COPY_WAIT: Duration = Duration::from_secs(20 * 60);
const BACKGROUND_COPY_INTERVAL: Duration = Duration::from_secs(10);
const DPU_READY_WAIT: Duration = Duration::from_secs(40 * 60);
const DPU_READY_INTERVAL: Duration = Duration::from_secs(30);

/// One BlueField DPU behind its BMC.
pub struct Bluefield<'a> {
    s: &'a ManagementSession,
}

impl<'a> Bluefield<'a> {
    pub fn new(s: &'a ManagementSession) -> Bluefield<'a> {
        Bluefield { s }
    }

    pub fn reboot_bmc(&self) -> Result<(), UpdateError> {
        info!("Restarting BMC");
        let data = json!({"ResetType": "GracefulRestart"});
        let response = self.s.post("Reboot BMC", BMC_RESET, Some(&data))?;
        self.s.handle_status(&response, &[200], None)?;
        self.s.wait_for_bmc(true);
        Ok(())
    }

    /// Restarts the ERoT so it activates pending CEC firmware.
    pub fn reboot_cec(&self) -> Result<(), UpdateError> {
        info!("Restarting CEC");
        let data = json!({"ResetType": "GracefulRestart"});
        let response = self.s.post("Reboot CEC", EROT_RESET, Some(&data))?;
        let handler = |r: &Response, msg: &str| {
            let code = error_code(r);
            if code.contains("ActionNotSupported") {
                Some(UpdateError::CompanionRestartUnsupported(msg.to_string()))
            } else if code.contains("ResourceNotFound") {
                Some(UpdateError::NoPendingCompanionFirmware(msg.to_string()))
            } else {
                None
            }
        };
        self.s.handle_status(&response, &[200], Some(&handler))?;
        self.s.wait_for_bmc(true);
        Ok(())
    }

    /// reboot_cec, with the two "nothing to do" answers downgraded to
    /// warnings.
    pub fn try_reboot_cec(&self) -> Result<(), UpdateError> {
        match self.reboot_cec() {
            Err(
                e @ (UpdateError::CompanionRestartUnsupported(_)
                | UpdateError::NoPendingCompanionFirmware(_)),
            ) => {
                warn!("CEC reboot skipped: {e}");
                println!("Warning: {e}");
                Ok(())
            }
            other => other,
        }
    }

    pub fn factory_reset_bmc(&self) -> Result<(), UpdateError> {
        info!("Resetting BMC to factory defaults");
        let data = json!({"ResetToDefaultsType": "ResetAll"});
        let response = self
            .s
            .post("Factory Reset BMC", BMC_RESET_TO_DEFAULTS, Some(&data))?;
        self.s.handle_status(&response, &[200], None)?;
        self.s.wait_for_bmc(true);
        Ok(())
    }

    /// Resets the UEFI configuration. The DPU reboots as a side effect.
    pub fn send_reset_bios(&self) -> Result<(), UpdateError> {
        info!("Resetting BIOS configuration");
        let response = self.s.post("Reset BIOS", RESET_BIOS, None)?;
        self.s.handle_status(&response, &[200], None)?;
        self.wait_for_system_power_on();
        Ok(())
    }

    /// `PowerState` of the DPU, empty if it can't be read.
    pub fn power_state(&self) -> String {
        self.s
            .get_resource::<DpuSystem>("Get system power state", SYSTEM)
            .ok()
            .and_then(|sys| sys.power_state)
            .unwrap_or_default()
    }

    /// Waits for the power state to become On after having been something
    /// else. Gives up silently.
    pub fn wait_for_system_power_on(&self) {
        let mut previous = self.power_state();
        self.s
            .wait_until(POWER_WAIT, POWER_WAIT_INTERVAL, true, || {
                let current = self.power_state();
                let done = current == "On" && previous != "On";
                previous = current;
                done
            });
    }

    /// Failure is only a warning: a stale log is not worth failing an
    /// update that already happened.
    pub fn clear_event_log(&self) {
        let result = self
            .s
            .post("Clear SEL", CLEAR_EVENT_LOG, Some(&json!({})))
            .and_then(|r| self.s.handle_status(&r, &[200, 204], None));
        match result {
            Ok(()) => info!("Event log cleared"),
            Err(e) => {
                warn!("Failed to clear event log: {e}");
                println!("Warning: failed to clear SEL: {e}");
            }
        }
    }

    /// Event log entries are not compatible across the threshold BMC
    /// version, so the log is cleared when an update crosses it.
    pub fn check_and_clear_event_log(&self, old_bmc: &str, new_bmc: &str) -> bool {
        if threshold_crossing(old_bmc, new_bmc, EVENT_LOG_THRESHOLD) {
            info!("BMC crossed {EVENT_LOG_THRESHOLD} ({old_bmc} -> {new_bmc}), clearing SEL");
            self.clear_event_log();
            true
        } else {
            false
        }
    }

    /// Anything but Completed means the ERoT is still copying. A chassis
    /// without the status field has nothing to copy.
    pub fn background_copy_in_progress(&self) -> Result<bool, UpdateError> {
        let chassis: ErotChassis = self
            .s
            .get_resource("Get Background Copy Status", EROT_CHASSIS)?;
        Ok(matches!(
            chassis.background_copy_status(),
            Some(status) if status != BackgroundCopyStatus::Completed
        ))
    }

    /// Waits up to 20 minutes for the background copy to finish.
    pub fn wait_background_copy(&self) -> Result<(), UpdateError> {
        if !self.background_copy_in_progress()? {
            return Ok(());
        }
        println!("Background copy is in progress, waiting for it to finish");
        let done = self
            .s
            .wait_until(BACKGROUND_COPY_WAIT, BACKGROUND_COPY_INTERVAL, true, || {
                matches!(self.background_copy_in_progress(), Ok(false))
            });
        if done {
            Ok(())
        } else {
            Err(UpdateError::BackgroundBusy(
                "background copy did not finish within 20 minutes".to_string(),
            ))
        }
    }

    /// Read failures count as not running, the DPU may be mid-reboot.
    pub fn is_os_running(&self) -> bool {
        self.s
            .get_resource::<DpuSystem>("Get DPU boot progress", SYSTEM)
            .map(|sys| sys.is_os_running())
            .unwrap_or(false)
    }

    /// Up to 40 minutes for the DPU OS to come up. Returns whether it did.
    pub fn wait_for_dpu_ready(&self) -> bool {
        println!("Waiting for the DPU to finish booting");
        let ready = self
            .s
            .wait_until(DPU_READY_WAIT, DPU_READY_INTERVAL, true, || self.is_os_running());
        if !ready {
            warn!("DPU did not report {} in time", DpuSystem::OS_RUNNING);
        }
        ready
    }

    /// Live firmware patching: bundle updates without a DPU reboot.
    pub fn lfwp_supported(&self) -> Result<bool, UpdateError> {
        let oem: SystemNvidia = self.s.get_resource("Check LFWP support", SYSTEM_OEM)?;
        Ok(oem.supports_lfwp())
    }

    pub fn set_lfwp(&self, enabled: bool) -> Result<(), UpdateError> {
        let value = if enabled { "Enabled" } else { "Disabled" };
        let response = self
            .s
            .post(&format!("Set LFWP {value}"), LFWP_SET, Some(&json!({"LFWP": value})))?;
        self.s.handle_status(&response, &[200], None)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::testing::{self, ScriptedBmc};

    const V1: &str = "/redfish/v1";

    fn path(p: &str) -> String {
        format!("{V1}/{p}")
    }

    fn versions_ok(bmc: &ScriptedBmc) {
        bmc.on(
            "GET",
            &path("UpdateService/FirmwareInventory/BMC_Firmware"),
            200,
            json!({"Version": "BF-24.10-33"}),
        )
        .on(
            "GET",
            &path("UpdateService/FirmwareInventory/Bluefield_FW_ERoT"),
            200,
            json!({"Version": "00.02.0195.0000_n02"}),
        );
    }

    #[test]
    fn test_reboot_bmc_waits_for_versions() {
        let bmc = ScriptedBmc::new();
        bmc.on("POST", &path(BMC_RESET), 200, json!({}));
        versions_ok(&bmc);
        let clock = ManualClock::new();
        let s = testing::session(&bmc, &clock);
        Bluefield::new(&s).reboot_bmc().unwrap();
        assert!(bmc.sent()[0].body.contains("GracefulRestart"));
        assert_eq!(clock.now(), Duration::from_secs(4));
    }

    #[test]
    fn test_cec_reboot_warnings() {
        for (code, expect_ok) in [
            ("Base.1.15.0.ActionNotSupported", true),
            ("Base.1.15.0.ResourceNotFound", true),
            ("Base.1.15.0.InternalError", false),
        ] {
            let bmc = ScriptedBmc::new();
            bmc.on(
                "POST",
                &path(EROT_RESET),
                400,
                json!({"error": {"code": code, "message": "no"}}),
            );
            let s = testing::session(&bmc, &ManualClock::new());
            let d = Bluefield::new(&s);
            assert_eq!(d.try_reboot_cec().is_ok(), expect_ok, "{code}");
        }
    }

    #[test]
    fn test_cec_reboot_unsupported_is_typed() {
        let bmc = ScriptedBmc::new();
        bmc.on(
            "POST",
            &path(EROT_RESET),
            400,
            json!({"error": {"code": "Base.1.15.0.ActionNotSupported", "message": "no"}}),
        );
        let s = testing::session(&bmc, &ManualClock::new());
        let err = Bluefield::new(&s).reboot_cec().unwrap_err();
        assert_eq!(err.code(), 25);
    }

    #[test]
    fn test_reset_bios_waits_for_power_cycle() {
        let bmc = ScriptedBmc::new();
        bmc.on("POST", &path(RESET_BIOS), 200, json!({}));
        bmc.on("GET", &path(SYSTEM), 200, json!({"PowerState": "On"}))
            .on("GET", &path(SYSTEM), 200, json!({"PowerState": "Off"}))
            .on("GET", &path(SYSTEM), 200, json!({"PowerState": "PoweringOn"}))
            .on("GET", &path(SYSTEM), 200, json!({"PowerState": "On"}));
        let clock = ManualClock::new();
        let s = testing::session(&bmc, &clock);
        Bluefield::new(&s).send_reset_bios().unwrap();
        assert_eq!(clock.now(), Duration::from_secs(8));
    }

    #[test]
    fn test_event_log_clear_is_gated() {
        let bmc = ScriptedBmc::new();
        bmc.on("POST", &path(CLEAR_EVENT_LOG), 500, json!({}));
        let s = testing::session(&bmc, &ManualClock::new());
        let d = Bluefield::new(&s);
        assert!(!d.check_and_clear_event_log("BF-24.10-33", "BF-25.04-7"));
        assert_eq!(bmc.count("POST", &path(CLEAR_EVENT_LOG)), 0);
        // a failing clear is only a warning
        assert!(d.check_and_clear_event_log("BF-24.07-10", "BF-24.10-33"));
        assert_eq!(bmc.count("POST", &path(CLEAR_EVENT_LOG)), 1);
    }

    #[test]
    fn test_background_copy() {
        let bmc = ScriptedBmc::new();
        let erot = |status: &str| json!({"Oem": {"Nvidia": {"BackgroundCopyStatus": status}}});
        bmc.on("GET", &path(EROT_CHASSIS), 200, erot("InProgress"))
            .on("GET", &path(EROT_CHASSIS), 200, erot("InProgress"))
            .on("GET", &path(EROT_CHASSIS), 200, erot("Completed"));
        let clock = ManualClock::new();
        let s = testing::session(&bmc, &clock);
        Bluefield::new(&s).wait_background_copy().unwrap();
        assert_eq!(clock.now(), Duration::from_secs(10));

        let bmc = ScriptedBmc::new();
        bmc.on("GET", &path(EROT_CHASSIS), 200, erot("Pending"));
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            Bluefield::new(&s).wait_background_copy(),
            Err(UpdateError::BackgroundBusy(_))
        ));
    }

    #[test]
    fn test_dpu_ready_and_lfwp() {
        let bmc = ScriptedBmc::new();
        bmc.on("GET", &path(SYSTEM), 503, json!({}))
            .on(
                "GET",
                &path(SYSTEM),
                200,
                json!({"BootProgress": {"OemLastState": "OsIsRunning"}}),
            );
        bmc.on(
            "GET",
            &path(SYSTEM_OEM),
            200,
            json!({"Actions": {"#LFWP.Set": {"target": "/redfish/v1/Systems/Bluefield/Oem/Nvidia/Actions/LFWP.Set"}}}),
        );
        bmc.on("POST", &path(LFWP_SET), 200, json!({}));
        let clock = ManualClock::new();
        let s = testing::session(&bmc, &clock);
        let d = Bluefield::new(&s);
        assert!(d.wait_for_dpu_ready());
        assert_eq!(clock.now(), Duration::from_secs(30));
        assert!(d.lfwp_supported().unwrap());
        d.set_lfwp(false).unwrap();
        assert!(bmc.sent().last().unwrap().body.contains("Disabled"));
    }
}
