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

//! BMC and CEC firmware: pushed straight to the BMC, then the component is
//! restarted to activate it.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::image::{self, ImageKind};
use crate::model::Component;
use crate::nvidia_dpu::Bluefield;
use crate::session::ManagementSession;
use crate::tracker::JobOutcome;
use crate::transfer::TransportNegotiator;
use crate::UpdateError;

use super::{Module, UpdateReport};

const VERSION_TRIES: u32 = 3;

struct Target {
    module: Module,
    component: Component,
    kind: ImageKind,
    max_wait: Duration,
    interval: Duration,
}

const BMC: Target = Target {
    module: Module::BMC,
    component: Component::BMC,
    kind: ImageKind::Controller,
    max_wait: Duration::from_secs(15 * 60),
    interval: Duration::from_secs(10),
};

const CEC: Target = Target {
    module: Module::CEC,
    component: Component::CEC,
    kind: ImageKind::Companion,
    max_wait: Duration::from_secs(4 * 60),
    interval: Duration::from_secs(2),
};

pub fn update_bmc(s: &ManagementSession, image: &Path) -> Result<UpdateReport, UpdateError> {
    update(s, image, &BMC)
}

pub fn update_cec(s: &ManagementSession, image: &Path) -> Result<UpdateReport, UpdateError> {
    update(s, image, &CEC)
}

fn update(s: &ManagementSession, image: &Path, target: &Target) -> Result<UpdateReport, UpdateError> {
    image::verify(image, target.kind)?;
    match image::version_from_filename(image, target.component) {
        Ok(version) => info!("{} image version {version}", target.component),
        Err(e) => debug!("No version in image file name: {e}"),
    }

    let old = s.get_version_with_retry(target.component, VERSION_TRIES);
    if old.is_empty() {
        return Err(UpdateError::EmptyVersion(format!(
            "Get empty {} version",
            target.component
        )));
    }

    let dpu = Bluefield::new(s);
    if dpu.background_copy_in_progress()? {
        return Err(UpdateError::BackgroundBusy(
            "Please try to update the firmware later".to_string(),
        ));
    }

    let outcome =
        TransportNegotiator::new(s).push_and_poll(image, target.max_wait, target.interval)?;
    if outcome == JobOutcome::SkippedIdentical {
        println!("Skip updating the same version: {old}");
        return Ok(UpdateReport::Skipped {
            module: target.module,
            version: old,
        });
    }

    match target.module {
        Module::BMC => dpu.reboot_bmc()?,
        _ => dpu.try_reboot_cec()?,
    }

    let new = s.get_version_with_retry(target.component, VERSION_TRIES);
    if target.module == Module::BMC {
        dpu.check_and_clear_event_log(&old, &new);
    }
    Ok(UpdateReport::Updated {
        module: target.module,
        old,
        new,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{self, ScriptedBmc};

    const CEC_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/Bluefield_FW_ERoT";
    const BMC_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/BMC_Firmware";
    const TASK: &str = "/redfish/v1/TaskService/Tasks/1";

    fn image(contents: &[u8]) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), contents).unwrap();
        f
    }

    fn push_ok(bmc: &ScriptedBmc, message: &str, state: &str) {
        bmc.on(
            "GET",
            "/redfish/v1/UpdateService",
            200,
            json!({"Status": {"State": "Enabled"}, "HttpPushUri": "/redfish/v1/UpdateService/update"}),
        )
        .on("POST", "/redfish/v1/UpdateService/update", 202, json!({"@odata.id": TASK}))
        .on(
            "GET",
            "/redfish/v1/Chassis/Bluefield_ERoT",
            200,
            json!({"Oem": {"Nvidia": {"BackgroundCopyStatus": "Completed"}}}),
        )
        .on(
            "GET",
            TASK,
            200,
            json!({"TaskState": state, "TaskStatus": if state == "Completed" { "OK" } else { "Warning" },
                   "PercentComplete": if state == "Completed" { 100 } else { 0 },
                   "Messages": [{"Message": message}]}),
        );
    }

    #[test]
    fn test_cec_update_with_unsupported_reboot() {
        let bmc = ScriptedBmc::new();
        push_ok(&bmc, "", "Completed");
        bmc.on("GET", CEC_INV, 200, json!({"Version": "00.02.0182.0000_n02"}))
            .on("GET", CEC_INV, 200, json!({"Version": "00.02.0195.0000_n02"}))
            .on(
                "POST",
                "/redfish/v1/Chassis/Bluefield_ERoT/Actions/Chassis.Reset",
                400,
                json!({"error": {"code": "Base.1.15.0.ActionNotSupported", "message": "not supported"}}),
            );
        let f = image(b"\x00cec1736-ecfw-00.02.0195\x00");
        let s = testing::session(&bmc, &ManualClock::new());
        match update_cec(&s, f.path()).unwrap() {
            UpdateReport::Updated { old, new, .. } => {
                assert_eq!(old, "00.02.0182.0000_n02");
                assert_eq!(new, "00.02.0195.0000_n02");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identical_image_skips_reboot() {
        let bmc = ScriptedBmc::new();
        push_ok(&bmc, "Component image is identical", "Exception");
        bmc.on("GET", BMC_INV, 200, json!({"Version": "BF-24.10-33"}));
        let f = image(b"apfw image");
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            update_bmc(&s, f.path()).unwrap(),
            UpdateReport::Skipped { .. }
        ));
        assert_eq!(
            bmc.count("POST", "/redfish/v1/Managers/Bluefield_BMC/Actions/Manager.Reset"),
            0
        );
    }

    #[test]
    fn test_empty_old_version() {
        let bmc = ScriptedBmc::new();
        let f = image(b"apfw image");
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            update_bmc(&s, f.path()),
            Err(UpdateError::EmptyVersion(_))
        ));
    }

    #[test]
    fn test_background_copy_busy() {
        let bmc = ScriptedBmc::new();
        bmc.on("GET", BMC_INV, 200, json!({"Version": "BF-24.10-33"}))
            .on(
                "GET",
                "/redfish/v1/Chassis/Bluefield_ERoT",
                200,
                json!({"Oem": {"Nvidia": {"BackgroundCopyStatus": "InProgress"}}}),
            );
        let f = image(b"apfw image");
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            update_bmc(&s, f.path()),
            Err(UpdateError::BackgroundBusy(_))
        ));
        assert!(bmc.sent().iter().all(|r| r.method == "GET"));
    }
}
