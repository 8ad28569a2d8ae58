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

mod common;

use bfupdate::clock::{Clock, ManualClock};
use bfupdate::workflow::RequestArgs;
use bfupdate::{Module, TransferProtocol, UpdateError, UpdateReport, UpdateRequest, Updater};
use serde_json::json;

use common::{builder, healthy, path, write_image, MockBmc, MockRunner};

const TASK: &str = "/redfish/v1/TaskService/Tasks/12";
const MULTIPART: &str = "/redfish/v1/UpdateService/update-multipart";
const BMC_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/BMC_Firmware";
const CEC_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/Bluefield_FW_ERoT";
const ATF_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/DPU_ATF";
const UEFI_INV: &str = "/redfish/v1/UpdateService/FirmwareInventory/DPU_UEFI";
const SIMPLE_UPDATE: &str = "/redfish/v1/UpdateService/Actions/UpdateService.SimpleUpdate";
const BIOS_IMAGE: &[u8] = b"\x7fELF\x00\x00BL31: v2.2(release):4.9.0-25-g1ea8a8b\x00\x01UEFI";

fn push_service() -> serde_json::Value {
    json!({"Status": {"State": "Enabled"}, "MultipartHttpPushUri": MULTIPART})
}

fn pull_service(protocols: &[&str]) -> serde_json::Value {
    json!({
        "Status": {"State": "Enabled"},
        "Actions": {"#UpdateService.SimpleUpdate": {
            "TransferProtocol@Redfish.AllowableValues": protocols
        }}
    })
}

fn completed() -> serde_json::Value {
    json!({"@odata.id": TASK, "TaskState": "Completed", "TaskStatus": "OK", "PercentComplete": 100})
}

fn request(module: Module, image: std::path::PathBuf) -> UpdateRequest {
    let args = RequestArgs {
        image: Some(image),
        ..Default::default()
    };
    UpdateRequest::from_args(module, &args).unwrap()
}

fn bios_versions(bmc: &MockBmc, old_atf: &str) {
    bmc.reply("GET", ATF_INV, 200, json!({"Version": old_atf}))
        .reply("GET", ATF_INV, 200, json!({"Version": "4.9.0-25-g1ea8a8b"}))
        .reply("GET", UEFI_INV, 200, json!({"Version": "4.9.0-43-geb6f1e5"}))
        .reply(
            "GET",
            &path("Managers/Bluefield_BMC/Oem/Nvidia"),
            200,
            json!({"BmcRShim": {"BmcRShimEnabled": true}}),
        );
}

#[test]
fn test_bmc_update_crossing_threshold_clears_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path(), "bf3-bmc-24.10-33.fwpkg", b"\x00\x01apfw-bmc-image\x00");
    let bmc = MockBmc::new();
    healthy(&bmc, push_service());
    bmc.reply("GET", BMC_INV, 200, json!({"Version": "BF-24.07-10"}))
        .reply("GET", BMC_INV, 200, json!({"Version": "BF-24.10-33"}))
        .reply("GET", CEC_INV, 200, json!({"Version": "00.02.0195.0000_n02"}))
        .reply("POST", MULTIPART, 202, json!({"@odata.id": TASK}))
        .reply("GET", TASK, 200, json!({"@odata.id": TASK, "TaskState": "Running", "TaskStatus": "OK", "PercentComplete": 40}))
        .reply("GET", TASK, 200, completed())
        .reply("POST", &path("Managers/Bluefield_BMC/Actions/Manager.Reset"), 200, json!({}))
        .reply(
            "POST",
            &path("Systems/Bluefield/LogServices/EventLog/Actions/LogService.ClearLog"),
            200,
            json!({}),
        );
    let clock = ManualClock::new();
    let updater = Updater::new(builder(&bmc, &clock, &MockRunner::default()).build().unwrap());

    let report = updater.run(&request(Module::BMC, image)).unwrap();
    match report {
        UpdateReport::Updated { module, old, new } => {
            assert_eq!(module, Module::BMC);
            assert_eq!(old, "BF-24.07-10");
            assert_eq!(new, "BF-24.10-33");
        }
        other => panic!("unexpected report {other:?}"),
    }
    let push = bmc.calls_to("POST", MULTIPART);
    assert_eq!(push.len(), 1);
    assert!(push[0].body.contains("UpdateParameters"));
    assert!(push[0].body.contains(r#""ForceUpdate":true"#));
    assert_eq!(
        bmc.calls_to(
            "POST",
            &path("Systems/Bluefield/LogServices/EventLog/Actions/LogService.ClearLog")
        )
        .len(),
        1
    );
    assert!(clock.now().as_secs() >= 10);
}

#[test]
fn test_bmc_update_within_new_firmware_keeps_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path(), "bf3-bmc.fwpkg", b"apfw");
    let bmc = MockBmc::new();
    healthy(&bmc, push_service());
    bmc.reply("GET", BMC_INV, 200, json!({"Version": "BF-24.10-33"}))
        .reply("GET", BMC_INV, 200, json!({"Version": "BF-25.04-7"}))
        .reply("GET", CEC_INV, 200, json!({"Version": "00.02.0195.0000_n02"}))
        .reply("POST", MULTIPART, 202, json!({"@odata.id": TASK}))
        .reply("GET", TASK, 200, completed())
        .reply("POST", &path("Managers/Bluefield_BMC/Actions/Manager.Reset"), 200, json!({}));
    let clock = ManualClock::new();
    let updater = Updater::new(builder(&bmc, &clock, &MockRunner::default()).build().unwrap());

    updater.run(&request(Module::BMC, image)).unwrap();
    assert!(bmc
        .calls()
        .iter()
        .all(|c| !c.path.ends_with("LogService.ClearLog")));
}

#[test]
fn test_signature_mismatch_pushes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    // a BMC package handed to the CEC workflow
    let image = write_image(dir.path(), "cec.fwpkg", b"\x00apfw only\x00");
    let bmc = MockBmc::new();
    healthy(&bmc, push_service());
    let clock = ManualClock::new();
    let updater = Updater::new(builder(&bmc, &clock, &MockRunner::default()).build().unwrap());

    let err = updater.run(&request(Module::CEC, image)).unwrap_err();
    assert!(matches!(err, UpdateError::ImageMismatch(_)), "{err}");
    assert_eq!(err.code(), UpdateError::ImageMismatch(String::new()).code());
    assert!(bmc.calls().iter().all(|c| c.method == "GET"));
}

#[test]
fn test_forced_scp_on_http_only_bmc() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path(), "bf-bios.bfb", BIOS_IMAGE);
    let bmc = MockBmc::new();
    healthy(&bmc, pull_service(&["HTTP"]));
    bios_versions(&bmc, "4.8.0-10-gaaaaaaa");
    let clock = ManualClock::new();
    let ctx = builder(&bmc, &clock, &MockRunner::default())
        .forced_protocol(Some(TransferProtocol::SCP))
        .build()
        .unwrap();

    let err = Updater::new(ctx)
        .run(&request(Module::BIOS, image))
        .unwrap_err();
    assert!(matches!(err, UpdateError::UnsupportedProtocol(ref m) if m.contains("SCP")), "{err}");
    assert!(bmc.calls_to("POST", SIMPLE_UPDATE).is_empty());
}

#[test]
fn test_bios_update_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path(), "bf-bios.bfb", BIOS_IMAGE);
    let bmc = MockBmc::new();
    healthy(&bmc, pull_service(&["HTTP", "SCP"]));
    bios_versions(&bmc, "4.8.0-10-gaaaaaaa");
    bmc.reply("POST", SIMPLE_UPDATE, 202, json!({"@odata.id": TASK}))
        .reply("GET", TASK, 200, completed());
    let clock = ManualClock::new();
    let updater = Updater::new(builder(&bmc, &clock, &MockRunner::default()).build().unwrap());

    let report = updater.run(&request(Module::BIOS, image)).unwrap();
    match report {
        UpdateReport::Updated { old, new, .. } => {
            assert!(old.starts_with("ATF--4.8.0"), "{old}");
            assert!(new.starts_with("ATF--4.9.0-25-g1ea8a8b"), "{new}");
        }
        other => panic!("unexpected report {other:?}"),
    }
    let sent = bmc.calls_to("POST", SIMPLE_UPDATE);
    let body: serde_json::Value = serde_json::from_str(&sent[0].body).unwrap();
    assert_eq!(body["TransferProtocol"], "HTTP");
    assert_eq!(body["ImageURI"], "http://127.0.0.1:4242/bf-bios.bfb");
    assert_eq!(body["Username"], "operator");
}

#[test]
fn test_bios_update_over_scp_exchanges_keys() {
    let dir = tempfile::tempdir().unwrap();
    let ssh_dir = tempfile::tempdir().unwrap();
    let image = write_image(dir.path(), "bf-bios.bfb", BIOS_IMAGE);
    let bmc_key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 root@dpu-bmc";
    let bmc = MockBmc::new();
    healthy(&bmc, pull_service(&["SCP"]));
    bios_versions(&bmc, "4.8.0-10-gaaaaaaa");
    bmc.reply(
        "POST",
        &path("UpdateService/Actions/Oem/NvidiaUpdateService.PublicKeyExchange"),
        200,
        json!({"@Message.ExtendedInfo": [{"MessageArgs": [bmc_key]}]}),
    )
    .reply("POST", SIMPLE_UPDATE, 202, json!({"@odata.id": TASK}))
    .reply("GET", TASK, 200, completed());
    let runner = MockRunner::default();
    runner.reply(
        "ssh-keyscan",
        "# 127.0.0.1:22 SSH-2.0-OpenSSH_9.6\n127.0.0.1 ssh-ed25519 AAAAC3local",
    );
    let clock = ManualClock::new();
    let ctx = builder(&bmc, &clock, &runner)
        .ssh_dir(ssh_dir.path().to_path_buf())
        .build()
        .unwrap();

    Updater::new(ctx).run(&request(Module::BIOS, image.clone())).unwrap();

    let exchange = bmc.calls_to(
        "POST",
        &path("UpdateService/Actions/Oem/NvidiaUpdateService.PublicKeyExchange"),
    );
    assert_eq!(exchange.len(), 1);
    assert!(exchange[0].body.contains("ssh-ed25519 AAAAC3local"));
    let authorized = std::fs::read_to_string(ssh_dir.path().join("authorized_keys")).unwrap();
    assert!(authorized.contains(bmc_key));

    let sent = bmc.calls_to("POST", SIMPLE_UPDATE);
    let body: serde_json::Value = serde_json::from_str(&sent[0].body).unwrap();
    assert_eq!(body["TransferProtocol"], "SCP");
    let canonical = std::fs::canonicalize(&image).unwrap();
    assert_eq!(
        body["ImageURI"],
        format!("scp://127.0.0.1:{}", canonical.display())
    );
}

#[test]
fn test_fru_value_limit() {
    let too_long = RequestArgs {
        fru: vec![format!("Product:SerialNumber={}", "X".repeat(64))],
        ..Default::default()
    };
    let err = UpdateRequest::from_args(Module::FRU, &too_long).unwrap_err();
    assert!(matches!(err, UpdateError::InvalidInput(_)), "{err}");

    let bmc = MockBmc::new();
    healthy(&bmc, push_service());
    bmc.reply("PUT", &path("Systems/Bluefield/Oem/Nvidia"), 200, json!({}));
    let clock = ManualClock::new();
    let updater = Updater::new(builder(&bmc, &clock, &MockRunner::default()).build().unwrap());
    let just_fits = RequestArgs {
        fru: vec![format!("Product:SerialNumber={}", "X".repeat(63))],
        ..Default::default()
    };
    let request = UpdateRequest::from_args(Module::FRU, &just_fits).unwrap();
    assert!(matches!(updater.run(&request).unwrap(), UpdateReport::Fru(_)));
    let put = bmc.calls_to("PUT", &path("Systems/Bluefield/Oem/Nvidia"));
    assert_eq!(put.len(), 1);
    assert!(put[0].body.contains("ProductSerialNumber"));
}

#[test]
fn test_transcript_never_holds_credentials() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("bfupdate.log");
    let bmc = MockBmc::new();
    healthy(&bmc, push_service());
    bmc.reply("PUT", &path("Systems/Bluefield/Oem/Nvidia"), 200, json!({}));
    let clock = ManualClock::new();
    let ctx = builder(&bmc, &clock, &MockRunner::default())
        .transcript(Some(log.clone()))
        .build()?;
    let args = RequestArgs {
        fru: vec!["Product:AssetTag=0penBmc".to_string()],
        ..Default::default()
    };
    Updater::new(ctx).run(&UpdateRequest::from_args(Module::FRU, &args)?)?;

    // the mock saw the real value, the transcript only a placeholder
    assert!(bmc.calls_to("PUT", &path("Systems/Bluefield/Oem/Nvidia"))[0]
        .body
        .contains("0penBmc"));
    let text = std::fs::read_to_string(&log)?;
    assert!(text.contains("Update OEM FRU data"), "{text}");
    assert!(text.contains(r#""ProductAssetTag":"***""#), "{text}");
    assert!(!text.contains("0penBmc"), "{text}");
    Ok(())
}
