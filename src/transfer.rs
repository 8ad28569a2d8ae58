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

// Getting an image onto the BMC. BMC and CEC firmware is pushed in the
// request body. Everything that goes to the DPU is pulled by the BMC
// through SimpleUpdate, from a local HTTP server or over SCP.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::address::format_host;
use crate::file_server::FileServerHandle;
use crate::model::{Task, TransferProtocol, UpdateService};
use crate::network::{Part, Response};
use crate::session::ManagementSession;
use crate::ssh_keys::KeyExchange;
use crate::tracker::{JobOutcome, TaskTracker};
use crate::UpdateError;

const UPDATE_SERVICE: &str = "UpdateService";
const SIMPLE_UPDATE_ACTION: &str = "UpdateService/Actions/UpdateService.SimpleUpdate";
const PUSH_ACCEPTED: [u16; 3] = [100, 200, 202];

const SERVICE_READY_WAIT: Duration = Duration::from_secs(3 * 60);
const SERVICE_READY_INTERVAL: Duration = Duration::from_secs(4);
const SIMPLE_UPDATE_WAIT: Duration = Duration::from_secs(20 * 60);
const SIMPLE_UPDATE_INTERVAL: Duration = Duration::from_secs(2);

const UPDATE_IN_PROGRESS: &str = "An update is in progress";
const KEY_NOT_EXCHANGED: &str = "Please provide server's public key using PublicKeyExchange";
const WEB_SERVICE_UNREACHABLE: &str = "Check and restart server's web service";

/// HTTP 400 "An update is in progress" from any push or SimpleUpdate.
pub fn update_in_progress(response: &Response, message: &str) -> Option<UpdateError> {
    (response.status == 400 && message.contains(UPDATE_IN_PROGRESS)).then(|| {
        UpdateError::AnotherUpdateInProgress("Please try to update the firmware later".to_string())
    })
}

/// Picks the protocol from what the BMC advertises. HTTP is preferred, a
/// forced protocol has to be advertised too.
pub fn select_protocol(
    advertised: &[String],
    forced: Option<TransferProtocol>,
) -> Result<TransferProtocol, UpdateError> {
    let usable: Vec<TransferProtocol> = TransferProtocol::PREFERENCE
        .into_iter()
        .filter(|p| advertised.iter().any(|a| a == p.as_str()))
        .collect();
    let names = || {
        usable
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match forced {
        Some(p) if usable.contains(&p) => Ok(p),
        Some(p) => Err(UpdateError::UnsupportedProtocol(format!(
            "{p} is not in supported BFB update protocols [{}]",
            names()
        ))),
        None => usable.first().copied().ok_or_else(|| {
            UpdateError::UnsupportedProtocol(format!(
                "The current supported BFB update protocols are [{}]",
                names()
            ))
        }),
    }
}

/// Where a SimpleUpdate image goes on the DPU side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleUpdateTarget {
    /// BFB images: ATF/UEFI alone or the whole bundle
    Os,
    GoldenConfig,
}

impl SimpleUpdateTarget {
    pub fn uri(&self) -> &'static str {
        match self {
            SimpleUpdateTarget::Os => "redfish/v1/UpdateService/FirmwareInventory/DPU_OS",
            SimpleUpdateTarget::GoldenConfig => {
                "redfish/v1/UpdateService/FirmwareInventory/golden_image_config"
            }
        }
    }
}

/// A pull source set up for the BMC. The HTTP server lives as long as this
/// value does.
#[derive(Debug)]
pub enum PreparedTransfer {
    Http {
        server: FileServerHandle,
        local_ip: IpAddr,
        image_uri: String,
    },
    Scp {
        image_uri: String,
    },
}

impl PreparedTransfer {
    pub fn protocol(&self) -> TransferProtocol {
        match self {
            PreparedTransfer::Http { .. } => TransferProtocol::HTTP,
            PreparedTransfer::Scp { .. } => TransferProtocol::SCP,
        }
    }

    pub fn image_uri(&self) -> &str {
        match self {
            PreparedTransfer::Http { image_uri, .. } | PreparedTransfer::Scp { image_uri } => {
                image_uri
            }
        }
    }

    /// The two ways a pull fails because of this side of the transfer.
    pub fn job_error(&self, task: &Task) -> Option<UpdateError> {
        let message = task.message_text();
        match self {
            PreparedTransfer::Scp { .. } if message.contains(KEY_NOT_EXCHANGED) => {
                Some(UpdateError::SshKeyNotExchanged)
            }
            PreparedTransfer::Http {
                server, local_ip, ..
            } if message.contains(WEB_SERVICE_UNREACHABLE) => Some(
                UpdateError::FileServerUnreachable(format!(
                    "{}:{}",
                    format_host(*local_ip),
                    server.port()
                )),
            ),
            _ => None,
        }
    }
}

fn absolute(image: &Path) -> Result<PathBuf, UpdateError> {
    std::fs::canonicalize(image)
        .map_err(|_| UpdateError::FileNotAccessible(format!("Firmware file: {}", image.display())))
}

pub struct TransportNegotiator<'a> {
    s: &'a ManagementSession,
}

impl<'a> TransportNegotiator<'a> {
    pub fn new(s: &'a ManagementSession) -> TransportNegotiator<'a> {
        TransportNegotiator { s }
    }

    pub fn update_service(&self) -> Result<UpdateService, UpdateError> {
        self.s
            .get_resource("Get UpdateService Attribute", UPDATE_SERVICE)
    }

    /// Waits up to 3 minutes for the update service to report Enabled.
    pub fn wait_ready(&self) -> Result<(), UpdateError> {
        if self.update_service()?.is_enabled() {
            return Ok(());
        }
        println!("Wait for update service ready");
        let ready = self
            .s
            .wait_until(SERVICE_READY_WAIT, SERVICE_READY_INTERVAL, true, || {
                self.update_service().map(|u| u.is_enabled()).unwrap_or(false)
            });
        if ready {
            Ok(())
        } else {
            Err(UpdateError::UpdateServiceNotReady)
        }
    }

    pub fn negotiate(&self) -> Result<TransferProtocol, UpdateError> {
        let advertised = self.update_service()?.allowable_protocols();
        select_protocol(&advertised, self.s.ctx().forced_protocol())
    }

    /// Starts the file server, or sets up SSH trust, for `image`.
    pub fn prepare(
        &self,
        protocol: TransferProtocol,
        image: &Path,
    ) -> Result<PreparedTransfer, UpdateError> {
        let image = absolute(image)?;
        let local_ip = self.s.ctx().endpoint().address.local_ip()?;
        match protocol {
            TransferProtocol::HTTP => {
                let dir = image.parent().unwrap_or(Path::new("/"));
                let name = image
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let server = self.s.ctx().launcher().launch(dir, local_ip)?;
                let image_uri = format!("http://{}:{}/{name}", format_host(local_ip), server.port());
                Ok(PreparedTransfer::Http {
                    server,
                    local_ip,
                    image_uri,
                })
            }
            TransferProtocol::SCP => {
                KeyExchange::new(self.s).establish(local_ip)?;
                Ok(PreparedTransfer::Scp {
                    image_uri: format!("scp://{}:{}", format_host(local_ip), image.display()),
                })
            }
        }
    }

    /// Has the BMC pull `image` into `target` and waits for the job.
    pub fn simple_update(
        &self,
        image: &Path,
        target: SimpleUpdateTarget,
    ) -> Result<JobOutcome, UpdateError> {
        let protocol = self.negotiate()?;
        let transfer = self.prepare(protocol, image)?;
        println!("Start to do Simple Update ({protocol})");
        let data = json!({
            "TransferProtocol": protocol.as_str(),
            "ImageURI": transfer.image_uri(),
            "Targets": [target.uri()],
            "Username": self.s.ctx().local_user(),
        });
        let response = self.s.post(
            "Do Simple Update (Update BFB or Configurations ...)",
            SIMPLE_UPDATE_ACTION,
            Some(&data),
        )?;
        self.s
            .handle_status(&response, &PUSH_ACCEPTED, Some(&update_in_progress))?;
        let tracker = TaskTracker::new(self.s);
        let handle = tracker.submit(&response)?;
        let handler = |task: &Task| transfer.job_error(task);
        tracker.poll(
            &handle,
            SIMPLE_UPDATE_WAIT,
            SIMPLE_UPDATE_INTERVAL,
            Some(&handler),
        )
    }

    /// Pushes `image` in the request body, multipart if the BMC offers it.
    pub fn push_image(&self, image: &Path) -> Result<crate::tracker::JobHandle, UpdateError> {
        let service = self.update_service()?;
        let (uri, multipart) = service.push_uri().ok_or(UpdateError::PushUriNotFound)?;
        info!("Pushing {} to {uri}", image.display());
        let response = if multipart {
            let params = json!({"ForceUpdate": !self.s.ctx().skip_same_version()});
            let parts = vec![
                Part::Text {
                    name: "UpdateParameters".to_string(),
                    value: params.to_string(),
                },
                Part::File {
                    name: "UpdateFile".to_string(),
                    path: image.to_path_buf(),
                    content_type: "application/octet-stream".to_string(),
                },
            ];
            self.s.multipart("Update Firmware", uri, parts)?
        } else {
            self.s.upload("Update Firmware", uri, image)?
        };
        self.s
            .handle_status(&response, &PUSH_ACCEPTED, Some(&update_in_progress))?;
        TaskTracker::new(self.s).submit(&response)
    }

    pub fn push_and_poll(
        &self,
        image: &Path,
        max_wait: Duration,
        interval: Duration,
    ) -> Result<JobOutcome, UpdateError> {
        println!("Start to upload firmware");
        let handle = self.push_image(image)?;
        TaskTracker::new(self.s).poll(&handle, max_wait, interval, None)
    }
}
