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

use std::path::Path;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::model::{Component, SoftwareInventory};
use crate::network::{Body, Part, Request, Response, REDFISH_ENDPOINT};
use crate::progress::{percent_of, Progress};
use crate::{jsonmap, Context, UpdateError};

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

const VERSION_RETRY_BACKOFF: Duration = Duration::from_secs(4);
const BMC_WAIT: Duration = Duration::from_secs(3 * 60);
const BMC_WAIT_INTERVAL: Duration = Duration::from_secs(4);

/// A situation specific translation of a failed response, tried before the
/// generic InvalidStatusCode.
pub type StatusHandler<'h> = &'h dyn Fn(&Response, &str) -> Option<UpdateError>;

/// The message a BMC puts in an error body. BMCs use two shapes, anything
/// else gives an empty string.
pub fn error_message(response: &Response) -> String {
    let Some(body) = response.json() else {
        return String::new();
    };
    body.pointer("/error/message")
        .or_else(|| body.pointer("/Attributes@Message.ExtendedInfo/0/Message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// `error.code` of an error body, e.g. `Base.1.15.0.ActionNotSupported`
pub fn error_code(response: &Response) -> String {
    response
        .json()
        .and_then(|b| {
            b.pointer("/error/code")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

/// All requests to one BMC go through here: URL building, basic auth,
/// timeouts, redacted logging and status classification.
pub struct ManagementSession {
    ctx: Context,
}

impl ManagementSession {
    pub fn new(ctx: Context) -> ManagementSession {
        ManagementSession { ctx }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    /// `path` is either absolute (`/redfish/v1/...`, as found in `@odata.id`)
    /// or relative to the service root (`UpdateService`).
    pub fn url(&self, path: &str) -> String {
        let base = self.ctx.endpoint().base_url();
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{REDFISH_ENDPOINT}/{path}")
        }
    }

    /// Writes a title-only block to the log.
    pub fn log(&self, title: &str) {
        self.ctx.logger().log(title, None);
    }

    fn send(
        &self,
        title: &str,
        method: Method,
        path: &str,
        headers: Vec<(String, String)>,
        body: Body,
        timeout: Duration,
    ) -> Result<Response, UpdateError> {
        let creds = self.ctx.credentials();
        let request = Request {
            method,
            url: self.url(path),
            headers,
            body,
            basic_auth: Some((creds.username.clone(), creds.password.clone())),
            timeout,
        };
        match self.ctx.transport().send(request) {
            Ok(response) => {
                self.ctx.logger().log(title, Some(&response));
                Ok(response)
            }
            Err(e) => {
                self.ctx.logger().log(&format!("{title}: {e}"), None);
                Err(e)
            }
        }
    }

    fn json_headers() -> Vec<(String, String)> {
        vec![("Content-Type".to_string(), JSON.to_string())]
    }

    pub fn get(&self, title: &str, path: &str) -> Result<Response, UpdateError> {
        self.get_with_timeout(title, path, self.ctx.timeouts().get)
    }

    pub fn get_with_timeout(
        &self,
        title: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Response, UpdateError> {
        self.send(title, Method::GET, path, vec![], Body::Empty, timeout)
    }

    /// POST with an optional JSON body.
    pub fn post(&self, title: &str, path: &str, data: Option<&Value>) -> Result<Response, UpdateError> {
        let body = match data {
            Some(v) => Body::Json(v.to_string()),
            None => Body::Empty,
        };
        self.send(
            title,
            Method::POST,
            path,
            Self::json_headers(),
            body,
            self.ctx.timeouts().post,
        )
    }

    pub fn patch(&self, title: &str, path: &str, data: &Value) -> Result<Response, UpdateError> {
        self.send(
            title,
            Method::PATCH,
            path,
            Self::json_headers(),
            Body::Json(data.to_string()),
            self.ctx.timeouts().patch,
        )
    }

    pub fn put(&self, title: &str, path: &str, data: &Value) -> Result<Response, UpdateError> {
        self.send(
            title,
            Method::PUT,
            path,
            Self::json_headers(),
            Body::Json(data.to_string()),
            self.ctx.timeouts().put,
        )
    }

    /// Raw single-file upload, used with the deprecated HttpPushUri.
    pub fn upload(&self, title: &str, path: &str, file: &Path) -> Result<Response, UpdateError> {
        self.send(
            title,
            Method::POST,
            path,
            vec![("Content-Type".to_string(), OCTET_STREAM.to_string())],
            Body::File {
                path: file.to_path_buf(),
            },
            self.ctx.timeouts().post,
        )
    }

    pub fn multipart(
        &self,
        title: &str,
        path: &str,
        parts: Vec<Part>,
    ) -> Result<Response, UpdateError> {
        self.send(
            title,
            Method::POST,
            path,
            vec![],
            Body::Multipart(parts),
            self.ctx.timeouts().post,
        )
    }

    /// Ok if the status is acceptable. Otherwise 401 is classified first,
    /// then `handler` gets a chance, then InvalidStatusCode.
    pub fn handle_status(
        &self,
        response: &Response,
        acceptable: &[u16],
        handler: Option<StatusHandler<'_>>,
    ) -> Result<(), UpdateError> {
        if acceptable.contains(&response.status) {
            return Ok(());
        }
        let msg = error_message(response);
        if response.status == 401 {
            let lower = msg.to_lowercase();
            if lower.contains("locked out") {
                return Err(UpdateError::AccountLocked(msg));
            }
            if lower.contains("invalid") {
                return Err(UpdateError::InvalidCredentials(msg));
            }
        }
        if let Some(handler) = handler {
            if let Some(e) = handler(response, &msg) {
                return Err(e);
            }
        }
        Err(UpdateError::InvalidStatusCode {
            status: response.status,
            message: msg,
        })
    }

    /// GET that must return 200, parsed into T.
    pub fn get_resource<T>(&self, title: &str, path: &str) -> Result<T, UpdateError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.get(title, path)?;
        self.handle_status(&response, &[200], None)?;
        jsonmap::extract(&response)
    }

    /// Lightweight read of the service root. 200 and 401 both prove the
    /// BMC is there.
    pub fn probe(&self) -> Result<(), UpdateError> {
        let host = self.ctx.endpoint().address.url_host();
        self.log(&format!("Checking BMC availability at {host}"));
        let response = self
            .get_with_timeout(
                "Check BMC availability",
                &format!("/{REDFISH_ENDPOINT}"),
                self.ctx.timeouts().probe,
            )
            .map_err(|e| {
                debug!("BMC probe failed: {e}");
                UpdateError::ControllerUnreachable(host.clone())
            })?;
        match response.status {
            200 | 401 => Ok(()),
            status => Err(UpdateError::InvalidStatusCode {
                status,
                message: format!("BMC at {host} responded unexpectedly"),
            }),
        }
    }

    /// `Version` of a firmware inventory resource.
    pub fn get_version(&self, uri: &str) -> Result<String, UpdateError> {
        let leaf = uri.rsplit('/').next().unwrap_or(uri);
        let inv: SoftwareInventory =
            self.get_resource(&format!("Get {leaf} Firmware Version"), uri)?;
        inv.version.ok_or_else(|| {
            UpdateError::BadResponseFormat(format!("Failed to extract firmware version of {leaf}"))
        })
    }

    pub fn inventory_uri(component: Component) -> String {
        format!(
            "/{REDFISH_ENDPOINT}/UpdateService/FirmwareInventory/{}",
            component.resource()
        )
    }

    /// Retries transient failures. An empty string means "unknown", callers
    /// decide whether that is fatal.
    pub fn get_version_with_retry(&self, component: Component, tries: u32) -> String {
        let uri = Self::inventory_uri(component);
        for attempt in 1..=tries {
            match self.get_version(&uri) {
                Ok(v) => return v,
                Err(e) => {
                    debug!("Reading {component} version, attempt {attempt}: {e}");
                    if self.ctx.is_debug() {
                        println!("Exception when get version: {e}");
                    }
                }
            }
            self.ctx.clock().sleep(VERSION_RETRY_BACKOFF);
        }
        warn!("Giving up reading {component} version after {tries} tries");
        String::new()
    }

    /// Polls `check` every `interval` until it returns true or `budget`
    /// runs out. Returns whether the condition was met; running out of time
    /// is not an error here.
    pub fn wait_until<F>(
        &self,
        budget: Duration,
        interval: Duration,
        show_progress: bool,
        mut check: F,
    ) -> bool
    where
        F: FnMut() -> bool,
    {
        let clock = self.ctx.clock();
        let progress = Progress::new();
        let start = clock.now();
        let met = loop {
            let elapsed = clock.now().saturating_sub(start);
            if elapsed > budget {
                break false;
            }
            if check() {
                break true;
            }
            if show_progress {
                progress.show(percent_of(elapsed, budget));
            }
            clock.sleep(interval);
        };
        if show_progress {
            progress.show(100.0);
            progress.finish();
        }
        met
    }

    /// After a BMC or CEC reboot: wait until both versions can be read
    /// again. Gives up silently after three minutes; the next request will
    /// surface a real failure.
    pub fn wait_for_bmc(&self, show_progress: bool) {
        self.ctx.clock().sleep(BMC_WAIT_INTERVAL);
        self.wait_until(BMC_WAIT, BMC_WAIT_INTERVAL, show_progress, || {
            self.get_version(&Self::inventory_uri(Component::BMC)).is_ok()
                && self
                    .get_version(&Self::inventory_uri(Component::CEC))
                    .is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::network::RequestEcho;
    use crate::testing::{self, ScriptedBmc};

    fn response(status: u16, body: &str) -> Response {
        Response {
            status,
            reason: String::new(),
            headers: vec![],
            body: body.to_string(),
            request: RequestEcho::default(),
        }
    }

    #[test]
    fn test_error_message_shapes() {
        let r = response(400, r#"{"error": {"code": "Base.1.0.GeneralError", "message": "An update is in progress"}}"#);
        assert_eq!(error_message(&r), "An update is in progress");
        assert_eq!(error_code(&r), "Base.1.0.GeneralError");

        let r = response(
            400,
            r#"{"Attributes@Message.ExtendedInfo": [{"Message": "bad attribute"}]}"#,
        );
        assert_eq!(error_message(&r), "bad attribute");

        assert_eq!(error_message(&response(500, "<html>oops</html>")), "");
        assert_eq!(error_code(&response(500, "{}")), "");
    }

    #[test]
    fn test_handle_status_401() {
        let bmc = ScriptedBmc::new();
        let s = testing::session(&bmc, &ManualClock::new());
        let locked = response(
            401,
            r#"{"error": {"message": "Account temporarily locked out"}}"#,
        );
        assert!(matches!(
            s.handle_status(&locked, &[200], None),
            Err(UpdateError::AccountLocked(_))
        ));
        let bad = response(
            401,
            r#"{"error": {"message": "Invalid username or password"}}"#,
        );
        assert!(matches!(
            s.handle_status(&bad, &[200], None),
            Err(UpdateError::InvalidCredentials(_))
        ));
        assert!(s.handle_status(&bad, &[200, 401], None).is_ok());
    }

    #[test]
    fn test_handle_status_handler_then_generic() {
        let bmc = ScriptedBmc::new();
        let s = testing::session(&bmc, &ManualClock::new());
        let r = response(400, r#"{"error": {"message": "An update is in progress"}}"#);
        let handler = |resp: &Response, msg: &str| {
            (resp.status == 400 && msg.contains("An update is in progress"))
                .then(|| UpdateError::AnotherUpdateInProgress(msg.to_string()))
        };
        assert!(matches!(
            s.handle_status(&r, &[200], Some(&handler)),
            Err(UpdateError::AnotherUpdateInProgress(_))
        ));
        match s.handle_status(&r, &[200], None) {
            Err(UpdateError::InvalidStatusCode { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "An update is in progress");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_version_retry_degrades_to_empty() {
        let bmc = ScriptedBmc::new();
        let clock = ManualClock::new();
        let s = testing::session(&bmc, &clock);
        let v = s.get_version_with_retry(Component::BMC, 3);
        assert_eq!(v, "");
        assert_eq!(
            bmc.count("GET", "/redfish/v1/UpdateService/FirmwareInventory/BMC_Firmware"),
            3
        );
        assert_eq!(clock.now(), Duration::from_secs(12));
    }

    #[test]
    fn test_version_retry_recovers() {
        let bmc = ScriptedBmc::new();
        let path = "/redfish/v1/UpdateService/FirmwareInventory/DPU_ATF";
        bmc.on("GET", path, 503, json!({}))
            .on("GET", path, 200, json!({"Version": "4.9.0"}));
        let s = testing::session(&bmc, &ManualClock::new());
        assert_eq!(s.get_version_with_retry(Component::ATF, 3), "4.9.0");
    }

    #[test]
    fn test_get_version_missing_field() {
        let bmc = ScriptedBmc::new();
        let path = "/redfish/v1/UpdateService/FirmwareInventory/DPU_NIC";
        bmc.on("GET", path, 200, json!({"Id": "DPU_NIC"}));
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            s.get_version(path),
            Err(UpdateError::BadResponseFormat(_))
        ));
    }

    #[test]
    fn test_probe() {
        let bmc = ScriptedBmc::new();
        bmc.on("GET", "/redfish/v1", 401, json!({}));
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(s.probe().is_ok());

        let bmc = ScriptedBmc::new();
        bmc.on("GET", "/redfish/v1", 500, json!({}));
        let s = testing::session(&bmc, &ManualClock::new());
        assert!(matches!(
            s.probe(),
            Err(UpdateError::InvalidStatusCode { status: 500, .. })
        ));
    }

    #[test]
    fn test_wait_until_gives_up_after_budget() {
        let clock = ManualClock::new();
        let s = testing::session(&ScriptedBmc::new(), &clock);
        let met = s.wait_until(Duration::from_secs(30), Duration::from_secs(4), false, || false);
        assert!(!met);
        assert!(clock.now() > Duration::from_secs(30));
        assert!(clock.now() <= Duration::from_secs(34));
    }
}
