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

use std::{fmt, path::PathBuf, time::Duration};

use reqwest::{
    blocking::multipart, blocking::Client as HttpClient, blocking::ClientBuilder as HttpClientBuilder,
    header::AUTHORIZATION, Method,
};
use tracing::debug;

use crate::address::BmcAddress;
use crate::{Credentials, UpdateError};

pub const REDFISH_ENDPOINT: &str = "redfish/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// The BMC this invocation talks to. Resolved once, never re-resolved.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: BmcAddress,
    /// BMC port. If absent the default HTTPS port 443 is used
    pub port: Option<u16>,
    pub credentials: Credentials,
}

impl Endpoint {
    pub fn new(
        host: &str,
        port: Option<u16>,
        credentials: Credentials,
    ) -> Result<Endpoint, UpdateError> {
        Ok(Endpoint {
            address: BmcAddress::resolve(host)?,
            port,
            credentials,
        })
    }

    /// `https://host[:port]`
    pub fn base_url(&self) -> String {
        match self.port {
            Some(p) => format!("https://{}:{}", self.address.url_host(), p),
            None => format!("https://{}", self.address.url_host()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        path: PathBuf,
        content_type: String,
    },
}

#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(String),
    /// Raw upload of a single file
    File {
        path: PathBuf,
    },
    Multipart(Vec<Part>),
}

impl Body {
    /// Firmware uploads can take longer than any request budget.
    pub fn is_upload(&self) -> bool {
        matches!(self, Body::File { .. } | Body::Multipart(_))
    }

    /// What the transcript shows for this body.
    fn describe(&self) -> String {
        match self {
            Body::Empty => "None".to_string(),
            Body::Json(s) => s.clone(),
            Body::File { path } => format!("<file {}>", path.display()),
            Body::Multipart(parts) => parts
                .iter()
                .map(|p| match p {
                    Part::Text { name, value } => format!("{name}={value}"),
                    Part::File { name, path, .. } => format!("{name}=<file {}>", path.display()),
                })
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub basic_auth: Option<(String, String)>,
    pub timeout: Duration,
}

impl Request {
    /// Total deadline for the exchange. Uploads only get the connect
    /// timeout, so a slow link does not cut an image off halfway.
    pub fn deadline(&self) -> Option<Duration> {
        if self.body.is_upload() {
            None
        } else {
            Some(self.timeout)
        }
    }
}

/// Copy of the outgoing request, kept with the response for logging.
#[derive(Debug, Clone, Default)]
pub struct RequestEcho {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestEcho {
    pub fn of(req: &Request) -> RequestEcho {
        let mut headers = req.headers.clone();
        if req.basic_auth.is_some() {
            headers.push((AUTHORIZATION.to_string(), "Basic <redacted>".to_string()));
        }
        RequestEcho {
            method: req.method.to_string(),
            url: req.url.clone(),
            headers,
            body: req.body.describe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// Raw body text. Use [`Response::json`] for the parsed form.
    pub body: String,
    pub request: RequestEcho,
}

impl Response {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} {}",
            self.request.method, self.request.url, self.status, self.reason
        )
    }
}

/// The HTTP capability the updater needs. Chosen once when the
/// [`crate::Context`] is built.
pub trait HttpTransport {
    fn send(&self, request: Request) -> Result<Response, UpdateError>;
}

#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    accept_invalid_certs: bool,
    connect_timeout: Duration,
}

impl ReqwestTransportBuilder {
    /// Prevents the client from accepting self signed certificates
    /// and other invalid certificates.
    ///
    /// By default self signed certificates will be accepted, since BMCs usually
    /// use those.
    pub fn reject_invalid_certs(mut self) -> ReqwestTransportBuilder {
        self.accept_invalid_certs = false;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> ReqwestTransportBuilder {
        self.connect_timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<ReqwestTransport, UpdateError> {
        let http_client = HttpClientBuilder::new()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .connect_timeout(self.connect_timeout)
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| UpdateError::Network {
                url: String::new(),
                source: e,
            })?;
        Ok(ReqwestTransport { http_client })
    }
}

/// Blocking reqwest backend.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: HttpClient,
}

impl ReqwestTransport {
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder {
            // BMCs often have a self-signed cert, so usually this has to be true
            accept_invalid_certs: true,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: Request) -> Result<Response, UpdateError> {
        let echo = RequestEcho::of(&request);
        let url = request.url.clone();
        debug!("TX {} {}", echo.method, echo.url);

        let mut req_b = match request.method {
            Method::GET => self.http_client.get(&url),
            Method::POST => self.http_client.post(&url),
            Method::PUT => self.http_client.put(&url),
            Method::PATCH => self.http_client.patch(&url),
            ref m => self.http_client.request(m.clone(), &url),
        };
        for (k, v) in &request.headers {
            req_b = req_b.header(k.as_str(), v.as_str());
        }
        if let Some((user, password)) = &request.basic_auth {
            req_b = req_b.basic_auth(user, Some(password));
        }
        if let Some(deadline) = request.deadline() {
            req_b = req_b.timeout(deadline);
        }
        req_b = match request.body {
            Body::Empty => req_b,
            Body::Json(s) => req_b.body(s),
            Body::File { path } => {
                let f = std::fs::File::open(&path)
                    .map_err(|e| UpdateError::io(format!("Opening {}", path.display()), e))?;
                req_b.body(f)
            }
            Body::Multipart(parts) => {
                let mut form = multipart::Form::new();
                for part in parts {
                    form = match part {
                        Part::Text { name, value } => form.text(name, value),
                        Part::File {
                            name,
                            path,
                            content_type,
                        } => {
                            let p = multipart::Part::file(&path)
                                .map_err(|e| {
                                    UpdateError::io(format!("Opening {}", path.display()), e)
                                })?
                                .mime_str(&content_type)
                                .map_err(|e| UpdateError::Network {
                                    url: url.clone(),
                                    source: e,
                                })?;
                            form.part(name, p)
                        }
                    };
                }
                req_b.multipart(form)
            }
        };

        let response = req_b.send().map_err(|e| UpdateError::Network {
            url: url.clone(),
            source: e,
        })?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        // read the body even if not status 2XX, because BMCs give useful error messages as JSON
        let body = response.text().map_err(|e| UpdateError::Network {
            url: url.clone(),
            source: e,
        })?;
        debug!("RX {status}");
        Ok(Response {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            request: echo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("admin", "pw")
    }

    #[test]
    fn test_base_url() {
        let e = Endpoint::new("10.1.1.1", None, creds()).unwrap();
        assert_eq!(e.base_url(), "https://10.1.1.1");
        let e = Endpoint::new("fe80::2", Some(8443), creds()).unwrap();
        assert_eq!(e.base_url(), "https://[fe80::2]:8443");
    }

    #[test]
    fn test_echo_hides_basic_auth() {
        let req = Request {
            method: Method::POST,
            url: "https://h/redfish/v1".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Body::Multipart(vec![
                Part::Text {
                    name: "UpdateParameters".to_string(),
                    value: "{}".to_string(),
                },
                Part::File {
                    name: "UpdateFile".to_string(),
                    path: PathBuf::from("/tmp/fw.fwpkg"),
                    content_type: "application/octet-stream".to_string(),
                },
            ]),
            basic_auth: Some(("admin".to_string(), "pw".to_string())),
            timeout: Duration::from_secs(1),
        };
        let echo = RequestEcho::of(&req);
        assert_eq!(echo.method, "POST");
        assert!(echo.headers.iter().all(|(_, v)| !v.contains("pw")));
        assert_eq!(
            echo.body,
            "UpdateParameters={}; UpdateFile=<file /tmp/fw.fwpkg>"
        );
    }

    #[test]
    fn test_upload_has_no_total_deadline() {
        let mut req = Request {
            method: Method::POST,
            url: "https://h/redfish/v1/UpdateService/update-multipart".to_string(),
            headers: vec![],
            body: Body::Multipart(vec![Part::File {
                name: "UpdateFile".to_string(),
                path: PathBuf::from("/tmp/bf-bundle.bfb"),
                content_type: "application/octet-stream".to_string(),
            }]),
            basic_auth: None,
            timeout: Duration::from_secs(120),
        };
        assert_eq!(req.deadline(), None);
        req.body = Body::File {
            path: PathBuf::from("/tmp/bf-bundle.bfb"),
        };
        assert_eq!(req.deadline(), None);
        req.body = Body::Json("{}".to_string());
        assert_eq!(req.deadline(), Some(Duration::from_secs(120)));
        req.body = Body::Empty;
        assert_eq!(req.deadline(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_response_json() {
        let resp = Response {
            status: 200,
            reason: "OK".to_string(),
            headers: vec![],
            body: r#"{"Version": "BF-24.10-33"}"#.to_string(),
            request: RequestEcho::default(),
        };
        assert_eq!(resp.json().unwrap()["Version"], "BF-24.10-33");
        let text = Response {
            body: "not json".to_string(),
            ..resp
        };
        assert!(text.json().is_none());
    }
}
