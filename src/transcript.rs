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

// transcript.rs
// Request/response logging with credential redaction. Every block that
// reaches stdout, the tracing subscriber or the transcript file goes
// through Redactor first.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::network::Response;
use crate::{Credentials, UpdateError};

const MAX_LOGGED_REQUEST_BODY: usize = 1024;

/// Replaces every literal occurrence of the four credentials with `***`.
/// The placeholder is the same for all of them, so it cannot spell out a
/// credential's own name. At each position the longest matching secret wins, so a
/// username that is a prefix of the password cannot leave a tail behind.
#[derive(Debug, Clone)]
pub struct Redactor {
    secrets: Vec<String>,
}

const PLACEHOLDER: &str = "***";

impl Redactor {
    pub fn new(credentials: &Credentials) -> Redactor {
        let mut secrets: Vec<String> = [
            &credentials.password,
            &credentials.username,
            &credentials.ssh_password,
            &credentials.ssh_username,
        ]
        .into_iter()
        .filter(|secret| !secret.is_empty())
        .cloned()
        .collect();
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        Redactor { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        if self.secrets.is_empty() {
            return text.to_string();
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while !rest.is_empty() {
            for secret in &self.secrets {
                if rest.starts_with(secret.as_str()) {
                    out.push_str(PLACEHOLDER);
                    rest = &rest[secret.len()..];
                    continue 'scan;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
        out
    }
}

/// Append-only log of every request/response pair.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    /// Fails with FileNotAccessible unless the file, or the directory that
    /// would hold it, is writable.
    pub fn open(
        path: &Path,
        tool_version: &str,
        invocation_id: &str,
    ) -> Result<Transcript, UpdateError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|_| UpdateError::FileNotAccessible(format!("Log file: {}", path.display())))?;
        writeln!(f, "bfupdate Version: {tool_version} Task: {invocation_id}")
            .map_err(|e| UpdateError::io(format!("Writing {}", path.display()), e))?;
        Ok(Transcript {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, data: &str) {
        // A transcript write failure must not abort an update in flight.
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(mut f) => {
                if let Err(e) = f.write_all(data.as_bytes()) {
                    debug!("Failed writing transcript {}: {e}", self.path.display());
                }
            }
            Err(e) => debug!("Failed opening transcript {}: {e}", self.path.display()),
        }
    }
}

/// Builds the human readable block for one exchange.
pub fn format_block(title: &str, response: Option<&Response>) -> String {
    let mut data = format!("[======== {title} ========]: \n");
    if let Some(resp) = response {
        let req = &resp.request;
        data.push_str("[Request Line]: \n");
        data.push_str(&format!("{} {}\n", req.method, req.url));
        data.push_str("[Request Headers]:\n");
        data.push_str(&format!("{:?}\n", req.headers));
        data.push_str("[Request Body]:\n");
        data.push_str(&truncate(&req.body));
        data.push('\n');
        data.push_str("[Response status line]:\n");
        data.push_str(&format!("{} {}\n", resp.status, resp.reason));
        data.push_str("[Response Headers]:\n");
        data.push_str(&format!("{:?}\n", resp.headers));
        data.push_str("[Response Body]:\n");
        data.push_str(&resp.body);
        data.push('\n');
    }
    data
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_LOGGED_REQUEST_BODY {
        return body.to_string();
    }
    let mut end = MAX_LOGGED_REQUEST_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ... [Truncated]", &body[..end])
}

/// Where redacted exchange logs go: the tracing subscriber always, stdout in
/// debug mode, and the transcript file if one was given.
#[derive(Debug, Clone)]
pub struct Logger {
    redactor: Redactor,
    transcript: Option<Transcript>,
    echo: bool,
}

impl Logger {
    pub fn new(redactor: Redactor, transcript: Option<Transcript>, echo: bool) -> Logger {
        Logger {
            redactor,
            transcript,
            echo,
        }
    }

    pub fn log(&self, title: &str, response: Option<&Response>) {
        let data = self.redactor.redact(&format_block(title, response));
        debug!("{}", data.trim_end());
        if self.echo {
            print!("{data}");
        }
        if let Some(t) = &self.transcript {
            t.append(&data);
        }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }
}
