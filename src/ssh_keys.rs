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

// SCP needs mutual trust: the BMC must know this host's key, and this host
// must accept the BMC's key in authorized_keys.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, info};

use crate::session::ManagementSession;
use crate::{jsonmap, UpdateError};

const KEY_EXCHANGE_ACTION: &str =
    "UpdateService/Actions/Oem/NvidiaUpdateService.PublicKeyExchange";
const OWNER_WRITE: u32 = 0o200;

/// This host's public keys as served by its SSH daemon on `local_ip`.
pub fn local_keys(s: &ManagementSession, local_ip: IpAddr) -> Result<Vec<String>, UpdateError> {
    let out = s
        .ctx()
        .runner()
        .run(&format!("ssh-keyscan {local_ip}"), None)?;
    if !out.success() {
        return Err(UpdateError::LocalSshKeyUnavailable(format!(
            "ssh-keyscan {local_ip} exited {}: {}",
            out.status, out.output
        )));
    }
    let keys: Vec<String> = out
        .output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once(' ').map(|(_, key)| key.trim().to_string()))
        .filter(|k| !k.is_empty())
        .collect();
    if keys.is_empty() {
        return Err(UpdateError::LocalSshKeyUnavailable(format!(
            "ssh-keyscan {local_ip} returned no keys"
        )));
    }
    Ok(keys)
}

/// The invoking user's authorized_keys file.
#[derive(Debug, Clone)]
pub struct AuthorizedKeys {
    path: PathBuf,
}

impl AuthorizedKeys {
    pub fn in_dir(ssh_dir: &Path) -> AuthorizedKeys {
        AuthorizedKeys {
            path: ssh_dir.join("authorized_keys"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file contains nothing.
    pub fn contains(&self, key: &str) -> Result<bool, UpdateError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.contains(key.trim())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(UpdateError::io(format!("Reading {}", self.path.display()), e)),
        }
    }

    /// Appends `key` on its own line. A read-only file is made owner
    /// writable for the append and its mode restored afterwards.
    pub fn append(&self, key: &str) -> Result<(), UpdateError> {
        let ctx = |what: &str| format!("{what} {}", self.path.display());
        let original_mode = match fs::metadata(&self.path) {
            Ok(m) => Some(m.permissions().mode()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(dir) = self.path.parent() {
                    fs::create_dir_all(dir).map_err(|e| UpdateError::io(ctx("Creating dir for"), e))?;
                }
                None
            }
            Err(e) => return Err(UpdateError::io(ctx("Reading"), e)),
        };
        let restore = match original_mode {
            Some(mode) if mode & OWNER_WRITE == 0 => {
                fs::set_permissions(&self.path, fs::Permissions::from_mode(mode | OWNER_WRITE))
                    .map_err(|e| UpdateError::io(ctx("Making writable"), e))?;
                Some(mode)
            }
            _ => None,
        };

        let needs_newline = fs::read(&self.path)
            .map(|b| !b.is_empty() && !b.ends_with(b"\n"))
            .unwrap_or(false);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| {
                if needs_newline {
                    f.write_all(b"\n")?;
                }
                writeln!(f, "{}", key.trim())
            })
            .map_err(|e| UpdateError::io(ctx("Appending to"), e));

        if let Some(mode) = restore {
            fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))
                .map_err(|e| UpdateError::io(ctx("Restoring mode of"), e))?;
        }
        written
    }
}

/// Establishes the SSH trust an SCP pull needs.
pub struct KeyExchange<'a> {
    s: &'a ManagementSession,
}

impl<'a> KeyExchange<'a> {
    pub fn new(s: &'a ManagementSession) -> KeyExchange<'a> {
        KeyExchange { s }
    }

    /// Hands one local key to the BMC and returns the BMC's own key.
    pub fn exchange(&self, local_ip: IpAddr, key: &str) -> Result<String, UpdateError> {
        let data = json!({
            "RemoteServerIP": local_ip.to_string(),
            "RemoteServerKeyString": key,
        });
        let response = self
            .s
            .post("Exchange Public Key with BMC", KEY_EXCHANGE_ACTION, Some(&data))?;
        self.s.handle_status(&response, &[200], None)?;
        let body = jsonmap::body(&response)?;
        let bmc_key = jsonmap::get_str(
            &body,
            &["@Message.ExtendedInfo", "0", "MessageArgs", "0"],
            &response.request.url,
        )?;
        Ok(bmc_key.to_string())
    }

    /// Every local key goes to the BMC; every BMC key it hands back is
    /// trusted locally.
    pub fn establish(&self, local_ip: IpAddr) -> Result<(), UpdateError> {
        let authorized = AuthorizedKeys::in_dir(self.s.ctx().ssh_dir());
        for key in local_keys(self.s, local_ip)? {
            let bmc_key = self.exchange(local_ip, &key)?;
            if authorized.contains(&bmc_key)? {
                debug!("BMC key already in {}", authorized.path().display());
            } else {
                authorized.append(&bmc_key)?;
                info!("Added BMC key to {}", authorized.path().display());
            }
        }
        Ok(())
    }
}
