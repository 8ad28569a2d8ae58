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

use std::process::{Command, Stdio};

use tracing::debug;

use crate::UpdateError;

const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// Where to run a command other than locally.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// stdout and stderr combined
    pub output: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a shell command, locally or on a remote host over SSH.
pub trait CommandRunner {
    fn run(
        &self,
        command: &str,
        remote: Option<&RemoteTarget>,
    ) -> Result<CommandOutput, UpdateError>;
}

/// `sh -c` backend. Remote commands go through `sshpass` + `ssh`, with the
/// password in the environment and every value as its own argument.
#[derive(Debug, Default, Clone)]
pub struct ShellRunner;

impl ShellRunner {
    fn command(command: &str, remote: Option<&RemoteTarget>) -> Command {
        match remote {
            None => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(format!("( {command} ) 2>&1"));
                c
            }
            Some(r) => {
                let mut c = Command::new("sshpass");
                c.env("SSHPASS", &r.password)
                    .arg("-e")
                    .arg("ssh")
                    .args(SSH_OPTIONS)
                    .arg("-l")
                    .arg(&r.username)
                    .arg("--")
                    .arg(&r.host)
                    .arg(command);
                c
            }
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(
        &self,
        command: &str,
        remote: Option<&RemoteTarget>,
    ) -> Result<CommandOutput, UpdateError> {
        let out = Self::command(command, remote)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| UpdateError::io(format!("Spawning '{command}'"), e))?;
        let status = out.status.code().unwrap_or(-1);
        debug!("Command '{command}' exited {status}");
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(CommandOutput {
            output: output.trim().to_string(),
            status,
        })
    }
}
