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

pub mod model;
pub use model::{Component, Task, TaskState, TransferProtocol, UpdateService};

pub mod access;
pub mod address;
pub mod clock;
pub mod command;
mod error;
pub mod file_server;
pub mod image;
mod jsonmap;
pub mod network;
pub mod nvidia_dpu;
pub mod progress;
pub mod session;
pub mod ssh_keys;
#[cfg(test)]
mod testing;
pub mod tracker;
pub mod transcript;
pub mod transfer;
pub mod version;
pub mod workflow;

pub use error::{ErrorKind, ErrorRecord, UpdateError};
pub use network::{
    Endpoint, HttpTransport, ReqwestTransport, ReqwestTransportBuilder, REDFISH_ENDPOINT,
};
pub use session::ManagementSession;
pub use workflow::{Module, UpdateReport, UpdateRequest, Updater};

use clock::{Clock, SystemClock};
use command::{CommandRunner, RemoteTarget, ShellRunner};
use file_server::FileServerLauncher;
use transcript::{Logger, Redactor, Transcript};

/// Version of this tool, written into every transcript.
pub const VERSION: &str = "25.04-1.3";

/// BMC login plus the SSH login used for commands run on the BMC itself.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub ssh_username: String,
    pub ssh_password: String,
}

impl Credentials {
    /// SSH credentials default to the BMC ones.
    pub fn new(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
            ssh_username: username.to_string(),
            ssh_password: password.to_string(),
        }
    }

    pub fn with_ssh(mut self, ssh_username: Option<&str>, ssh_password: Option<&str>) -> Self {
        if let Some(u) = ssh_username {
            self.ssh_username = u.to_string();
        }
        if let Some(p) = ssh_password {
            self.ssh_password = p.to_string();
        }
        self
    }
}

// Never print the secrets, even in debug output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<username>")
            .field("ssh_username", &"<ssh_username>")
            .finish_non_exhaustive()
    }
}

/// Per-method request timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub get: Duration,
    pub post: Duration,
    pub put: Duration,
    pub patch: Duration,
    /// Used by the reachability check only
    pub probe: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            get: Duration::from_secs(60),
            post: Duration::from_secs(120),
            put: Duration::from_secs(60),
            patch: Duration::from_secs(60),
            probe: Duration::from_secs(10),
        }
    }
}

/// Everything one invocation needs, fixed at construction. The capabilities
/// (HTTP transport, command runner, clock) are chosen here once.
pub struct Context {
    endpoint: Endpoint,
    debug: bool,
    skip_same_version: bool,
    forced_protocol: Option<TransferProtocol>,
    invocation_id: String,
    timeouts: Timeouts,
    transport: Box<dyn HttpTransport>,
    runner: Box<dyn CommandRunner>,
    clock: Box<dyn Clock>,
    logger: Logger,
    launcher: FileServerLauncher,
    ssh_dir: PathBuf,
    local_user: String,
}

impl Context {
    pub fn builder(endpoint: Endpoint) -> ContextBuilder {
        ContextBuilder::new(endpoint)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn credentials(&self) -> &Credentials {
        &self.endpoint.credentials
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn skip_same_version(&self) -> bool {
        self.skip_same_version
    }

    pub fn forced_protocol(&self) -> Option<TransferProtocol> {
        self.forced_protocol
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn launcher(&self) -> &FileServerLauncher {
        &self.launcher
    }

    /// The invoking user's `~/.ssh`
    pub fn ssh_dir(&self) -> &PathBuf {
        &self.ssh_dir
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// SSH login to the BMC for remote commands.
    pub fn bmc_ssh_target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.endpoint.address.ip().to_string(),
            username: self.endpoint.credentials.ssh_username.clone(),
            password: self.endpoint.credentials.ssh_password.clone(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("endpoint", &self.endpoint)
            .field("debug", &self.debug)
            .field("skip_same_version", &self.skip_same_version)
            .field("forced_protocol", &self.forced_protocol)
            .field("invocation_id", &self.invocation_id)
            .finish_non_exhaustive()
    }
}

pub struct ContextBuilder {
    endpoint: Endpoint,
    debug: bool,
    skip_same_version: bool,
    forced_protocol: Option<TransferProtocol>,
    invocation_id: Option<String>,
    transcript: Option<PathBuf>,
    timeouts: Timeouts,
    transport: Option<Box<dyn HttpTransport>>,
    runner: Option<Box<dyn CommandRunner>>,
    clock: Option<Box<dyn Clock>>,
    launcher: Option<FileServerLauncher>,
    ssh_dir: Option<PathBuf>,
    local_user: Option<String>,
}

impl ContextBuilder {
    pub fn new(endpoint: Endpoint) -> ContextBuilder {
        ContextBuilder {
            endpoint,
            debug: false,
            skip_same_version: false,
            forced_protocol: None,
            invocation_id: None,
            transcript: None,
            timeouts: Timeouts::default(),
            transport: None,
            runner: None,
            clock: None,
            launcher: None,
            ssh_dir: None,
            local_user: None,
        }
    }

    /// Echo every redacted request/response block on stdout.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn skip_same_version(mut self, skip: bool) -> Self {
        self.skip_same_version = skip;
        self
    }

    pub fn forced_protocol(mut self, protocol: Option<TransferProtocol>) -> Self {
        self.forced_protocol = protocol;
        self
    }

    pub fn invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Append-only transcript file. Opened, and checked, by `build`.
    pub fn transcript(mut self, path: Option<PathBuf>) -> Self {
        self.transcript = path;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn transport(mut self, transport: Box<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn launcher(mut self, launcher: FileServerLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn ssh_dir(mut self, dir: PathBuf) -> Self {
        self.ssh_dir = Some(dir);
        self
    }

    pub fn local_user(mut self, user: impl Into<String>) -> Self {
        self.local_user = Some(user.into());
        self
    }

    pub fn build(self) -> Result<Context, UpdateError> {
        let invocation_id = self
            .invocation_id
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string());
        let transcript = match self.transcript {
            Some(path) => Some(Transcript::open(&path, VERSION, &invocation_id)?),
            None => None,
        };
        let logger = Logger::new(
            Redactor::new(&self.endpoint.credentials),
            transcript,
            self.debug,
        );
        let transport = match self.transport {
            Some(t) => t,
            None => Box::new(ReqwestTransport::builder().build()?),
        };
        let launcher = match self.launcher {
            Some(l) => l,
            None => FileServerLauncher::current_exe()?,
        };
        let ssh_dir = self.ssh_dir.unwrap_or_else(|| {
            let home = std::env::var_os("HOME").unwrap_or_else(|| "/root".into());
            PathBuf::from(home).join(".ssh")
        });
        let local_user = self.local_user.unwrap_or_else(|| {
            std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .unwrap_or_else(|_| "root".to_string())
        });
        Ok(Context {
            endpoint: self.endpoint,
            debug: self.debug,
            skip_same_version: self.skip_same_version,
            forced_protocol: self.forced_protocol,
            invocation_id,
            timeouts: self.timeouts,
            transport,
            runner: self.runner.unwrap_or_else(|| Box::new(ShellRunner)),
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock::default())),
            logger,
            launcher,
            ssh_dir,
            local_user,
        })
    }
}
