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

// file_server.rs
// Transient static file server the BMC pulls an image from over HTTP.
// The server is a child process: this binary re-executed with a hidden
// subcommand. It reports its port on the first line of stdout and exits
// once its stdin reaches EOF, which happens when the parent's handle is
// dropped or the parent dies.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use axum::Router;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::UpdateError;

/// Subcommand the worker is started with.
pub const WORKER_SUBCOMMAND: &str = "serve-file";

const HANDOFF_TIMEOUT: Duration = Duration::from_secs(60);

/// How to start the worker process.
#[derive(Debug, Clone)]
pub struct FileServerLauncher {
    program: PathBuf,
    args: Vec<String>,
    handoff_timeout: Duration,
}

impl FileServerLauncher {
    /// `program args.. --dir <dir> --bind <ip>` is what gets run.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> FileServerLauncher
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FileServerLauncher {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            handoff_timeout: HANDOFF_TIMEOUT,
        }
    }

    /// The running executable with the hidden worker subcommand.
    pub fn current_exe() -> Result<FileServerLauncher, UpdateError> {
        let exe = std::env::current_exe()
            .map_err(|e| UpdateError::io("Locating current executable", e))?;
        Ok(FileServerLauncher::new(exe, [WORKER_SUBCOMMAND]))
    }

    pub fn with_handoff_timeout(mut self, timeout: Duration) -> FileServerLauncher {
        self.handoff_timeout = timeout;
        self
    }

    /// Starts a worker serving `dir` on an ephemeral port of `bind` and
    /// waits for it to report the port.
    pub fn launch(&self, dir: &Path, bind: IpAddr) -> Result<FileServerHandle, UpdateError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--dir")
            .arg(dir)
            .arg("--bind")
            .arg(bind.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                UpdateError::FileServerStart(format!("{}: {e}", self.program.display()))
            })?;
        let stdin = child.stdin.take();
        let port = match child.stdout.take() {
            Some(stdout) => read_port(stdout, self.handoff_timeout),
            None => Err(UpdateError::FileServerStart("no stdout".to_string())),
        };
        let mut handle = FileServerHandle { child, stdin, port: 0 };
        handle.port = port?;
        info!("File server serving {} on port {}", dir.display(), handle.port);
        Ok(handle)
    }
}

/// Reads the first stdout line of the worker on a helper thread, bounded by
/// `timeout`.
fn read_port<R>(stdout: R, timeout: Duration) -> Result<u16, UpdateError>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let result = BufReader::new(stdout).read_line(&mut line).map(|_| line);
        let _ = tx.send(result);
    });
    let line = match rx.recv_timeout(timeout) {
        Ok(Ok(line)) => line,
        Ok(Err(e)) => return Err(UpdateError::FileServerStart(e.to_string())),
        Err(_) => {
            return Err(UpdateError::FileServerStart(format!(
                "no port reported within {}s",
                timeout.as_secs()
            )))
        }
    };
    line.trim()
        .parse::<u16>()
        .map_err(|_| UpdateError::FileServerStart(format!("unexpected handoff {:?}", line.trim())))
}

/// A running worker. Dropping it closes the worker's stdin and reaps it.
#[derive(Debug)]
pub struct FileServerHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    port: u16,
}

impl FileServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for FileServerHandle {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        debug!("File server worker stopped");
    }
}

/// Worker process body: serve `dir` until stdin closes.
pub fn run_worker(dir: &Path, bind: IpAddr) -> Result<(), UpdateError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| UpdateError::io("Starting file server runtime", e))?;
    let dir = dir.to_path_buf();
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind((bind, 0))
            .await
            .map_err(|e| UpdateError::io(format!("Binding {bind}"), e))?;
        let port = listener
            .local_addr()
            .map_err(|e| UpdateError::io("Reading bound address", e))?
            .port();
        let mut stdout = std::io::stdout();
        writeln!(stdout, "{port}")
            .and_then(|_| stdout.flush())
            .map_err(|e| UpdateError::io("Reporting port", e))?;

        let app = Router::new().fallback_service(ServeDir::new(dir));
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::task::spawn_blocking(|| {
                    std::io::copy(&mut std::io::stdin(), &mut std::io::sink())
                })
                .await;
            })
            .await
            .map_err(|e| UpdateError::io("Serving files", e))
    })
}
