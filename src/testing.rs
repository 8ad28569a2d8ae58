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

// Scripted BMC for unit tests. Integration tests carry their own copy under
// tests/common since cfg(test) items are not visible there.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::clock::ManualClock;
use crate::command::{CommandOutput, CommandRunner, RemoteTarget};
use crate::file_server::FileServerLauncher;
use crate::network::{HttpTransport, Request, RequestEcho, Response};
use crate::{Context, Credentials, Endpoint, ManagementSession, UpdateError};

#[derive(Debug, Clone)]
pub struct Sent {
    pub method: String,
    pub path: String,
    pub body: String,
}

#[derive(Default)]
struct Inner {
    routes: HashMap<String, VecDeque<(u16, String)>>,
    sent: Vec<Sent>,
}

/// Replies per `"METHOD /path"`. Queued replies are used in order and the
/// last one repeats. Unknown routes get a 404.
#[derive(Clone, Default)]
pub struct ScriptedBmc {
    inner: Rc<RefCell<Inner>>,
}

impl ScriptedBmc {
    pub fn new() -> ScriptedBmc {
        ScriptedBmc::default()
    }

    pub fn on(&self, method: &str, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.inner
            .borrow_mut()
            .routes
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.inner.borrow().sent.clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.sent()
            .iter()
            .filter(|s| s.method == method && s.path == path)
            .count()
    }
}

impl HttpTransport for ScriptedBmc {
    fn send(&self, request: Request) -> Result<Response, UpdateError> {
        let echo = RequestEcho::of(&request);
        let path = request
            .url
            .splitn(4, '/')
            .nth(3)
            .map(|p| format!("/{p}"))
            .unwrap_or_default();
        let mut inner = self.inner.borrow_mut();
        inner.sent.push(Sent {
            method: echo.method.clone(),
            path: path.clone(),
            body: echo.body.clone(),
        });
        let key = format!("{} {}", echo.method, path);
        let (status, body) = match inner.routes.get_mut(&key) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or((404, String::new())),
            Some(q) => q.front().cloned().unwrap_or((404, String::new())),
            None => (404, String::new()),
        };
        Ok(Response {
            status,
            reason: String::new(),
            headers: vec![],
            body,
            request: echo,
        })
    }
}

/// Remembers commands and answers each with the canned outputs of the
/// first matching needle. Like ScriptedBmc, queued outputs are used in
/// order and the last one repeats.
#[derive(Clone, Default)]
pub struct FakeRunner {
    replies: Rc<RefCell<Vec<(String, VecDeque<CommandOutput>)>>>,
    pub ran: Rc<RefCell<Vec<String>>>,
}

impl FakeRunner {
    pub fn reply(&self, needle: &str, output: &str, status: i32) {
        let out = CommandOutput {
            output: output.to_string(),
            status,
        };
        let mut replies = self.replies.borrow_mut();
        match replies.iter().position(|(n, _)| n == needle) {
            Some(i) => replies[i].1.push_back(out),
            None => replies.push((needle.to_string(), VecDeque::from([out]))),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        command: &str,
        _remote: Option<&RemoteTarget>,
    ) -> Result<CommandOutput, UpdateError> {
        self.ran.borrow_mut().push(command.to_string());
        let mut replies = self.replies.borrow_mut();
        let queue = replies
            .iter_mut()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, queue)| queue);
        Ok(match queue {
            Some(q) if q.len() > 1 => q.pop_front(),
            Some(q) => q.front().cloned(),
            None => None,
        }
        .unwrap_or(CommandOutput {
            output: String::new(),
            status: 0,
        }))
    }
}

pub fn session(bmc: &ScriptedBmc, clock: &ManualClock) -> ManagementSession {
    session_with(bmc, clock, FakeRunner::default(), |b| b)
}

pub fn session_with(
    bmc: &ScriptedBmc,
    clock: &ManualClock,
    runner: FakeRunner,
    customize: impl FnOnce(crate::ContextBuilder) -> crate::ContextBuilder,
) -> ManagementSession {
    let endpoint = Endpoint::new("127.0.0.1", None, Credentials::new("admin", "secret"))
        .expect("literal address");
    let builder = Context::builder(endpoint)
        .transport(Box::new(bmc.clone()))
        .clock(Box::new(clock.clone()))
        .runner(Box::new(runner))
        .launcher(FileServerLauncher::new("true", Vec::<String>::new()))
        .local_user("tester")
        .invocation_id("unit");
    ManagementSession::new(customize(builder).build().expect("context"))
}
