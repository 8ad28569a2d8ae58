// Mock BMC and command runner shared by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::rc::Rc;

use bfupdate::clock::ManualClock;
use bfupdate::command::{CommandOutput, CommandRunner, RemoteTarget};
use bfupdate::file_server::FileServerLauncher;
use bfupdate::network::{Request, RequestEcho, Response};
use bfupdate::{Context, ContextBuilder, Credentials, Endpoint, HttpTransport, UpdateError};

pub const V1: &str = "/redfish/v1";

pub fn path(p: &str) -> String {
    format!("{V1}/{p}")
}

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub path: String,
    pub body: String,
}

#[derive(Default)]
struct State {
    routes: HashMap<String, VecDeque<(u16, String)>>,
    calls: Vec<Call>,
}

/// Canned replies per method and path. The last reply for a route repeats,
/// unknown routes answer 404 with no body.
#[derive(Clone, Default)]
pub struct MockBmc {
    state: Rc<RefCell<State>>,
}

impl MockBmc {
    pub fn new() -> MockBmc {
        MockBmc::default()
    }

    pub fn reply(&self, method: &str, path: &str, status: u16, body: serde_json::Value) -> &Self {
        self.state
            .borrow_mut()
            .routes
            .entry(format!("{method} {path}"))
            .or_default()
            .push_back((status, body.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn calls_to(&self, method: &str, path: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method && c.path == path)
            .collect()
    }
}

impl HttpTransport for MockBmc {
    fn send(&self, request: Request) -> Result<Response, UpdateError> {
        let echo = RequestEcho::of(&request);
        let path = request
            .url
            .splitn(4, '/')
            .nth(3)
            .map(|p| format!("/{p}"))
            .unwrap_or_default();
        let mut state = self.state.borrow_mut();
        state.calls.push(Call {
            method: echo.method.clone(),
            path: path.clone(),
            body: echo.body.clone(),
        });
        let reply = match state.routes.get_mut(&format!("{} {path}", echo.method)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        let (status, body) = reply.unwrap_or((404, String::new()));
        Ok(Response {
            status,
            reason: String::new(),
            headers: vec![],
            body,
            request: echo,
        })
    }
}

/// Records commands, answers with the first reply whose needle matches.
#[derive(Clone, Default)]
pub struct MockRunner {
    replies: Rc<RefCell<Vec<(String, String)>>>,
    pub ran: Rc<RefCell<Vec<String>>>,
}

impl MockRunner {
    pub fn reply(&self, needle: &str, output: &str) {
        self.replies
            .borrow_mut()
            .push((needle.to_string(), output.to_string()));
    }
}

impl CommandRunner for MockRunner {
    fn run(
        &self,
        command: &str,
        _remote: Option<&RemoteTarget>,
    ) -> Result<CommandOutput, UpdateError> {
        self.ran.borrow_mut().push(command.to_string());
        let output = self
            .replies
            .borrow()
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(CommandOutput { output, status: 0 })
    }
}

/// A file server stand-in that reports port 4242 and exits when its stdin
/// closes.
pub fn fake_file_server() -> FileServerLauncher {
    FileServerLauncher::new("sh", ["-c", "echo 4242; cat >/dev/null"])
}

pub fn builder(bmc: &MockBmc, clock: &ManualClock, runner: &MockRunner) -> ContextBuilder {
    let endpoint = Endpoint::new("127.0.0.1", None, Credentials::new("admin", "0penBmc"))
        .expect("literal address");
    Context::builder(endpoint)
        .transport(Box::new(bmc.clone()))
        .clock(Box::new(clock.clone()))
        .runner(Box::new(runner.clone()))
        .launcher(fake_file_server())
        .local_user("operator")
        .invocation_id("it")
}

pub fn write_image(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let image = dir.join(name);
    std::fs::write(&image, contents).expect("write image");
    image
}

/// The replies every workflow needs before its own steps: reachable BMC,
/// enabled update service, idle background copy, no previous task.
pub fn healthy(bmc: &MockBmc, service: serde_json::Value) {
    bmc.reply("GET", V1, 200, serde_json::json!({}))
        .reply("GET", &path("UpdateService"), 200, service)
        .reply(
            "GET",
            &path("Chassis/Bluefield_ERoT"),
            200,
            serde_json::json!({"Oem": {"Nvidia": {"BackgroundCopyStatus": "Completed"}}}),
        )
        .reply(
            "GET",
            &path("TaskService/Tasks"),
            200,
            serde_json::json!({"Members": []}),
        );
}
