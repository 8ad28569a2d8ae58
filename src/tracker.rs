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

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::model::{Collection, Task};
use crate::network::Response;
use crate::progress::Progress;
use crate::session::ManagementSession;
use crate::{jsonmap, UpdateError};

/// Target of a job started through the generic SimpleUpdate action.
pub const SIMPLE_UPDATE_TARGET: &str =
    "/redfish/v1/UpdateService/Actions/UpdateService.SimpleUpdate";

const IDENTICAL_IMAGE_MARKER: &str = "Component image is identical";
const BACKGROUND_COPY_MARKER: &str = "Wait for background copy operation";

/// Opaque job reference, the `@odata.id` of a Task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(uri: impl Into<String>) -> JobHandle {
        JobHandle(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Completed / OK / 100
    Completed,
    /// The BMC refused the image because it is already running it.
    SkippedIdentical,
}

impl JobOutcome {
    pub fn updated(&self) -> bool {
        *self == JobOutcome::Completed
    }
}

/// Translates a failed job into a situation specific error.
pub type JobErrorHandler<'h> = &'h dyn Fn(&Task) -> Option<UpdateError>;

pub struct TaskTracker<'a> {
    s: &'a ManagementSession,
}

impl<'a> TaskTracker<'a> {
    pub fn new(s: &'a ManagementSession) -> TaskTracker<'a> {
        TaskTracker { s }
    }

    /// The job handle carried by an action response.
    pub fn submit(&self, response: &Response) -> Result<JobHandle, UpdateError> {
        let body = jsonmap::body(response)?;
        let uri = jsonmap::get_str(&body, &["@odata.id"], &response.request.url)?;
        debug!("Job {uri} submitted");
        Ok(JobHandle::new(uri))
    }

    pub fn status(&self, handle: &JobHandle) -> Result<Task, UpdateError> {
        self.s.get_resource("Get Task Status", handle.as_str())
    }

    /// Samples the job every `interval` until it leaves Running or
    /// `max_wait` has elapsed. A job still Running when sampled at exactly
    /// `max_wait` is a timeout.
    pub fn poll(
        &self,
        handle: &JobHandle,
        max_wait: Duration,
        interval: Duration,
        handler: Option<JobErrorHandler<'_>>,
    ) -> Result<JobOutcome, UpdateError> {
        let clock = self.s.ctx().clock();
        let progress = Progress::new();
        let start = clock.now();
        let task = loop {
            let task = self.status(handle)?;
            progress.show(task.percent_complete as f64);
            if task.is_terminal() {
                break task;
            }
            let elapsed = clock.now().saturating_sub(start);
            if elapsed >= max_wait {
                progress.finish();
                return Err(UpdateError::JobTimeout(handle.to_string()));
            }
            clock.sleep(interval.min(max_wait - elapsed));
        };
        progress.finish();
        self.evaluate(&task, handler)
    }

    fn evaluate(
        &self,
        task: &Task,
        handler: Option<JobErrorHandler<'_>>,
    ) -> Result<JobOutcome, UpdateError> {
        if task.is_success() {
            info!("Job {} completed", task.odata_id);
            return Ok(JobOutcome::Completed);
        }
        let message = task.message_text();
        if message.contains(IDENTICAL_IMAGE_MARKER) {
            return Ok(JobOutcome::SkippedIdentical);
        }
        if message.contains(BACKGROUND_COPY_MARKER) {
            return Err(UpdateError::BackgroundBusy(
                "Please try to update the firmware later".to_string(),
            ));
        }
        if let Some(e) = handler.and_then(|h| h(task)) {
            return Err(e);
        }
        Err(UpdateError::JobFailed(format!(
            "{} {}/{}: {}",
            task.task_state,
            task.task_status,
            task.percent_complete,
            task.summary()
        )))
    }

    /// The most recently created job, if the BMC has any.
    pub fn latest(&self) -> Result<Option<Task>, UpdateError> {
        let tasks: Collection = self.s.get_resource("Get Task List", "TaskService/Tasks")?;
        let Some(last) = tasks.members.last() else {
            return Ok(None);
        };
        let mut task = self.status(&JobHandle::new(last.odata_id.clone()))?;
        if task.odata_id.is_empty() {
            task.odata_id = last.odata_id.clone();
        }
        Ok(Some(task))
    }
}
