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

//! The per-module update workflows and the checks every one of them runs
//! first.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::nvidia_dpu::Bluefield;
use crate::session::ManagementSession;
use crate::tracker::{JobHandle, TaskTracker, SIMPLE_UPDATE_TARGET};
use crate::transfer::TransportNegotiator;
use crate::version::{VersionRegistry, VersionSnapshot};
use crate::{Context, TaskState, UpdateError};

pub mod bios;
pub mod bmc;
pub mod bundle;
pub mod config;
pub mod fru;
pub mod reset;

pub use bundle::{BundleManifest, BundleOptions};
pub use fru::FruData;

const PRIOR_JOB_BLIND_WAIT: Duration = Duration::from_secs(20 * 60);
const PRIOR_JOB_WAIT: Duration = Duration::from_secs(20 * 60);
const PRIOR_JOB_INTERVAL: Duration = Duration::from_secs(2);
const JITTER_SECS: std::ops::RangeInclusive<u64> = 10..=30;

/// What `-T` selects.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Module {
    BMC,
    CEC,
    BIOS,
    FRU,
    CONFIG,
    BUNDLE,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything the operator may pass for an update, before validation.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    pub image: Option<PathBuf>,
    pub fru: Vec<String>,
    pub lfwp: bool,
    pub reset_bios: bool,
    pub bundle_info: Option<PathBuf>,
}

/// One validated update. Each module carries exactly what it needs.
#[derive(Debug, Clone)]
pub enum UpdateRequest {
    Bmc { image: PathBuf },
    Cec { image: PathBuf },
    Bios { image: PathBuf },
    Fru(FruData),
    Config { image: PathBuf },
    Bundle(BundleOptions),
}

fn readable_image(image: Option<&Path>) -> Result<PathBuf, UpdateError> {
    let image = image.ok_or(UpdateError::MissingArgument("firmware file (-F)"))?;
    File::open(image)
        .map_err(|_| UpdateError::FileNotAccessible(format!("Firmware file: {}", image.display())))?;
    Ok(image.to_path_buf())
}

impl UpdateRequest {
    pub fn from_args(module: Module, args: &RequestArgs) -> Result<UpdateRequest, UpdateError> {
        let image = || readable_image(args.image.as_deref());
        Ok(match module {
            Module::BMC => UpdateRequest::Bmc { image: image()? },
            Module::CEC => UpdateRequest::Cec { image: image()? },
            Module::BIOS => UpdateRequest::Bios { image: image()? },
            Module::CONFIG => UpdateRequest::Config { image: image()? },
            Module::FRU => {
                if args.fru.is_empty() {
                    return Err(UpdateError::MissingArgument("FRU data (-s)"));
                }
                UpdateRequest::Fru(FruData::parse(&args.fru)?)
            }
            Module::BUNDLE => UpdateRequest::Bundle(BundleOptions {
                image: image()?,
                lfwp: args.lfwp,
                reset_bios: args.reset_bios,
                manifest: args
                    .bundle_info
                    .as_deref()
                    .map(BundleManifest::load)
                    .transpose()?,
            }),
        })
    }

    pub fn module(&self) -> Module {
        match self {
            UpdateRequest::Bmc { .. } => Module::BMC,
            UpdateRequest::Cec { .. } => Module::CEC,
            UpdateRequest::Bios { .. } => Module::BIOS,
            UpdateRequest::Fru(_) => Module::FRU,
            UpdateRequest::Config { .. } => Module::CONFIG,
            UpdateRequest::Bundle(_) => Module::BUNDLE,
        }
    }
}

/// What a finished workflow reports.
#[derive(Debug, Clone)]
pub enum UpdateReport {
    Updated {
        module: Module,
        old: String,
        new: String,
    },
    /// The BMC already runs this image
    Skipped { module: Module, version: String },
    Fru(FruData),
    Config,
    Bundle {
        old: VersionSnapshot,
        new: VersionSnapshot,
        table: String,
    },
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateReport::Updated { module, old, new } => write!(
                f,
                "OLD {module} Firmware Version: \n\t{old}\nNew {module} Firmware Version: \n\t{new}"
            ),
            UpdateReport::Skipped { version, .. } => {
                write!(f, "Skip updating the same version: {version}")
            }
            UpdateReport::Fru(data) => write!(f, "OEM FRU data updated: {}", data.to_json()),
            UpdateReport::Config => write!(f, "Configuration image applied"),
            UpdateReport::Bundle { table, .. } => f.write_str(table),
        }
    }
}

/// Runs workflows against the BMC of one Context.
pub struct Updater {
    s: ManagementSession,
}

impl Updater {
    pub fn new(ctx: Context) -> Updater {
        Updater {
            s: ManagementSession::new(ctx),
        }
    }

    pub fn session(&self) -> &ManagementSession {
        &self.s
    }

    pub fn run(&self, request: &UpdateRequest) -> Result<UpdateReport, UpdateError> {
        let module = request.module();
        info!("Starting {module} update");
        self.s.log(&format!("Start {module} update"));
        self.preamble(module)?;
        let report = match request {
            UpdateRequest::Bmc { image } => bmc::update_bmc(&self.s, image),
            UpdateRequest::Cec { image } => bmc::update_cec(&self.s, image),
            UpdateRequest::Bios { image } => bios::update(&self.s, image),
            UpdateRequest::Fru(data) => fru::update(&self.s, data),
            UpdateRequest::Config { image } => config::update(&self.s, image),
            UpdateRequest::Bundle(options) => bundle::update(&self.s, options),
        }?;
        info!("{module} update finished");
        Ok(report)
    }

    pub fn show_all_versions(&self) -> Result<VersionSnapshot, UpdateError> {
        self.s.probe()?;
        VersionRegistry::new(&self.s).list_all()
    }

    pub fn reset_config(&self, module: Module) -> Result<(), UpdateError> {
        self.s.probe()?;
        reset::reset_config(&self.s, module)
    }

    /// Reachability, update service, background copy, then any job a
    /// previous invocation left running.
    fn preamble(&self, module: Module) -> Result<(), UpdateError> {
        self.s.probe()?;
        TransportNegotiator::new(&self.s).wait_ready()?;
        Bluefield::new(&self.s).wait_background_copy()?;
        self.jitter();
        self.wait_for_prior_job(module)
    }

    /// Spreads out invocations racing the same BMC.
    fn jitter(&self) {
        let secs = rand::thread_rng().gen_range(JITTER_SECS);
        self.s.ctx().clock().sleep(Duration::from_secs(secs));
    }

    fn wait_for_prior_job(&self, module: Module) -> Result<(), UpdateError> {
        let tracker = TaskTracker::new(&self.s);
        let last = match tracker.latest() {
            Ok(last) => last,
            Err(e) => {
                warn!("Could not read the last task: {e}");
                if self.s.ctx().is_debug() {
                    println!("Error getting last task info: {e}");
                }
                None
            }
        };
        let Some(task) = last.filter(|t| t.task_state == TaskState::Running) else {
            return Ok(());
        };
        let target = task.payload.target_uri.clone().unwrap_or_default();
        println!(
            "Waiting for last task to finish:\n    Id:        {}\n    TargetUri: {target}",
            task.odata_id
        );
        self.s.log(&format!("Last task info: {}", task.summary()));
        // A SimpleUpdate job could be another invocation's, the tracker
        // can't tell.
        if target == SIMPLE_UPDATE_TARGET {
            self.s
                .log("SimpleUpdate task detected, waiting for 20 minutes");
            self.s.ctx().clock().sleep(PRIOR_JOB_BLIND_WAIT);
        }
        if let Err(e) = tracker.poll(
            &JobHandle::new(task.odata_id.clone()),
            PRIOR_JOB_WAIT,
            PRIOR_JOB_INTERVAL,
            None,
        ) {
            warn!("Previous task {} ended with: {e}", task.odata_id);
        }
        self.jitter();
        match tracker.latest()? {
            Some(t) if t.task_state == TaskState::Running => Err(UpdateError::BackgroundBusy(
                format!("Please try to update the {module} later"),
            )),
            _ => Ok(()),
        }
    }
}
