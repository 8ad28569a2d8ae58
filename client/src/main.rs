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

/* Out-of-band firmware update for BlueField DPUs through their BMC.
 *
 * USAGE: bfupdate -H 10.153.145.103 -U TheBMCUsername -P TheBMCPassword -T BMC -F bf3-bmc.fwpkg
 * -H: IP address or host name of the BMC's Redfish API. HTTPS on port 443 unless -p.
 * Run with `-h` for help, `-d` for request/response logging.
 */

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use bfupdate::workflow::RequestArgs;
use bfupdate::{
    file_server, Context, Credentials, Endpoint, Module, TransferProtocol, UpdateError,
    UpdateRequest, Updater, VERSION,
};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "bfupdate", about = "Update BlueField DPU firmware through the BMC")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    worker: Option<Worker>,

    /// Username of BMC
    #[arg(short = 'U', value_name = "USERNAME")]
    username: Option<String>,

    /// Password of BMC
    #[arg(short = 'P', value_name = "PASSWORD")]
    password: Option<String>,

    /// Username of BMC SSH access. Defaults to -U
    #[arg(short = 'S', value_name = "SSH_USERNAME")]
    ssh_username: Option<String>,

    /// SSH password of BMC. Defaults to -P
    #[arg(short = 'K', value_name = "SSH_PASSWORD")]
    ssh_password: Option<String>,

    /// IP/Host of BMC
    #[arg(short = 'H', value_name = "BMC_IP")]
    host: Option<String>,

    /// Port of BMC (443 by default)
    #[arg(short = 'p', long = "port", value_name = "BMC_PORT")]
    port: Option<u16>,

    /// The module to be updated
    #[arg(short = 'T', value_enum, ignore_case = true, value_name = "MODULE")]
    module: Option<Module>,

    /// Firmware file path (absolute/relative)
    #[arg(short = 'F', value_name = "FIRMWARE_FILE")]
    firmware: Option<PathBuf>,

    /// FRU data in the format "Section:Key=Value"
    #[arg(short = 's', value_name = "OEM_FRU")]
    oem_fru: Vec<String>,

    /// Reset to factory configuration (Only used for BMC|BIOS)
    #[arg(short = 'C')]
    clear_config: bool,

    /// Output log file
    #[arg(short = 'o', long = "output", value_name = "OUTPUT_LOG_FILE")]
    output: Option<PathBuf>,

    /// Configuration image applied after the update
    #[arg(long = "config", value_name = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(
        long = "bios-update-protocol",
        alias = "bios_update_protocol",
        value_enum,
        ignore_case = true,
        hide = true
    )]
    bios_update_protocol: Option<TransferProtocol>,

    /// Do not upgrade if the image is the version already running
    #[arg(long = "skip-same-version", alias = "skip_same_version")]
    skip_same_version: bool,

    #[arg(long = "show-all-versions", alias = "show_all_versions", hide = true)]
    show_all_versions: bool,

    /// Apply a BUNDLE with live firmware patching, without a DPU reboot
    #[arg(long = "lfwp")]
    lfwp: bool,

    /// Reset UEFI settings after a BUNDLE update
    #[arg(long = "reset-bios")]
    reset_bios: bool,

    /// JSON description of the versions inside a BUNDLE
    #[arg(long = "bundle-info", value_name = "JSON")]
    bundle_info: Option<PathBuf>,

    /// Unique identifier for this run, written into the log file
    #[arg(long = "task-id", value_name = "TASK_ID")]
    task_id: Option<String>,

    /// Show more debug info
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Show the version of this tool
    #[arg(short = 'v', long = "version")]
    show_version: bool,
}

#[derive(Subcommand, Debug)]
enum Worker {
    /// Serve one directory over HTTP until stdin closes.
    #[command(hide = true)]
    ServeFile {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        bind: IpAddr,
    },
}

fn init_logging(debug: bool) {
    let log_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }
    // stdout belongs to the operator output and the worker's port handoff
    tracing_subscriber::registry()
        .with(Layer::default().compact().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    if let Some(Worker::ServeFile { dir, bind }) = &args.worker {
        return match file_server::run_worker(dir, *bind) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(exit_code(&e))
            }
        };
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[Error Happened]:\n\t{e}");
            if args.debug {
                eprintln!("{:?}", e.record());
            }
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &UpdateError) -> u8 {
    u8::try_from(e.code()).unwrap_or(u8::MAX)
}

fn run(args: &Args) -> Result<(), UpdateError> {
    if args.show_version {
        println!("{VERSION}");
        return Ok(());
    }
    let (Some(username), Some(password), Some(host)) =
        (&args.username, &args.password, &args.host)
    else {
        println!(
            "Please use -h/--help to get help information, \
             the following arguments are required for Update: -U, -P, -H."
        );
        return Ok(());
    };
    if args.module.is_some()
        && args.firmware.is_none()
        && !args.clear_config
        && args.oem_fru.is_empty()
    {
        println!("Argument -F, -C or -s is required while -T is provided");
        return Ok(());
    }

    let credentials = Credentials::new(username, password)
        .with_ssh(args.ssh_username.as_deref(), args.ssh_password.as_deref());
    let endpoint = Endpoint::new(host, args.port, credentials)?;
    let mut builder = Context::builder(endpoint)
        .debug(args.debug)
        .skip_same_version(args.skip_same_version)
        .forced_protocol(args.bios_update_protocol)
        .transcript(args.output.clone());
    if let Some(task_id) = &args.task_id {
        builder = builder.invocation_id(task_id.clone());
    }
    let ctx = builder.build()?;
    debug!("Context: {ctx:?}");
    let updater = Updater::new(ctx);

    if args.show_all_versions {
        print!("{}", updater.show_all_versions()?);
        return Ok(());
    }

    let request_args = RequestArgs {
        image: args.firmware.clone(),
        fru: args.oem_fru.clone(),
        lfwp: args.lfwp,
        reset_bios: args.reset_bios,
        bundle_info: args.bundle_info.clone(),
    };

    if let Some(module) = args.module {
        if args.firmware.is_some() || !args.oem_fru.is_empty() {
            let request = UpdateRequest::from_args(module, &request_args)?;
            let report = updater.run(&request)?;
            info!("{module} update finished");
            println!("{report}");
            println!("Upgrade success!");
        }
    }

    if let Some(config_file) = &args.config_file {
        let config_args = RequestArgs {
            image: Some(config_file.clone()),
            ..Default::default()
        };
        let request = UpdateRequest::from_args(Module::CONFIG, &config_args)?;
        println!("{}", updater.run(&request)?);
    }

    if args.clear_config {
        let module = args
            .module
            .ok_or(UpdateError::MissingArgument("module (-T) for -C"))?;
        updater.reset_config(module)?;
    }
    Ok(())
}
