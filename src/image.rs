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

// Cheap checks on a firmware file before it is sent anywhere: printable
// string markers embedded in the image, and versions encoded in the file
// name. This is not an image parser.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use regex::Regex;

use crate::model::Component;
use crate::UpdateError;

/// Shortest run of printable bytes that counts as a string.
const MIN_STRING_LEN: usize = 4;

const BMC_MARKER: &str = "apfw";
const CEC_MARKER: &str = "ecfw";
const CONFIG_MARKER: &str = "toutiao";
const ATF_BUILD_TAGS: [&str; 2] = ["(release)", "(debug)"];

/// What a firmware file is expected to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Controller,
    Companion,
    BootFirmware,
    Config,
}

/// Calls `visit` with every printable string in the file, in order, until
/// it returns true. Returns whether it did.
fn scan_strings<F>(path: &Path, mut visit: F) -> Result<bool, UpdateError>
where
    F: FnMut(&str) -> bool,
{
    let file = File::open(path)
        .map_err(|_| UpdateError::FileNotAccessible(format!("Firmware file: {}", path.display())))?;
    let mut reader = BufReader::with_capacity(1 << 16, file);
    let mut buf = [0u8; 1 << 16];
    let mut current: Vec<u8> = Vec::with_capacity(256);
    let mut flush = |current: &mut Vec<u8>, visit: &mut F| -> bool {
        let hit = current.len() >= MIN_STRING_LEN
            && visit(std::str::from_utf8(current).unwrap_or_default());
        current.clear();
        hit
    };
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| UpdateError::io(format!("Reading {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        for &b in &buf[..n] {
            if b == b'\t' || (0x20..0x7f).contains(&b) {
                current.push(b);
            } else if flush(&mut current, &mut visit) {
                return Ok(true);
            }
        }
    }
    Ok(flush(&mut current, &mut visit))
}

/// Case-insensitive search for `marker` in the printable strings of the file.
pub fn contains_marker(path: &Path, marker: &str) -> Result<bool, UpdateError> {
    let marker = marker.to_lowercase();
    scan_strings(path, |s| s.to_lowercase().contains(&marker))
}

/// The first embedded ATF build string, e.g.
/// `v2.2(release):4.9.0-25-g1ea8a8b`.
pub fn atf_version_line(path: &Path) -> Result<Option<String>, UpdateError> {
    let mut found = None;
    scan_strings(path, |s| {
        if ATF_BUILD_TAGS.iter().any(|tag| s.contains(tag)) {
            found = Some(s.trim().to_string());
            true
        } else {
            false
        }
    })?;
    Ok(found)
}

/// Like [`atf_version_line`] but a missing line is an error.
pub fn require_atf_version(path: &Path) -> Result<String, UpdateError> {
    atf_version_line(path)?.ok_or_else(|| {
        UpdateError::ImageVersionUnreadable(format!("No ATF version in {}", path.display()))
    })
}

/// Does the file look like firmware for `kind`.
pub fn matches(path: &Path, kind: ImageKind) -> Result<bool, UpdateError> {
    match kind {
        ImageKind::Controller => contains_marker(path, BMC_MARKER),
        ImageKind::Companion => contains_marker(path, CEC_MARKER),
        ImageKind::BootFirmware => Ok(atf_version_line(path)?.is_some()),
        ImageKind::Config => {
            Ok(atf_version_line(path)?.is_some() && contains_marker(path, CONFIG_MARKER)?)
        }
    }
}

/// Fails with ImageMismatch unless the file looks like firmware for `kind`.
pub fn verify(path: &Path, kind: ImageKind) -> Result<(), UpdateError> {
    if matches(path, kind)? {
        Ok(())
    } else {
        Err(UpdateError::ImageMismatch(format!(
            "{} is not a {kind:?} image",
            path.display()
        )))
    }
}

/// The version encoded in a BMC or CEC firmware file name.
pub fn version_from_filename(path: &Path, component: Component) -> Result<String, UpdateError> {
    let pattern = match component {
        Component::BMC => r"\d\d.\d\d-\d",
        Component::CEC => r"\d\d.\d\d.\d\d\d\d.\d\d\d\d",
        other => return Err(UpdateError::UnsupportedModule(other.to_string())),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let re = Regex::new(pattern)
        .map_err(|e| UpdateError::ImageVersionUnreadable(format!("{pattern}: {e}")))?;
    re.find(&name)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| UpdateError::ImageVersionUnreadable(name))
}
