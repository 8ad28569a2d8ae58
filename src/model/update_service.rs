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

use serde::{Deserialize, Serialize};

use super::ResourceStatus;

/// https://redfish.dmtf.org/schemas/v1/UpdateService.v1_14_0.json
/// Service for Software Update
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(rename_all = "PascalCase", default)]
pub struct UpdateService {
    pub http_push_uri: Option<String>,
    pub multipart_http_push_uri: Option<String>,
    pub status: ResourceStatus,
    pub actions: serde_json::Value,
}

impl UpdateService {
    pub fn is_enabled(&self) -> bool {
        self.status.state.as_deref() == Some("Enabled")
    }

    /// Transfer protocols the BMC accepts for SimpleUpdate, as advertised.
    pub fn allowable_protocols(&self) -> Vec<String> {
        self.actions
            .get("#UpdateService.SimpleUpdate")
            .and_then(|a| a.get("TransferProtocol@Redfish.AllowableValues"))
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|p| p.as_str())
                    .map(|p| p.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Multipart push is preferred, the raw HttpPushUri is deprecated.
    pub fn push_uri(&self) -> Option<(&str, bool)> {
        if let Some(uri) = self.multipart_http_push_uri.as_deref() {
            return Some((uri, true));
        }
        self.http_push_uri.as_deref().map(|uri| (uri, false))
    }
}

/// The two pull protocols this tool can set up for SimpleUpdate.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, clap::ValueEnum, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum TransferProtocol {
    HTTP,
    SCP,
}

impl TransferProtocol {
    /// Order of preference when the operator does not force one.
    pub const PREFERENCE: [TransferProtocol; 2] = [TransferProtocol::HTTP, TransferProtocol::SCP];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferProtocol::HTTP => "HTTP",
            TransferProtocol::SCP => "SCP",
        }
    }
}

impl fmt::Display for TransferProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
