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

//! OEM FRU fields written in one PUT.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::session::ManagementSession;
use crate::UpdateError;

use super::UpdateReport;

const SYSTEM_OEM: &str = "Systems/Bluefield/Oem/Nvidia";
const MAX_VALUE_LEN: usize = 63;
const MANUFACTURE_DATE: &str = "Product:ManufactureDate";
const DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Validated `Section:Key=Value` items, keyed `SectionKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FruData {
    fields: Vec<(String, String)>,
}

impl FruData {
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<FruData, UpdateError> {
        let mut fields: Vec<(String, String)> = Vec::new();
        for item in items {
            let item = item.as_ref();
            let invalid = || {
                UpdateError::InvalidInput(format!(
                    "Invalid format for OEM FRU data: {item}. Expected format 'Section:Key=Value'"
                ))
            };
            let (section_key, value) = item.split_once('=').ok_or_else(invalid)?;
            let mut parts = section_key.split(':');
            let (Some(section), Some(key), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(invalid());
            };
            if value.len() > MAX_VALUE_LEN {
                return Err(UpdateError::InvalidInput(format!(
                    "Value for {section_key} exceeds {MAX_VALUE_LEN} characters: {value}"
                )));
            }
            if section_key == MANUFACTURE_DATE
                && !value.is_empty()
                && NaiveDateTime::parse_from_str(value, DATE_FORMAT).is_err()
            {
                return Err(UpdateError::InvalidInput(
                    "Invalid date format for ManufactureDate. Expected format: DD/MM/YYYY HH:MM:SS"
                        .to_string(),
                ));
            }
            let combined = format!("{section}{key}");
            match fields.iter_mut().find(|(k, _)| *k == combined) {
                Some(field) => field.1 = value.to_string(),
                None => fields.push((combined, value.to_string())),
            }
        }
        Ok(FruData { fields })
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

pub fn update(s: &ManagementSession, data: &FruData) -> Result<UpdateReport, UpdateError> {
    let body = data.to_json();
    if s.ctx().is_debug() {
        println!("OEM FRU data to be updated: {body:#}");
    }
    let response = s.put("Update OEM FRU data", SYSTEM_OEM, &body)?;
    if response.status != 200 {
        return Err(UpdateError::InvalidStatusCode {
            status: response.status,
            message: format!(
                "Failed to update OEM FRU data, status code: {}",
                response.status
            ),
        });
    }
    println!("OEM FRU data updated successfully.");
    Ok(UpdateReport::Fru(data.clone()))
}
