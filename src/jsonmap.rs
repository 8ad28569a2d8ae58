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

// jsonmap.rs
// Helpers for pulling typed fields out of BMC JSON bodies. A missing key or
// a value of the wrong type becomes BadResponseFormat naming the key path
// and the URL it came from.

use serde_json::Value;

use crate::network::Response;
use crate::UpdateError;

fn missing_key_error(path: &[&str], url: &str) -> UpdateError {
    UpdateError::BadResponseFormat(format!("Missing key {} in JSON at {url}", path.join(".")))
}

fn invalid_type_error(path: &[&str], expected_type: &str, url: &str) -> UpdateError {
    UpdateError::BadResponseFormat(format!(
        "Key {} should be {expected_type} at {url}",
        path.join(".")
    ))
}

// body parses the response body as JSON, BadResponseFormat if it isn't.
pub fn body(response: &Response) -> Result<Value, UpdateError> {
    response.json().ok_or_else(|| {
        UpdateError::BadResponseFormat(format!(
            "Response from {} is not JSON",
            response.request.url
        ))
    })
}

// get_path walks nested objects by key. A numeric path element indexes
// into an array.
pub fn get_path<'a>(value: &'a Value, path: &[&str], url: &str) -> Result<&'a Value, UpdateError> {
    let mut cur = value;
    for key in path {
        let next = match cur {
            Value::Object(map) => map.get(*key),
            Value::Array(list) => key.parse::<usize>().ok().and_then(|i| list.get(i)),
            _ => None,
        };
        cur = next.ok_or_else(|| missing_key_error(path, url))?;
    }
    Ok(cur)
}

pub fn get_str<'a>(value: &'a Value, path: &[&str], url: &str) -> Result<&'a str, UpdateError> {
    get_path(value, path, url)?
        .as_str()
        .ok_or_else(|| invalid_type_error(path, "string", url))
}

pub fn get_bool(value: &Value, path: &[&str], url: &str) -> Result<bool, UpdateError> {
    get_path(value, path, url)?
        .as_bool()
        .ok_or_else(|| invalid_type_error(path, "boolean", url))
}

// extract deserializes the whole body into T.
pub fn extract<T>(response: &Response) -> Result<T, UpdateError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(&response.body).map_err(|e| {
        UpdateError::BadResponseFormat(format!(
            "Could not deserialize response from {}: {e}",
            response.request.url
        ))
    })
}
