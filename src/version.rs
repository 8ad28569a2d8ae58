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

// Firmware inventory listing and BMC version arithmetic. BMC versions look
// like BF-24.10-33; only the first three numeric fields take part in
// comparisons.

use std::cmp::Ordering;
use std::fmt;

use crate::model::{Collection, Component};
use crate::session::ManagementSession;
use crate::UpdateError;

/// Crossing this BMC version in either direction requires clearing the
/// event log.
pub const EVENT_LOG_THRESHOLD: &str = "BF-24.10-33";

const VENDOR_PREFIX: &str = "BF-";

/// (major, minor, patch). Ordered lexicographically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTuple(pub u32, pub u32, pub u32);

impl VersionTuple {
    /// What unparseable input maps to. Indistinguishable from a real 0.0.0.
    pub const SENTINEL: VersionTuple = VersionTuple(0, 0, 0);

    pub fn parse(version: &str) -> VersionTuple {
        let normalized = version.replace(VENDOR_PREFIX, "").replace('-', ".");
        let parts: Vec<&str> = normalized.split('.').collect();
        if parts.len() < 3 {
            return Self::SENTINEL;
        }
        match (parts[0].parse(), parts[1].parse(), parts[2].parse()) {
            (Ok(a), Ok(b), Ok(c)) => VersionTuple(a, b, c),
            _ => Self::SENTINEL,
        }
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

pub fn compare(a: &str, b: &str) -> Ordering {
    VersionTuple::parse(a).cmp(&VersionTuple::parse(b))
}

/// True iff exactly one of `old` and `new` is strictly below `threshold`.
pub fn threshold_crossing(old: &str, new: &str, threshold: &str) -> bool {
    let old_below = compare(old, threshold) == Ordering::Less;
    let new_below = compare(new, threshold) == Ordering::Less;
    old_below != new_below
}

/// Module name to version, in inventory order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSnapshot {
    entries: Vec<(String, String)>,
}

impl VersionSnapshot {
    pub fn new() -> VersionSnapshot {
        VersionSnapshot::default()
    }

    pub fn insert(&mut self, module: impl Into<String>, version: impl Into<String>) {
        let module = module.into();
        let version = version.into();
        match self.entries.iter_mut().find(|(m, _)| *m == module) {
            Some(entry) => entry.1 = version,
            None => self.entries.push((module, version)),
        }
    }

    pub fn get(&self, module: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(m, _)| m == module)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(m, v)| (m.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for VersionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (module, version) in self.iter() {
            writeln!(f, "{module:>17} : {version:>50}")?;
        }
        Ok(())
    }
}

/// Old/new/bundled table. `filter` limits the rows, empty means all.
pub fn comparison_table<F>(
    old: &VersionSnapshot,
    new: &VersionSnapshot,
    filter: &[Component],
    bundled: F,
) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = format!(
        "{:>10}   {:>40}  {:>40}  {:>40}\n",
        "", "OLD Version", "NEW Version", "BFB Version"
    );
    for (module, version) in old.iter() {
        if !filter.is_empty() && !filter.iter().any(|c| c.name() == module) {
            continue;
        }
        out.push_str(&format!(
            "{:>10} : {:>40}  {:>40}  {:>40}\n",
            module,
            version,
            new.get(module).unwrap_or_default(),
            bundled(module)
        ));
    }
    out
}

pub struct VersionRegistry<'a> {
    s: &'a ManagementSession,
}

impl<'a> VersionRegistry<'a> {
    pub fn new(s: &'a ManagementSession) -> VersionRegistry<'a> {
        VersionRegistry { s }
    }

    /// Every firmware inventory entry with its version. One failed read
    /// fails the whole listing.
    pub fn list_all(&self) -> Result<VersionSnapshot, UpdateError> {
        let inventory: Collection = self
            .s
            .get_resource("Get firmware URI list", "UpdateService/FirmwareInventory")?;
        let mut snapshot = VersionSnapshot::new();
        for member in &inventory.members {
            let version = self.s.get_version(&member.odata_id)?;
            snapshot.insert(Component::display_name(member.leaf()), version);
        }
        Ok(snapshot)
    }
}
