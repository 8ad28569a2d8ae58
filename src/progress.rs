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

use std::cell::Cell;
use std::io::Write;
use std::time::Duration;

use crate::clock::Clock;

/// Single-line progress bar on stdout: `Process|:  42%: ░░░░`.
/// The spinner character flips on every sample so a stalled value is still
/// visibly alive.
#[derive(Debug, Default)]
pub struct Progress {
    flag: Cell<bool>,
}

impl Progress {
    pub fn new() -> Progress {
        Progress {
            flag: Cell::new(true),
        }
    }

    pub fn show(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0) as usize;
        let flag = if self.flag.get() { '|' } else { '-' };
        self.flag.set(!self.flag.get());
        print!("\rProcess{flag}: {percent:>3}%: {}", "░".repeat(percent / 2));
        let _ = std::io::stdout().flush();
    }

    /// Ends the progress line.
    pub fn finish(&self) {
        println!();
    }

    /// Sleeps `secs` seconds in one-second steps while moving the bar from
    /// `start` to `end` percent.
    pub fn sleep_graded(&self, clock: &dyn Clock, secs: u64, start: u64, end: u64) {
        for i in 1..=secs {
            clock.sleep(Duration::from_secs(1));
            self.show((start + i * end.saturating_sub(start) / secs) as f64);
        }
    }
}

/// Fraction of `budget` used by `elapsed`, as a percentage.
pub fn percent_of(elapsed: Duration, budget: Duration) -> f64 {
    if budget.is_zero() {
        return 100.0;
    }
    100.0 * elapsed.as_secs_f64() / budget.as_secs_f64()
}
