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

//! Golden configuration image. Applying it takes a BIOS reset followed by
//! a BMC restart.

use std::path::Path;

use crate::access::Rshim;
use crate::image::{self, ImageKind};
use crate::nvidia_dpu::Bluefield;
use crate::session::ManagementSession;
use crate::transfer::{SimpleUpdateTarget, TransportNegotiator};
use crate::UpdateError;

use super::UpdateReport;

pub fn update(s: &ManagementSession, image: &Path) -> Result<UpdateReport, UpdateError> {
    image::verify(image, ImageKind::Config)?;
    Rshim::new(s).require()?;
    TransportNegotiator::new(s).simple_update(image, SimpleUpdateTarget::GoldenConfig)?;
    let dpu = Bluefield::new(s);
    // Rewrites the UPVS partition and the UEFI capsule from the new image
    dpu.send_reset_bios()?;
    dpu.reboot_bmc()?;
    Ok(UpdateReport::Config)
}
