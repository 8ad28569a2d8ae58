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

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A BMC address resolved once at startup. The family never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcAddress {
    raw: String,
    ip: IpAddr,
}

impl BmcAddress {
    /// Accepts a literal IPv4/IPv6 address or a host name. Host names prefer
    /// an IPv4 result over IPv6.
    pub fn resolve(host: &str) -> Result<BmcAddress, UpdateError> {
        let host = host.trim();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(BmcAddress {
                raw: host.to_string(),
                ip,
            });
        }
        // [fe80::1] style
        if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            if let Ok(ip) = inner.parse::<Ipv6Addr>() {
                return Ok(BmcAddress {
                    raw: host.to_string(),
                    ip: IpAddr::V6(ip),
                });
            }
        }
        let resolved: Vec<SocketAddr> = (host, 0)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .unwrap_or_default();
        let ip = resolved
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| resolved.iter().find(|a| a.is_ipv6()))
            .map(|a| a.ip())
            .ok_or_else(|| UpdateError::InvalidAddress(host.to_string()))?;
        Ok(BmcAddress {
            raw: host.to_string(),
            ip,
        })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// What the operator typed, before resolution.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Host part suitable for a URL, IPv6 gets brackets.
    pub fn url_host(&self) -> String {
        format_host(self.ip)
    }

    /// The address of the local interface that routes toward the BMC.
    /// No packet is sent, the UDP connect only selects a route.
    pub fn local_ip(&self) -> Result<IpAddr, UpdateError> {
        let bind: SocketAddr = match self.family() {
            AddressFamily::V4 => (Ipv4Addr::UNSPECIFIED, 0).into(),
            AddressFamily::V6 => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket =
            UdpSocket::bind(bind).map_err(|e| UpdateError::io("Binding local UDP socket", e))?;
        socket
            .connect((self.ip, 443))
            .map_err(|e| UpdateError::io(format!("Finding route to {}", self.ip), e))?;
        let local = socket
            .local_addr()
            .map_err(|e| UpdateError::io("Reading local socket address", e))?;
        Ok(local.ip())
    }
}

pub fn format_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}
