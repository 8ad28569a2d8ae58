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

/// Every failure the updater can report. Each variant maps to a stable
/// [`ErrorKind`] whose numeric code doubles as the process exit status.
#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("{0} is neither a valid IPv4/IPv6 address nor a resolvable host name")]
    InvalidAddress(String),

    #[error("File not accessible: {0}")]
    FileNotAccessible(String),

    #[error("Invalid status code: {status}; {message}")]
    InvalidStatusCode { status: u16, message: String },

    #[error("Account locked: {0}")]
    AccountLocked(String),

    #[error("Invalid username or password: {0}")]
    InvalidCredentials(String),

    #[error("Bad response format: {0}")]
    BadResponseFormat(String),

    #[error("Update service is not ready")]
    UpdateServiceNotReady,

    #[error("Unsupported transfer protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("BMC has not received this host's public key (PublicKeyExchange)")]
    SshKeyNotExchanged,

    #[error("BMC could not reach the local file server at {0}")]
    FileServerUnreachable(String),

    #[error("BMC background copy is in progress: {0}")]
    BackgroundBusy(String),

    #[error("Another update is in progress: {0}")]
    AnotherUpdateInProgress(String),

    #[error("Task {0} timed out")]
    JobTimeout(String),

    #[error("Task failed: {0}")]
    JobFailed(String),

    #[error("Firmware file does not match the module: {0}")]
    ImageMismatch(String),

    #[error("Got an empty firmware version: {0}")]
    EmptyVersion(String),

    #[error("New version check failed: {0}")]
    VerificationFailed(String),

    #[error("Failed to enable rshim on BMC: {0}")]
    AccessModeFailed(String),

    #[error("Unsupported module: {0}")]
    UnsupportedModule(String),

    #[error("No local SSH key available: {0}")]
    LocalSshKeyUnavailable(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid input parameter: {0}")]
    InvalidInput(String),

    #[error("BMC update service advertises no push URI")]
    PushUriNotFound,

    #[error("Failed to start local file server: {0}")]
    FileServerStart(String),

    #[error("CEC restart is not supported: {0}")]
    CompanionRestartUnsupported(String),

    #[error("No pending CEC firmware: {0}")]
    NoPendingCompanionFirmware(String),

    #[error("Failed to read version from firmware file: {0}")]
    ImageVersionUnreadable(String),

    #[error("BMC at {0} is not reachable. Please verify the IP address and network connectivity")]
    ControllerUnreachable(String),

    #[error("Command \"{command}\" failed with return code {status}: {output}")]
    RemoteCommand {
        command: String,
        status: i32,
        output: String,
    },

    #[error("Network error talking to BMC at {url}. {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

/// The closed set of failure categories with their exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAddress,
    FileNotAccessible,
    InvalidStatusCode,
    AccountLocked,
    InvalidCredentials,
    BadResponseFormat,
    UpdateServiceNotReady,
    UnsupportedProtocol,
    SshKeyNotExchanged,
    FileServerUnreachable,
    BackgroundBusy,
    AnotherUpdateInProgress,
    JobTimeout,
    JobFailed,
    ImageMismatch,
    EmptyVersion,
    VerificationFailed,
    AccessModeFailed,
    UnsupportedModule,
    LocalSshKeyUnavailable,
    MissingArgument,
    InvalidInput,
    PushUriNotFound,
    FileServerStart,
    CompanionRestartUnsupported,
    NoPendingCompanionFirmware,
    ImageVersionUnreadable,
    ControllerUnreachable,
    RemoteCommand,
    Uncategorized,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidAddress => 1,
            ErrorKind::FileNotAccessible => 2,
            ErrorKind::InvalidStatusCode => 3,
            ErrorKind::AccountLocked => 4,
            ErrorKind::InvalidCredentials => 5,
            ErrorKind::BadResponseFormat => 6,
            ErrorKind::UpdateServiceNotReady => 7,
            ErrorKind::UnsupportedProtocol => 8,
            ErrorKind::SshKeyNotExchanged => 9,
            ErrorKind::FileServerUnreachable => 10,
            ErrorKind::BackgroundBusy => 11,
            ErrorKind::AnotherUpdateInProgress => 12,
            ErrorKind::JobTimeout => 13,
            ErrorKind::JobFailed => 14,
            ErrorKind::ImageMismatch => 15,
            ErrorKind::EmptyVersion => 16,
            ErrorKind::VerificationFailed => 17,
            ErrorKind::AccessModeFailed => 18,
            ErrorKind::UnsupportedModule => 19,
            ErrorKind::LocalSshKeyUnavailable => 20,
            ErrorKind::MissingArgument => 21,
            ErrorKind::InvalidInput => 22,
            ErrorKind::PushUriNotFound => 23,
            ErrorKind::FileServerStart => 24,
            ErrorKind::CompanionRestartUnsupported => 25,
            ErrorKind::NoPendingCompanionFirmware => 26,
            ErrorKind::ImageVersionUnreadable => 27,
            ErrorKind::ControllerUnreachable => 28,
            ErrorKind::RemoteCommand => 29,
            ErrorKind::Uncategorized => 99,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A flattened view of an error, suitable for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub code: i32,
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        use UpdateError::*;
        match self {
            InvalidAddress(_) => ErrorKind::InvalidAddress,
            FileNotAccessible(_) => ErrorKind::FileNotAccessible,
            InvalidStatusCode { .. } => ErrorKind::InvalidStatusCode,
            AccountLocked(_) => ErrorKind::AccountLocked,
            InvalidCredentials(_) => ErrorKind::InvalidCredentials,
            BadResponseFormat(_) => ErrorKind::BadResponseFormat,
            UpdateServiceNotReady => ErrorKind::UpdateServiceNotReady,
            UnsupportedProtocol(_) => ErrorKind::UnsupportedProtocol,
            SshKeyNotExchanged => ErrorKind::SshKeyNotExchanged,
            FileServerUnreachable(_) => ErrorKind::FileServerUnreachable,
            BackgroundBusy(_) => ErrorKind::BackgroundBusy,
            AnotherUpdateInProgress(_) => ErrorKind::AnotherUpdateInProgress,
            JobTimeout(_) => ErrorKind::JobTimeout,
            JobFailed(_) => ErrorKind::JobFailed,
            ImageMismatch(_) => ErrorKind::ImageMismatch,
            EmptyVersion(_) => ErrorKind::EmptyVersion,
            VerificationFailed(_) => ErrorKind::VerificationFailed,
            AccessModeFailed(_) => ErrorKind::AccessModeFailed,
            UnsupportedModule(_) => ErrorKind::UnsupportedModule,
            LocalSshKeyUnavailable(_) => ErrorKind::LocalSshKeyUnavailable,
            MissingArgument(_) => ErrorKind::MissingArgument,
            InvalidInput(_) => ErrorKind::InvalidInput,
            PushUriNotFound => ErrorKind::PushUriNotFound,
            FileServerStart(_) => ErrorKind::FileServerStart,
            CompanionRestartUnsupported(_) => ErrorKind::CompanionRestartUnsupported,
            NoPendingCompanionFirmware(_) => ErrorKind::NoPendingCompanionFirmware,
            ImageVersionUnreadable(_) => ErrorKind::ImageVersionUnreadable,
            ControllerUnreachable(_) => ErrorKind::ControllerUnreachable,
            RemoteCommand { .. } => ErrorKind::RemoteCommand,
            Network { .. } | Io { .. } => ErrorKind::Uncategorized,
        }
    }

    /// Process exit status for this error.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    pub fn record(&self) -> ErrorRecord {
        let kind = self.kind();
        ErrorRecord {
            kind,
            message: self.to_string(),
            code: kind.code(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        UpdateError::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_codes_are_unique_and_nonzero() {
        let kinds = [
            ErrorKind::InvalidAddress,
            ErrorKind::FileNotAccessible,
            ErrorKind::InvalidStatusCode,
            ErrorKind::AccountLocked,
            ErrorKind::InvalidCredentials,
            ErrorKind::BadResponseFormat,
            ErrorKind::UpdateServiceNotReady,
            ErrorKind::UnsupportedProtocol,
            ErrorKind::SshKeyNotExchanged,
            ErrorKind::FileServerUnreachable,
            ErrorKind::BackgroundBusy,
            ErrorKind::AnotherUpdateInProgress,
            ErrorKind::JobTimeout,
            ErrorKind::JobFailed,
            ErrorKind::ImageMismatch,
            ErrorKind::EmptyVersion,
            ErrorKind::VerificationFailed,
            ErrorKind::AccessModeFailed,
            ErrorKind::UnsupportedModule,
            ErrorKind::LocalSshKeyUnavailable,
            ErrorKind::MissingArgument,
            ErrorKind::InvalidInput,
            ErrorKind::PushUriNotFound,
            ErrorKind::FileServerStart,
            ErrorKind::CompanionRestartUnsupported,
            ErrorKind::NoPendingCompanionFirmware,
            ErrorKind::ImageVersionUnreadable,
            ErrorKind::ControllerUnreachable,
            ErrorKind::RemoteCommand,
            ErrorKind::Uncategorized,
        ];
        let codes: HashSet<i32> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_record() {
        let e = UpdateError::InvalidStatusCode {
            status: 500,
            message: "boom".to_string(),
        };
        let r = e.record();
        assert_eq!(r.kind, ErrorKind::InvalidStatusCode);
        assert_eq!(r.code, 3);
        assert_eq!(r.message, "Invalid status code: 500; boom");
    }
}
