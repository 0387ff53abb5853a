// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device not registered or not present
    DeviceNotFound(String),
    /// No device can take the request
    Unavailable(String),
    /// Lock or device wait timed out
    Timeout(String),
    /// General error from the hwpool library
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::Unavailable(msg) => write!(f, "Device unavailable: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::DeviceNotFound(_) => 3,
            CliError::Unavailable(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map hwpool::Error to CliError with appropriate exit codes
impl From<hwpool::Error> for CliError {
    fn from(err: hwpool::Error) -> Self {
        use hwpool::Error;

        let msg = err.to_string();
        match err {
            Error::NotFound { .. } | Error::UnknownHandle(_) => CliError::DeviceNotFound(msg),

            Error::LockTimeout(_) => CliError::Timeout(msg),

            Error::Full { .. }
            | Error::NotAvailable(_)
            | Error::Transport { .. }
            | Error::DuplicateDevice { .. }
            | Error::IncompatibleFirmware { .. } => CliError::Unavailable(msg),

            Error::InvalidArgument(_) | Error::InvalidHandle(_) | Error::Overflow { .. } => {
                CliError::InvalidArgs(msg)
            }

            Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::TimedOut => CliError::Timeout(msg),
                _ => CliError::General(msg),
            },

            Error::Cancelled | Error::Json(_) => CliError::General(msg),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
