// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared code for Hygon CSV confidential VMs: the fixed binary layouts of the
//! attestation report and the HRK/HSK/CEK/PEK certificates, the `anonce`
//! de-obfuscation of report fields, the session MAC and the guest channels used
//! to request a report from the secure processor.

use thiserror::Error;

pub mod certs;
#[cfg(feature = "attester")]
pub mod guest;
pub mod report;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("wrong length (expected {expected} bytes, found {actual})")]
    Length { expected: usize, actual: usize },
    #[error("binary parse error")]
    BinaryParseError(#[from] bincode::Error),
    #[error("chip id is not a printable serial number")]
    ChipId,
}

pub(crate) fn check_len(bytes: &[u8], expected: usize) -> Result<&[u8], FormatError> {
    if bytes.len() < expected {
        return Err(FormatError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(&bytes[..expected])
}
