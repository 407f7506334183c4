// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::certs::{CsvCert, EccSignature};
use crate::{check_len, FormatError};
use memoffset::offset_of;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use static_assertions::const_assert_eq;
use std::mem::size_of;
use std::ops::Range;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

mod anonce;
mod mac;

pub use anonce::{xor_words, PlaintextFields};
pub use mac::{session_mac, MacError};

pub const USER_DATA_SIZE: usize = 64;
pub const MNONCE_SIZE: usize = 16;
pub const HASH_SIZE: usize = 32;
pub const VM_ID_SIZE: usize = 16;
pub const VM_VERSION_SIZE: usize = 16;
pub const SN_SIZE: usize = 64;
pub const SEALING_KEY_SIZE: usize = 32;

pub const REPORT_SIZE: usize = size_of::<AttestationReport>();
pub const REPORT_SIGNED_SIZE: usize = offset_of!(AttestationReport, sig_usage);
const MAC_START: usize = offset_of!(AttestationReport, pek_cert);
const MAC_END: usize = offset_of!(AttestationReport, mac);
pub const MAC_RANGE: Range<usize> = MAC_START..MAC_END;

const_assert_eq!(REPORT_SIZE, 2548);
const_assert_eq!(REPORT_SIGNED_SIZE, 180);
const_assert_eq!(offset_of!(AttestationReport, sig), 192);
const_assert_eq!(MAC_START, 336);
const_assert_eq!(MAC_END - MAC_START, 2180);

/// Attestation report as returned by the secure processor. Most fields are
/// obfuscated with `anonce`, see [`AttestationReport::deobfuscate`].
#[repr(C)]
#[derive(
    AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq,
)]
pub struct AttestationReport {
    pub user_pubkey_digest: [u8; HASH_SIZE],
    pub vm_id: [u8; VM_ID_SIZE],
    pub vm_version: [u8; VM_VERSION_SIZE],
    #[serde(with = "BigArray")]
    pub user_data: [u8; USER_DATA_SIZE],
    pub mnonce: [u8; MNONCE_SIZE],
    pub measure: [u8; HASH_SIZE],
    pub policy: u32,
    pub sig_usage: u32,
    pub sig_algo: u32,
    pub anonce: u32,
    pub sig: EccSignature,
    pub pek_cert: CsvCert,
    #[serde(with = "BigArray")]
    pub sn: [u8; SN_SIZE],
    pub reserved: [u8; SEALING_KEY_SIZE],
    pub mac: [u8; HASH_SIZE],
}

impl AttestationReport {
    /// Decode a report from the first [`REPORT_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let bytes = check_len(bytes, REPORT_SIZE)?;
        let report = bincode::deserialize(bytes)?;
        Ok(report)
    }

    /// The bytes covered by the report signature.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.as_bytes()[..REPORT_SIGNED_SIZE]
    }

    /// The bytes covered by the session MAC.
    pub fn mac_bytes(&self) -> &[u8] {
        &self.as_bytes()[MAC_RANGE]
    }

    pub fn sealing_key(&self) -> [u8; SEALING_KEY_SIZE] {
        self.reserved
    }

    /// Zero the sealing key, e.g. before a report leaves the guest.
    pub fn clear_sealing_key(&mut self) {
        self.reserved = [0; SEALING_KEY_SIZE];
    }
}
