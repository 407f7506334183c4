// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{AttestationReport, HASH_SIZE, MNONCE_SIZE, SN_SIZE, USER_DATA_SIZE};
use super::{VM_ID_SIZE, VM_VERSION_SIZE};
use crate::certs::CsvCert;
use crate::FormatError;
use serde::Serialize;
use serde_big_array::BigArray;
use zerocopy::AsBytes;

/// XOR every little-endian 32-bit word of `bytes` with `anonce`. A trailing
/// partial word is left untouched.
pub fn xor_words(bytes: &mut [u8], anonce: u32) {
    for word in bytes.chunks_exact_mut(4) {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) ^ anonce;
        word.copy_from_slice(&value.to_le_bytes());
    }
}

/// Report fields with the `anonce` mask removed.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PlaintextFields {
    pub user_pubkey_digest: [u8; HASH_SIZE],
    pub vm_id: [u8; VM_ID_SIZE],
    pub vm_version: [u8; VM_VERSION_SIZE],
    #[serde(with = "BigArray")]
    pub user_data: [u8; USER_DATA_SIZE],
    pub mnonce: [u8; MNONCE_SIZE],
    pub measure: [u8; HASH_SIZE],
    pub policy: u32,
    #[serde(with = "BigArray")]
    pub chip_id: [u8; SN_SIZE],
    #[serde(skip)]
    pub pek_cert: CsvCert,
}

impl PlaintextFields {
    /// Serial number of the chip that produced the report. It ends up in a
    /// URL and a file name, so only `[A-Za-z0-9_-]` is accepted.
    pub fn chip_id_str(&self) -> Result<&str, FormatError> {
        let end = self
            .chip_id
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SN_SIZE);
        let id = &self.chip_id[..end];
        let printable = id
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b'_');
        if id.is_empty() || !printable {
            return Err(FormatError::ChipId);
        }
        std::str::from_utf8(id).map_err(|_| FormatError::ChipId)
    }

    /// User data up to the first NUL, lossily decoded.
    pub fn user_data_str(&self) -> String {
        let end = self
            .user_data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(USER_DATA_SIZE);
        String::from_utf8_lossy(&self.user_data[..end]).into_owned()
    }
}

impl AttestationReport {
    /// Apply the `anonce` mask to every obfuscated field of a copy of the
    /// report. Applying it twice yields the original report.
    pub fn toggle_obfuscation(&self) -> AttestationReport {
        let mut report = *self;
        let anonce = self.anonce;
        xor_words(&mut report.user_pubkey_digest, anonce);
        xor_words(&mut report.vm_id, anonce);
        xor_words(&mut report.vm_version, anonce);
        xor_words(&mut report.user_data, anonce);
        xor_words(&mut report.mnonce, anonce);
        xor_words(&mut report.measure, anonce);
        report.policy ^= anonce;
        xor_words(report.pek_cert.as_bytes_mut(), anonce);
        xor_words(&mut report.sn, anonce);
        report
    }

    pub fn deobfuscate(&self) -> PlaintextFields {
        let plain = self.toggle_obfuscation();
        PlaintextFields {
            user_pubkey_digest: plain.user_pubkey_digest,
            vm_id: plain.vm_id,
            vm_version: plain.vm_version,
            user_data: plain.user_data,
            mnonce: plain.mnonce,
            measure: plain.measure,
            policy: plain.policy,
            chip_id: plain.sn,
            pek_cert: plain.pek_cert,
        }
    }
}
