// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{AttestationReport, HASH_SIZE};
use log::debug;
use openssl::hash::MessageDigest;
use openssl::memcmp;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MacError {
    #[error("OpenSSL error")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("unexpected HMAC length {0}")]
    Length(usize),
    #[error("session MAC mismatch")]
    Mismatch,
}

/// HMAC-SM3 of `data` keyed with the session nonce.
pub fn session_mac(mnonce: &[u8], data: &[u8]) -> Result<[u8; HASH_SIZE], MacError> {
    let key = PKey::hmac(mnonce)?;
    let mut signer = Signer::new(MessageDigest::sm3(), &key)?;
    signer.update(data)?;
    let digest = signer.sign_to_vec()?;
    digest
        .as_slice()
        .try_into()
        .map_err(|_| MacError::Length(digest.len()))
}

impl AttestationReport {
    /// MAC over the wire bytes from the PEK certificate to the end of the
    /// sealing key, keyed with the plaintext mnonce.
    pub fn compute_mac(&self) -> Result<[u8; HASH_SIZE], MacError> {
        let mnonce = self.deobfuscate().mnonce;
        session_mac(&mnonce, self.mac_bytes())
    }

    pub fn verify_mac(&self) -> Result<(), MacError> {
        let expected = self.compute_mac()?;
        if !memcmp::eq(&expected, &self.mac) {
            debug!("session MAC mismatch, expected {expected:02x?}");
            return Err(MacError::Mismatch);
        }
        Ok(())
    }
}
