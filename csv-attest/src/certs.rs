// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub use csv_cvm::certs::{CsvCert, CurveId, EccPubKey, EccSignature, RootCert, Usage};
use csv_cvm::certs::{CSV_CERT_SIZE, ROOT_CERT_SIZE};
use csv_cvm::report::AttestationReport;
use csv_cvm::FormatError;
use log::debug;
use signature::Verifier;
use sm2::dsa::{Signature, VerifyingKey};
use sm2::PublicKey;
use std::fmt;
use thiserror::Error;

use crate::HttpError;

pub const HSK_CEK_SIZE: usize = ROOT_CERT_SIZE + CSV_CERT_SIZE;

/// Steps of report verification, in the order they run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    LoadRoots,
    ValidateUsageTags,
    VerifyRootSelfSignature,
    VerifySecondaryRootSignature,
    VerifyEndorsementCertSignature,
    VerifyPlatformCertSignature,
    VerifyReportSignature,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LoadRoots => "load HRK/HSK/CEK",
            Stage::ValidateUsageTags => "validate key usage tags",
            Stage::VerifyRootSelfSignature => "verify HRK self signature",
            Stage::VerifySecondaryRootSignature => "verify HSK signature",
            Stage::VerifyEndorsementCertSignature => "verify CEK signature",
            Stage::VerifyPlatformCertSignature => "verify PEK signature",
            Stage::VerifyReportSignature => "verify report signature",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("{cert} {field} is {found:#x}, expected {expected}")]
    UsageTagMismatch {
        cert: &'static str,
        field: &'static str,
        expected: Usage,
        found: u32,
    },
    #[error("HRK is not self-signed")]
    HrkNotSelfSigned,
    #[error("HSK is not signed by HRK")]
    HskNotSignedByHrk,
    #[error("CEK is not signed by HSK")]
    CekNotSignedByHsk,
    #[error("PEK is not signed by CEK")]
    PekNotSignedByCek,
}

impl ValidateError {
    pub fn stage(&self) -> Stage {
        match self {
            ValidateError::UsageTagMismatch { .. } => Stage::ValidateUsageTags,
            ValidateError::HrkNotSelfSigned => Stage::VerifyRootSelfSignature,
            ValidateError::HskNotSignedByHrk => Stage::VerifySecondaryRootSignature,
            ValidateError::CekNotSignedByHsk => Stage::VerifyEndorsementCertSignature,
            ValidateError::PekNotSignedByCek => Stage::VerifyPlatformCertSignature,
        }
    }
}

fn check_usage(
    cert: &'static str,
    field: &'static str,
    expected: Usage,
    found: u32,
) -> Result<(), ValidateError> {
    if !expected.matches(found) {
        return Err(ValidateError::UsageTagMismatch {
            cert,
            field,
            expected,
            found,
        });
    }
    Ok(())
}

/// Check an SM2 signature made by `signer` over `message`. The signer's user
/// id is the distinguishing identifier mixed into the digest.
pub(crate) fn verify_sm2(signer: &EccPubKey, message: &[u8], sig: &EccSignature) -> bool {
    if signer.curve() != Some(CurveId::Sm2_256) {
        debug!("signer key has curve id {:#x}", signer.curve_id);
    }
    let result = std::str::from_utf8(signer.user_id())
        .map_err(|_| signature::Error::new())
        .and_then(|distid| {
            let public_key = PublicKey::from_sec1_bytes(&signer.sec1_point())
                .map_err(|_| signature::Error::new())?;
            let key = VerifyingKey::new(distid, public_key)?;
            let sig = Signature::from_slice(&sig.to_primitive())?;
            key.verify(message, &sig)
        });
    if let Err(e) = &result {
        debug!("SM2 verification failed: {e}");
    }
    result.is_ok()
}

/// Hygon root keys: the HRK and the HSK it signs.
#[derive(Clone, Debug)]
pub struct HygonChain {
    pub hrk: RootCert,
    pub hsk: RootCert,
}

impl HygonChain {
    pub fn check_usage(&self) -> Result<(), ValidateError> {
        check_usage("HRK", "key usage", Usage::Hrk, self.hrk.key_usage)?;
        check_usage("HSK", "key usage", Usage::Hsk, self.hsk.key_usage)
    }

    pub fn validate_signatures(&self) -> Result<(), ValidateError> {
        let hrk_pubkey = &self.hrk.pubkey;

        if !verify_sm2(hrk_pubkey, self.hrk.signed_bytes(), &self.hrk.signature) {
            return Err(ValidateError::HrkNotSelfSigned);
        }
        debug!("HRK is self-signed");

        if !verify_sm2(hrk_pubkey, self.hsk.signed_bytes(), &self.hsk.signature) {
            return Err(ValidateError::HskNotSignedByHrk);
        }
        debug!("HSK is signed by HRK");

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidateError> {
        self.check_usage()?;
        self.validate_signatures()
    }
}

/// Chip endorsement key certificate.
#[derive(Clone, Debug)]
pub struct Cek(pub CsvCert);

impl Cek {
    pub fn check_usage(&self) -> Result<(), ValidateError> {
        let cert = &self.0;
        check_usage("CEK", "pubkey usage", Usage::Cek, cert.pubkey_usage)?;
        check_usage("CEK", "sig1 usage", Usage::Hsk, cert.sig1_usage)?;
        check_usage("CEK", "sig2 usage", Usage::Invalid, cert.sig2_usage)
    }

    pub fn validate_signature(&self, chain: &HygonChain) -> Result<(), ValidateError> {
        let cert = &self.0;
        if !verify_sm2(
            &chain.hsk.pubkey,
            cert.signed_bytes(),
            cert.chain_signature(),
        ) {
            return Err(ValidateError::CekNotSignedByHsk);
        }
        debug!("CEK is signed by HSK");
        Ok(())
    }

    pub fn validate(&self, chain: &HygonChain) -> Result<(), ValidateError> {
        self.check_usage()?;
        self.validate_signature(chain)
    }
}

/// Platform endorsement key certificate, in plaintext.
#[derive(Clone, Debug)]
pub struct Pek(pub CsvCert);

impl Pek {
    /// The PEK embedded in a report, with the `anonce` mask removed.
    pub fn from_report(report: &AttestationReport) -> Self {
        Self(report.deobfuscate().pek_cert)
    }

    pub fn validate(&self, cek: &Cek) -> Result<(), ValidateError> {
        let cert = &self.0;
        if !verify_sm2(&cek.0.pubkey, cert.signed_bytes(), &cert.sig1) {
            return Err(ValidateError::PekNotSignedByCek);
        }
        debug!("PEK is signed by CEK");
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CertError {
    #[error("failed to fetch certificate")]
    Http(#[from] HttpError),
    #[error("certificate cache IO error")]
    Io(#[from] std::io::Error),
    #[error("malformed certificate")]
    Format(#[from] FormatError),
}

fn check_exact_len(bytes: &[u8], expected: usize) -> Result<(), CertError> {
    if bytes.len() != expected {
        return Err(FormatError::Length {
            expected,
            actual: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Parse an HRK certificate file, exactly one [`RootCert`].
pub fn parse_hrk(bytes: &[u8]) -> Result<RootCert, CertError> {
    check_exact_len(bytes, ROOT_CERT_SIZE)?;
    Ok(RootCert::from_bytes(bytes)?)
}

/// Parse an HSK/CEK file, an HSK [`RootCert`] directly followed by the CEK.
pub fn parse_hsk_cek(bytes: &[u8]) -> Result<(RootCert, Cek), CertError> {
    check_exact_len(bytes, HSK_CEK_SIZE)?;
    let hsk = RootCert::from_bytes(bytes)?;
    let cek = CsvCert::from_bytes(&bytes[ROOT_CERT_SIZE..])?;
    Ok((hsk, Cek(cek)))
}

/// Source of the certificates a report is verified against.
pub trait CertProvider {
    fn get_hrk(&self) -> Result<RootCert, CertError>;

    fn get_hsk_cek(&self, chip_id: &str) -> Result<(RootCert, Cek), CertError>;

    fn load(&self, chip_id: &str) -> Result<(HygonChain, Cek), CertError> {
        let hrk = self.get_hrk()?;
        let (hsk, cek) = self.get_hsk_cek(chip_id)?;
        Ok((HygonChain { hrk, hsk }, cek))
    }
}
