// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::certs::{self, CertError, CertProvider, Pek, Stage};
use crate::report::{self, AttestationReport, PlaintextFields, ReportDetails, Validateable};
use csv_cvm::FormatError;
use log::{error, info};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("report does not carry a valid chip id")]
    ChipId(#[source] FormatError),
    #[error("failed to load certificates")]
    Load(#[from] CertError),
    #[error("certificate chain is not valid")]
    Chain(#[from] certs::ValidateError),
    #[error("report signature is not valid")]
    Report(#[from] report::ValidateError),
}

impl VerifyError {
    /// The stage at which verification stopped.
    pub fn stage(&self) -> Stage {
        match self {
            VerifyError::ChipId(_) | VerifyError::Load(_) => Stage::LoadRoots,
            VerifyError::Chain(e) => e.stage(),
            VerifyError::Report(_) => Stage::VerifyReportSignature,
        }
    }
}

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub struct VerifiedReport {
    pub fields: PlaintextFields,
    pub details: ReportDetails,
}

/// Verify `report` against the chain of trust of the chip that produced it.
///
/// Stages run in order and the first failure ends verification:
/// certificates are loaded, all key usage tags are checked, and then the
/// HRK, HSK, CEK, PEK and report signatures are verified one link at a time.
pub fn verify_report<P: CertProvider + ?Sized>(
    report: &AttestationReport,
    provider: &P,
) -> Result<VerifiedReport, VerifyError> {
    let result = run(report, provider);
    match &result {
        Ok(_) => info!("attestation report verified"),
        Err(e) => error!("{} failed: {e}", e.stage()),
    }
    result
}

fn run<P: CertProvider + ?Sized>(
    report: &AttestationReport,
    provider: &P,
) -> Result<VerifiedReport, VerifyError> {
    let fields = report.deobfuscate();
    let chip_id = fields.chip_id_str().map_err(VerifyError::ChipId)?;
    let (chain, cek) = provider.load(chip_id)?;
    info!("{}: ok", Stage::LoadRoots);

    chain.check_usage()?;
    cek.check_usage()?;
    info!("{}: ok", Stage::ValidateUsageTags);

    chain.validate_signatures()?;
    cek.validate_signature(&chain)?;

    let pek = Pek(fields.pek_cert);
    pek.validate(&cek)?;

    report.validate(&pek)?;
    info!("{}: ok", Stage::VerifyReportSignature);

    Ok(VerifiedReport {
        details: ReportDetails::from(report),
        fields,
    })
}
