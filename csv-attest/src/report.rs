// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[cfg(feature = "verifier")]
use super::certs::{verify_sm2, Pek};
use base64::prelude::*;
#[cfg(feature = "attester")]
use csv_cvm::guest::{self, AcquireError, Channel};
pub use csv_cvm::report::{AttestationReport, PlaintextFields};
use csv_cvm::FormatError;
use serde::Serialize;
use thiserror::Error;
use zerocopy::AsBytes;

#[derive(Error, Debug)]
pub enum ValidateError {
    #[error("report is not signed by PEK")]
    ReportNotSignedByPek,
}

#[cfg(feature = "verifier")]
pub trait Validateable {
    fn validate(&self, pek: &Pek) -> Result<(), ValidateError>;
}

#[cfg(feature = "verifier")]
impl Validateable for AttestationReport {
    fn validate(&self, pek: &Pek) -> Result<(), ValidateError> {
        if !verify_sm2(&pek.0.pubkey, self.signed_bytes(), &self.sig) {
            return Err(ValidateError::ReportNotSignedByPek);
        }
        Ok(())
    }
}

pub fn parse(bytes: &[u8]) -> Result<AttestationReport, FormatError> {
    AttestationReport::from_bytes(bytes)
}

/// Request a report through whichever channel the guest provides.
#[cfg(feature = "attester")]
pub fn get_report(custom_data: &[u8]) -> Result<AttestationReport, AcquireError> {
    let channel = Channel::detect()?;
    guest::get_report(&channel, custom_data)
}

/// Printable summary of a report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReportDetails {
    pub user_data: String,
    pub monce: String,
    pub measure: String,
    pub vm_id: String,
    pub vm_version: String,
    pub chip_id: String,
    /// Wire bytes, base64.
    pub full_report: String,
}

fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl From<&AttestationReport> for ReportDetails {
    fn from(report: &AttestationReport) -> Self {
        let fields = report.deobfuscate();
        Self {
            user_data: trim_nul(&fields.user_data),
            monce: hex::encode(fields.mnonce),
            measure: hex::encode(fields.measure),
            vm_id: hex::encode(fields.vm_id),
            vm_version: hex::encode(fields.vm_version),
            chip_id: trim_nul(&fields.chip_id),
            full_report: BASE64_STANDARD.encode(report.as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "verifier")]
    #[test]
    fn test_report_signature() {
        use crate::fixtures::{Fixture, OTHER_KEY, PEK_KEY};

        let fixture = Fixture::new(b"hello");
        let pek = Pek::from_report(&fixture.report);
        fixture.report.validate(&pek).unwrap();

        let mut report = fixture.report;
        report.measure[0] ^= 1;
        assert!(matches!(
            report.validate(&pek),
            Err(ValidateError::ReportNotSignedByPek)
        ));

        let mut report = fixture.report;
        report.anonce ^= 1;
        report.mac = [0; 32];
        report.validate(&Pek(fixture.pek)).unwrap();

        let foreign = Fixture::build(b"hello", &OTHER_KEY, &PEK_KEY);
        assert!(foreign
            .report
            .validate(&Pek::from_report(&foreign.report))
            .is_err());
    }

    #[cfg(feature = "verifier")]
    #[test]
    fn details() {
        use crate::fixtures::{Fixture, CHIP_ID, MEASURE};

        let fixture = Fixture::new(b"hello");
        let details = ReportDetails::from(&fixture.report);
        assert_eq!(details.user_data, "hello");
        assert_eq!(details.chip_id, CHIP_ID);
        assert_eq!(details.measure, hex::encode(MEASURE));
        assert_eq!(details.monce, "4e".repeat(16));

        let bytes = BASE64_STANDARD.decode(&details.full_report).unwrap();
        assert_eq!(parse(&bytes).unwrap(), fixture.report);

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["vmId"], "1d".repeat(16));
        assert!(json.get("fullReport").is_some());
    }

    #[test]
    fn trim() {
        assert_eq!(trim_nul(b"abc\0\0"), "abc");
        assert_eq!(trim_nul(b"\0\0"), "");
        assert_eq!(trim_nul(b"a\0b\0"), "a\0b");
    }
}
