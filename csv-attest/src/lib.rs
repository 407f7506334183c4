// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//!  This library enables guest attestation flows for Hygon CSV confidential VMs. A guest requests
//!  an attestation report from the secure processor, a verifier checks it against the Hygon chain of
//!  trust (HRK → HSK → CEK → PEK) and reads the measurement and user data from it.
//!
//!  # Report Validation
//!
//!  The following code will request a report carrying a nonce, fetch the certificates for the chip
//!  that produced it from the Hygon KDS, and validate every link of the chain down to the report
//!  signature.
//!
//!  #
//!  ```no_run
//!  use csv_attest::certs::{CertProvider, Pek};
//!  use csv_attest::hygon_kds::HygonKds;
//!  use csv_attest::report::{self, Validateable};
//!  use std::error::Error;
//!
//!  fn main() -> Result<(), Box<dyn Error>> {
//!    let nonce = b"challenge";
//!    let report = report::get_report(nonce)?;
//!    let fields = report.deobfuscate();
//!
//!    let (chain, cek) = HygonKds::default().load(fields.chip_id_str()?)?;
//!    let pek = Pek::from_report(&report);
//!
//!    chain.validate()?;
//!    cek.validate(&chain)?;
//!    pek.validate(&cek)?;
//!    report.validate(&pek)?;
//!
//!    if fields.user_data[..nonce.len()] != nonce[..] {
//!      return Err("nonce mismatch".into());
//!    }
//!
//!    Ok(())
//!  }
//!  ```

#[cfg(feature = "attester")]
pub use csv_cvm::guest;
pub use csv_cvm::FormatError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP error")]
    Http(#[from] Box<ureq::Error>),
    #[error("failed to read HTTP response")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "verifier")]
pub mod cache;
#[cfg(feature = "verifier")]
pub mod certs;
#[cfg(feature = "verifier")]
pub mod hygon_kds;
pub mod report;
#[cfg(feature = "verifier")]
pub mod verify;

#[cfg(all(test, feature = "verifier"))]
mod fixtures;
