// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Context, Result};
use csv_attest::cache::CertCache;
use csv_attest::report::{self, ReportDetails};
use csv_attest::verify::verify_report;
use log::info;
use openssl::rand::rand_bytes;
use zerocopy::AsBytes;

const NONCE_SIZE: usize = 32;

struct Evidence {
    report: Vec<u8>,
}

struct Attester;

impl Attester {
    fn gather_evidence(nonce: &[u8]) -> Result<Evidence> {
        let mut report = report::get_report(nonce).context("failed to request report")?;
        report.clear_sealing_key();
        let report = report.as_bytes().to_vec();
        Ok(Evidence { report })
    }
}

struct Verifier;

impl Verifier {
    fn verify(nonce: &[u8], evidence: &Evidence) -> Result<ReportDetails> {
        let report = report::parse(&evidence.report)?;
        let cache = CertCache::new(std::env::temp_dir().join("csv-certs"));
        let verified = verify_report(&report, &cache)
            .map_err(|e| anyhow::anyhow!("{e} (stage: {})", e.stage()))?;

        if verified.fields.user_data[..nonce.len()] != *nonce {
            bail!("nonce mismatch");
        }

        Ok(verified.details)
    }
}

#[derive(Default)]
struct RelyingParty {
    nonce: Vec<u8>,
}

impl RelyingParty {
    pub fn request_secret(&mut self) -> Result<Vec<u8>> {
        let mut nonce = vec![0u8; NONCE_SIZE];
        rand_bytes(&mut nonce)?;
        self.nonce.clone_from(&nonce);
        Ok(nonce)
    }

    pub fn release_secret(&self, evidence: &Evidence) -> Result<&'static str> {
        let details = Verifier::verify(&self.nonce, evidence)?;
        info!("releasing secret to chip {}", details.chip_id);
        Ok("secret")
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rp = RelyingParty::default();
    let nonce = rp.request_secret()?;

    let evidence = Attester::gather_evidence(&nonce)?;
    let secret = rp.release_secret(&evidence)?;

    println!("Secret: {secret}");
    Ok(())
}
