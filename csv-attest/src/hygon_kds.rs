// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::certs::{parse_hrk, parse_hsk_cek, Cek, CertError, CertProvider, HSK_CEK_SIZE};
use crate::HttpError;
use csv_cvm::certs::{RootCert, ROOT_CERT_SIZE};
use log::debug;
use std::io::Read;

pub const KDS_CERT_SITE: &str = "https://cert.hygon.cn";
const KDS_HRK: &str = "/hrk";
const KDS_HSK_CEK: &str = "/hsk_cek";

/// Read at most one byte more than `expected`, enough for the exact-size
/// parsers to reject an oversized body.
fn read_body(body: impl Read, expected: usize) -> Result<Vec<u8>, HttpError> {
    let mut buffer = Vec::with_capacity(expected);
    body.take(expected as u64 + 1).read_to_end(&mut buffer)?;
    Ok(buffer)
}

fn get(url: &str, expected: usize) -> Result<Vec<u8>, HttpError> {
    let body = ureq::get(url).call().map_err(Box::new)?.into_reader();
    read_body(body, expected)
}

/// Hygon key distribution service.
#[derive(Clone, Debug)]
pub struct HygonKds {
    base_url: String,
}

impl Default for HygonKds {
    fn default() -> Self {
        Self::new(KDS_CERT_SITE)
    }
}

impl HygonKds {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    fn hrk_url(&self) -> String {
        format!("{}{KDS_HRK}", self.base_url)
    }

    fn hsk_cek_url(&self, chip_id: &str) -> String {
        format!("{}{KDS_HSK_CEK}?snumber={chip_id}", self.base_url)
    }

    /// Raw HRK certificate.
    pub fn fetch_hrk(&self) -> Result<Vec<u8>, CertError> {
        let url = self.hrk_url();
        debug!("fetching {url}");
        Ok(get(&url, ROOT_CERT_SIZE)?)
    }

    /// Raw HSK certificate followed by the CEK of `chip_id`.
    pub fn fetch_hsk_cek(&self, chip_id: &str) -> Result<Vec<u8>, CertError> {
        let url = self.hsk_cek_url(chip_id);
        debug!("fetching {url}");
        Ok(get(&url, HSK_CEK_SIZE)?)
    }
}

impl CertProvider for HygonKds {
    fn get_hrk(&self) -> Result<RootCert, CertError> {
        parse_hrk(&self.fetch_hrk()?)
    }

    fn get_hsk_cek(&self, chip_id: &str) -> Result<(RootCert, Cek), CertError> {
        parse_hsk_cek(&self.fetch_hsk_cek(chip_id)?)
    }
}
