// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Deterministic HRK -> HSK -> CEK -> PEK -> report chain signed with SM2 test keys.

use crate::certs::{parse_hsk_cek, Cek, CertError, CertProvider, HygonChain};
use csv_cvm::certs::{
    primitive_to_wire, CsvCert, CurveId, EccPubKey, EccSignature, RootCert, Usage,
};
use csv_cvm::report::AttestationReport;
use signature::Signer;
use sm2::dsa::{Signature, SigningKey};
use sm2::elliptic_curve::sec1::ToEncodedPoint;
use sm2::SecretKey;
use std::cell::Cell;
use std::io;
use zerocopy::{AsBytes, FromZeroes};

pub const HRK_SIGNER: &str = "HYGON-SSD-HRK";
pub const HSK_SIGNER: &str = "HYGON-SSD-HSK";
pub const CEK_SIGNER: &str = "HYGON-SSD-CEK";
pub const PEK_SIGNER: &str = "HYGON-SSD-PEK";
pub const CHIP_ID: &str = "NZA0123456789";
pub const MEASURE: [u8; 32] = [0x6d; 32];
pub const ANONCE: u32 = 0x5eed1e55;

const HRK_KEY: [u8; 32] = [1; 32];
const HSK_KEY: [u8; 32] = [2; 32];
const CEK_KEY: [u8; 32] = [3; 32];
pub const PEK_KEY: [u8; 32] = [4; 32];
pub const OTHER_KEY: [u8; 32] = [5; 32];

fn secret(key: &[u8; 32]) -> SecretKey {
    SecretKey::from_slice(key).unwrap()
}

fn pubkey(key: &[u8; 32], signer: &str) -> EccPubKey {
    let point = secret(key).public_key().to_encoded_point(false);
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(point.x().unwrap());
    y.copy_from_slice(point.y().unwrap());

    let mut pubkey = EccPubKey::new_zeroed();
    pubkey.curve_id = CurveId::Sm2_256 as u32;
    pubkey.qx = primitive_to_wire(&x);
    pubkey.qy = primitive_to_wire(&y);
    pubkey.set_user_id(signer.as_bytes());
    pubkey
}

pub fn sign(key: &[u8; 32], signer: &str, message: &[u8]) -> EccSignature {
    let signing_key = SigningKey::new(signer, &secret(key)).unwrap();
    let sig: Signature = signing_key.sign(message);
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&sig.to_bytes());
    EccSignature::from_primitive(&bytes)
}

fn root_cert(usage: Usage, key: &[u8; 32], signer: &str) -> RootCert {
    let mut cert = RootCert::new_zeroed();
    cert.version = 1;
    cert.key_usage = usage.into();
    cert.key_id = [usage as u8 + 1; 16];
    cert.pubkey = pubkey(key, signer);
    cert
}

fn csv_cert(usage: Usage, key: &[u8; 32], signer: &str, issuer: Usage) -> CsvCert {
    let mut cert = CsvCert::new_zeroed();
    cert.version = 1;
    cert.api_major = 1;
    cert.api_minor = 2;
    cert.pubkey_usage = usage.into();
    cert.pubkey_algo = 0x4;
    cert.pubkey = pubkey(key, signer);
    cert.sig1_usage = issuer.into();
    cert.sig1_algo = 0x4;
    cert.sig2_usage = Usage::Invalid.into();
    cert
}

pub struct Fixture {
    pub hrk: RootCert,
    pub hsk: RootCert,
    pub cek: CsvCert,
    /// Plaintext PEK as embedded in the report.
    pub pek: CsvCert,
    /// Report in wire form, obfuscated and signed.
    pub report: AttestationReport,
    pub fetches: Cell<usize>,
}

impl Fixture {
    pub fn new(user_data: &[u8]) -> Self {
        Self::build(user_data, &PEK_KEY, &PEK_KEY)
    }

    /// Chain whose PEK certifies `pek_key` while the report is signed with
    /// `report_key`.
    pub fn build(user_data: &[u8], pek_key: &[u8; 32], report_key: &[u8; 32]) -> Self {
        let mut hrk = root_cert(Usage::Hrk, &HRK_KEY, HRK_SIGNER);
        hrk.signature = sign(&HRK_KEY, HRK_SIGNER, hrk.signed_bytes());

        let mut hsk = root_cert(Usage::Hsk, &HSK_KEY, HSK_SIGNER);
        hsk.certifying_id = hrk.key_id;
        hsk.signature = sign(&HRK_KEY, HRK_SIGNER, hsk.signed_bytes());

        let mut cek = csv_cert(Usage::Cek, &CEK_KEY, CEK_SIGNER, Usage::Hsk);
        cek.sig1 = sign(&HSK_KEY, HSK_SIGNER, cek.signed_bytes());

        let mut pek = csv_cert(Usage::Pek, pek_key, PEK_SIGNER, Usage::Cek);
        pek.sig1 = sign(&CEK_KEY, CEK_SIGNER, pek.signed_bytes());

        let mut plain = AttestationReport::new_zeroed();
        plain.user_pubkey_digest = [0x21; 32];
        plain.vm_id = [0x1d; 16];
        plain.vm_version = [0x02; 16];
        plain.user_data[..user_data.len()].copy_from_slice(user_data);
        plain.mnonce = [0x4e; 16];
        plain.measure = MEASURE;
        plain.policy = 0x1;
        plain.anonce = ANONCE;
        plain.sig_usage = Usage::Pek.into();
        plain.sig_algo = 0x4;
        plain.pek_cert = pek;
        plain.sn[..CHIP_ID.len()].copy_from_slice(CHIP_ID.as_bytes());

        let mut report = plain.toggle_obfuscation();
        report.sig = sign(report_key, PEK_SIGNER, report.signed_bytes());
        report.mac = report.compute_mac().unwrap();

        Self {
            hrk,
            hsk,
            cek,
            pek,
            report,
            fetches: Cell::new(0),
        }
    }

    pub fn chain(&self) -> HygonChain {
        HygonChain {
            hrk: self.hrk,
            hsk: self.hsk,
        }
    }

    pub fn cek(&self) -> Cek {
        Cek(self.cek)
    }

    pub fn hsk_cek_bytes(&self) -> Vec<u8> {
        let mut bytes = self.hsk.as_bytes().to_vec();
        bytes.extend_from_slice(self.cek.as_bytes());
        bytes
    }
}

impl CertProvider for Fixture {
    fn get_hrk(&self) -> Result<RootCert, CertError> {
        self.fetches.set(self.fetches.get() + 1);
        Ok(self.hrk)
    }

    fn get_hsk_cek(&self, chip_id: &str) -> Result<(RootCert, Cek), CertError> {
        self.fetches.set(self.fetches.get() + 1);
        if chip_id != CHIP_ID {
            return Err(io::Error::from(io::ErrorKind::NotFound).into());
        }
        parse_hsk_cek(&self.hsk_cek_bytes())
    }
}
