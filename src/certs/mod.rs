// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Layouts follow the certificate formats of the Hygon secure processor. All
// integers are little-endian. ECC coordinates and signature scalars occupy the
// first 32 bytes of a 72 byte slot and are stored least significant byte first.

use crate::{check_len, FormatError};
use memoffset::offset_of;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use static_assertions::const_assert_eq;
use std::fmt;
use std::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const ECC_LEN: usize = 32;
pub const ECC_POINT_SIZE: usize = 72;
pub const USER_ID_SIZE: usize = 256;
pub const USER_ID_MAX_LEN: usize = USER_ID_SIZE - size_of::<u16>();
pub const KEY_ID_LEN: usize = 16;

pub const ROOT_CERT_SIZE: usize = size_of::<RootCert>();
pub const ROOT_CERT_SIGNED_SIZE: usize = offset_of!(RootCert, signature);
pub const CSV_CERT_SIZE: usize = size_of::<CsvCert>();
pub const CSV_CERT_SIGNED_SIZE: usize = offset_of!(CsvCert, sig1_usage);

const_assert_eq!(size_of::<EccPubKey>(), 404);
const_assert_eq!(size_of::<EccSignature>(), 144);
const_assert_eq!(ROOT_CERT_SIZE, 832);
const_assert_eq!(ROOT_CERT_SIGNED_SIZE, 576);
const_assert_eq!(CSV_CERT_SIZE, 2084);
const_assert_eq!(CSV_CERT_SIGNED_SIZE, 1044);

/// Role of a key or of a signature slot.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Usage {
    Hrk = 0x0,
    Hsk = 0x13,
    /// Marks an unused signature slot.
    Invalid = 0x1000,
    Oca = 0x1001,
    Pek = 0x1002,
    Pdh = 0x1003,
    Cek = 0x1004,
}

impl Usage {
    pub fn matches(self, tag: u32) -> bool {
        u32::from(self) == tag
    }
}

impl From<Usage> for u32 {
    fn from(usage: Usage) -> Self {
        usage as u32
    }
}

impl TryFrom<u32> for Usage {
    type Error = u32;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        let usage = match tag {
            0x0 => Usage::Hrk,
            0x13 => Usage::Hsk,
            0x1000 => Usage::Invalid,
            0x1001 => Usage::Oca,
            0x1002 => Usage::Pek,
            0x1003 => Usage::Pdh,
            0x1004 => Usage::Cek,
            _ => return Err(tag),
        };
        Ok(usage)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Usage::Hrk => "HRK",
            Usage::Hsk => "HSK",
            Usage::Invalid => "INVALID",
            Usage::Oca => "OCA",
            Usage::Pek => "PEK",
            Usage::Pdh => "PDH",
            Usage::Cek => "CEK",
        };
        write!(f, "{name} ({:#x})", u32::from(*self))
    }
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CurveId {
    P256 = 0x1,
    P384 = 0x2,
    Sm2_256 = 0x3,
}

impl TryFrom<u32> for CurveId {
    type Error = u32;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        match id {
            0x1 => Ok(CurveId::P256),
            0x2 => Ok(CurveId::P384),
            0x3 => Ok(CurveId::Sm2_256),
            _ => Err(id),
        }
    }
}

/// Convert a coordinate or scalar slot from wire order into the big-endian
/// order expected by SM2 primitives.
pub fn wire_to_primitive(slot: &[u8; ECC_POINT_SIZE]) -> [u8; ECC_LEN] {
    let mut value = [0u8; ECC_LEN];
    value.copy_from_slice(&slot[..ECC_LEN]);
    value.reverse();
    value
}

/// Inverse of [`wire_to_primitive`], the unused tail of the slot is zeroed.
pub fn primitive_to_wire(value: &[u8; ECC_LEN]) -> [u8; ECC_POINT_SIZE] {
    let mut slot = [0u8; ECC_POINT_SIZE];
    slot[..ECC_LEN].copy_from_slice(value);
    slot[..ECC_LEN].reverse();
    slot
}

#[repr(C)]
#[derive(
    AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq,
)]
pub struct EccPubKey {
    pub curve_id: u32,
    #[serde(with = "BigArray")]
    pub qx: [u8; ECC_POINT_SIZE],
    #[serde(with = "BigArray")]
    pub qy: [u8; ECC_POINT_SIZE],
    /// u16 length followed by the identity string.
    #[serde(with = "BigArray")]
    pub user_id: [u8; USER_ID_SIZE],
}

impl EccPubKey {
    pub fn curve(&self) -> Option<CurveId> {
        CurveId::try_from(self.curve_id).ok()
    }

    /// Signer identity bound into SM2 digests. The declared length is clamped
    /// to the capacity of the slot.
    pub fn user_id(&self) -> &[u8] {
        let len = u16::from_le_bytes([self.user_id[0], self.user_id[1]]) as usize;
        let len = len.min(USER_ID_MAX_LEN);
        &self.user_id[2..2 + len]
    }

    pub fn set_user_id(&mut self, id: &[u8]) {
        let len = id.len().min(USER_ID_MAX_LEN);
        self.user_id = [0; USER_ID_SIZE];
        self.user_id[..2].copy_from_slice(&(len as u16).to_le_bytes());
        self.user_id[2..2 + len].copy_from_slice(&id[..len]);
    }

    /// Uncompressed SEC1 encoding of the point, `04 || x || y`.
    pub fn sec1_point(&self) -> [u8; 1 + 2 * ECC_LEN] {
        let mut point = [0u8; 1 + 2 * ECC_LEN];
        point[0] = 0x04;
        point[1..=ECC_LEN].copy_from_slice(&wire_to_primitive(&self.qx));
        point[1 + ECC_LEN..].copy_from_slice(&wire_to_primitive(&self.qy));
        point
    }
}

#[repr(C)]
#[derive(
    AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq,
)]
pub struct EccSignature {
    #[serde(with = "BigArray")]
    pub r: [u8; ECC_POINT_SIZE],
    #[serde(with = "BigArray")]
    pub s: [u8; ECC_POINT_SIZE],
}

impl EccSignature {
    /// `r || s`, big-endian.
    pub fn to_primitive(&self) -> [u8; 2 * ECC_LEN] {
        let mut sig = [0u8; 2 * ECC_LEN];
        sig[..ECC_LEN].copy_from_slice(&wire_to_primitive(&self.r));
        sig[ECC_LEN..].copy_from_slice(&wire_to_primitive(&self.s));
        sig
    }

    pub fn from_primitive(sig: &[u8; 2 * ECC_LEN]) -> Self {
        let mut r = [0u8; ECC_LEN];
        let mut s = [0u8; ECC_LEN];
        r.copy_from_slice(&sig[..ECC_LEN]);
        s.copy_from_slice(&sig[ECC_LEN..]);
        Self {
            r: primitive_to_wire(&r),
            s: primitive_to_wire(&s),
        }
    }
}

/// HRK and HSK certificates.
#[repr(C)]
#[derive(
    AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq,
)]
pub struct RootCert {
    pub version: u32,
    pub key_id: [u8; KEY_ID_LEN],
    pub certifying_id: [u8; KEY_ID_LEN],
    pub key_usage: u32,
    pub reserved1: [u8; 24],
    pub pubkey: EccPubKey,
    #[serde(with = "BigArray")]
    pub reserved2: [u8; 108],
    pub signature: EccSignature,
    #[serde(with = "BigArray")]
    pub reserved3: [u8; 112],
}

impl RootCert {
    /// Decode a root certificate from the first [`ROOT_CERT_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let bytes = check_len(bytes, ROOT_CERT_SIZE)?;
        let cert = bincode::deserialize(bytes)?;
        Ok(cert)
    }

    /// The bytes covered by the certificate's signature.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.as_bytes()[..ROOT_CERT_SIGNED_SIZE]
    }
}

/// CEK, PEK and the other platform certificates.
#[repr(C)]
#[derive(
    AsBytes, FromBytes, FromZeroes, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq,
)]
pub struct CsvCert {
    pub version: u32,
    pub api_major: u8,
    pub api_minor: u8,
    pub reserved1: u8,
    pub reserved2: u8,
    pub pubkey_usage: u32,
    pub pubkey_algo: u32,
    pub pubkey: EccPubKey,
    #[serde(with = "BigArray")]
    pub reserved3: [u8; 624],
    pub sig1_usage: u32,
    pub sig1_algo: u32,
    pub sig1: EccSignature,
    #[serde(with = "BigArray")]
    pub reserved4: [u8; 368],
    pub sig2_usage: u32,
    pub sig2_algo: u32,
    pub sig2: EccSignature,
    #[serde(with = "BigArray")]
    pub reserved5: [u8; 368],
}

impl CsvCert {
    /// Decode a platform certificate from the first [`CSV_CERT_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let bytes = check_len(bytes, CSV_CERT_SIZE)?;
        let cert = bincode::deserialize(bytes)?;
        Ok(cert)
    }

    /// The bytes covered by the certificate's signatures.
    pub fn signed_bytes(&self) -> &[u8] {
        &self.as_bytes()[..CSV_CERT_SIGNED_SIZE]
    }

    /// The signature an issuer placed on this certificate: the second slot
    /// when the first one is marked unused, otherwise the first.
    pub fn chain_signature(&self) -> &EccSignature {
        if Usage::Invalid.matches(self.sig1_usage) {
            &self.sig2
        } else {
            &self.sig1
        }
    }
}
