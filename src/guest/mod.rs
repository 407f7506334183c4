// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Request attestation reports from the Hygon secure processor, either through
//! the `csv-guest` driver or directly through a hypercall.

use crate::report::{
    AttestationReport, MacError, HASH_SIZE, MNONCE_SIZE, REPORT_SIZE, SEALING_KEY_SIZE,
    USER_DATA_SIZE,
};
use crate::FormatError;
use log::{debug, info};
use openssl::hash::{Hasher, MessageDigest};
use openssl::rand::rand_bytes;
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

mod device;
mod hypercall;

pub use device::{CsvGuestDevice, CSV_GUEST_DEVICE};
pub use hypercall::{Hypercall, HypercallNr, KVM_HC_VM_ATTESTATION, KVM_HC_VM_ATTESTATION_LEGACY};

pub const PAGE_SIZE: usize = 4096;
const SEALING_KEY_REQUEST: &[u8] = b"get-sealing-key";

const_assert!(REPORT_SIZE <= PAGE_SIZE);

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("custom data is {0} bytes, at most {max} are allowed", max = USER_DATA_SIZE)]
    DataTooLarge(usize),
    #[error("failed to open {}", CSV_GUEST_DEVICE)]
    Device(#[source] std::io::Error),
    #[error("report ioctl failed")]
    Ioctl(#[source] nix::Error),
    #[error("failed to lock the request page")]
    Mlock(#[source] nix::Error),
    #[error("invalid hypercall number {0:?}")]
    HypercallNr(String),
    #[error("hypercall returned {0}")]
    Hypercall(i64),
    #[error("failed to read /proc/self/pagemap")]
    Pagemap(#[source] std::io::Error),
    #[error("physical frame of the request page is not available")]
    PfnUnavailable,
    #[error("hypercall channel is not supported on this architecture")]
    Unsupported,
    #[error("hypercall channel needs a Hygon CPU, found {0:?}")]
    UnsupportedCpu(String),
    #[error("OpenSSL error")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("malformed report")]
    Format(#[from] FormatError),
    #[error("session MAC verification failed")]
    Mac(#[from] MacError),
    #[error("report does not carry the requested mnonce")]
    MnonceMismatch,
}

/// Page shared with the secure processor. The request is written at the
/// start, the report is returned in place.
#[repr(C, align(4096))]
pub struct RequestPage {
    bytes: [u8; PAGE_SIZE],
}

impl RequestPage {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            bytes: [0; PAGE_SIZE],
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    fn write_request(&mut self, request: &ReportRequest) {
        let request = request.as_bytes();
        self.bytes[..request.len()].copy_from_slice(request);
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Clone, Debug, PartialEq)]
pub struct ReportRequest {
    pub data: [u8; USER_DATA_SIZE],
    pub mnonce: [u8; MNONCE_SIZE],
    pub hash: [u8; HASH_SIZE],
}

impl ReportRequest {
    /// Build a request for `data`, zero padded to 64 bytes, bound to `mnonce`
    /// by `hash = SM3(data || mnonce)`.
    pub fn new(data: &[u8], mnonce: [u8; MNONCE_SIZE]) -> Result<Self, AcquireError> {
        if data.len() > USER_DATA_SIZE {
            return Err(AcquireError::DataTooLarge(data.len()));
        }
        let mut request = Self::new_zeroed();
        request.data[..data.len()].copy_from_slice(data);
        request.mnonce = mnonce;

        let mut hasher = Hasher::new(MessageDigest::sm3())?;
        hasher.update(&request.data)?;
        hasher.update(&request.mnonce)?;
        let hash = hasher.finish()?;
        request.hash.copy_from_slice(&hash);
        Ok(request)
    }
}

/// Transport that hands a request page to the secure processor.
pub trait ReportChannel {
    fn submit(&self, page: &mut RequestPage) -> Result<(), AcquireError>;

    /// Whether reports obtained through this channel carry a session MAC that
    /// has to be checked.
    fn verifies_session_mac(&self) -> bool {
        false
    }
}

pub enum Channel {
    Device(CsvGuestDevice),
    Hypercall(Hypercall),
}

impl Channel {
    /// Use the guest driver when it is present, a hypercall otherwise. The
    /// hypercall is only chosen on a Hygon CPU, elsewhere this fails with
    /// [`AcquireError::UnsupportedCpu`].
    pub fn detect() -> Result<Self, AcquireError> {
        if Path::new(CSV_GUEST_DEVICE).exists() {
            debug!("using {CSV_GUEST_DEVICE}");
            return Ok(Channel::Device(CsvGuestDevice::default()));
        }
        debug!("{CSV_GUEST_DEVICE} not found, using hypercall");
        hypercall::check_cpu()?;
        Ok(Channel::Hypercall(Hypercall::from_env()?))
    }
}

impl ReportChannel for Channel {
    fn submit(&self, page: &mut RequestPage) -> Result<(), AcquireError> {
        match self {
            Channel::Device(device) => device.submit(page),
            Channel::Hypercall(hypercall) => hypercall.submit(page),
        }
    }

    fn verifies_session_mac(&self) -> bool {
        match self {
            Channel::Device(device) => device.verifies_session_mac(),
            Channel::Hypercall(hypercall) => hypercall.verifies_session_mac(),
        }
    }
}

/// Request a fresh attestation report carrying up to 64 bytes of
/// `custom_data`.
pub fn get_report<C: ReportChannel + ?Sized>(
    channel: &C,
    custom_data: &[u8],
) -> Result<AttestationReport, AcquireError> {
    let mut mnonce = [0u8; MNONCE_SIZE];
    rand_bytes(&mut mnonce)?;
    let request = ReportRequest::new(custom_data, mnonce)?;

    let mut page = RequestPage::new();
    page.write_request(&request);
    channel.submit(&mut page)?;

    let report = AttestationReport::from_bytes(page.as_bytes())?;
    if channel.verifies_session_mac() {
        report.verify_mac()?;
        debug!("session MAC verified");
    }

    let fields = report.deobfuscate();
    if fields.mnonce != mnonce {
        return Err(AcquireError::MnonceMismatch);
    }

    debug!("user data: {:02x?}", fields.user_data);
    debug!("mnonce: {:02x?}", fields.mnonce);
    debug!("measure: {:02x?}", fields.measure);
    match fields.chip_id_str() {
        Ok(chip_id) => debug!("chip id: {chip_id}"),
        Err(_) => debug!("chip id: {:02x?}", fields.chip_id),
    }
    info!("attestation report acquired");
    Ok(report)
}

/// Request the VM sealing key, returned in the reserved trailer of a report.
pub fn get_sealing_key<C: ReportChannel + ?Sized>(
    channel: &C,
) -> Result<[u8; SEALING_KEY_SIZE], AcquireError> {
    let report = get_report(channel, SEALING_KEY_REQUEST)?;
    Ok(report.sealing_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const MEASURE: [u8; HASH_SIZE] = [0x4d; HASH_SIZE];
    const CHIP_ID: &[u8] = b"HGN0123456789";

    /// Stands in for the secure processor: answers the request on the page
    /// with an obfuscated report.
    #[derive(Default)]
    struct FakeFirmware {
        session_mac: bool,
        forge_mac: bool,
        replay_mnonce: bool,
        seen: RefCell<Option<ReportRequest>>,
    }

    impl ReportChannel for FakeFirmware {
        fn submit(&self, page: &mut RequestPage) -> Result<(), AcquireError> {
            let request = ReportRequest::read_from_prefix(page.as_bytes()).unwrap();
            let expected = ReportRequest::new(&request.data, request.mnonce).unwrap();
            assert_eq!(request.hash, expected.hash);

            let mut plain = AttestationReport::new_zeroed();
            plain.anonce = 0x9e3779b9;
            plain.user_data = request.data;
            plain.mnonce = if self.replay_mnonce {
                [0xaa; MNONCE_SIZE]
            } else {
                request.mnonce
            };
            plain.measure = MEASURE;
            plain.sn[..CHIP_ID.len()].copy_from_slice(CHIP_ID);
            plain.reserved = [0x3c; SEALING_KEY_SIZE];

            let mut report = plain.toggle_obfuscation();
            if self.session_mac && !self.forge_mac {
                report.mac = report.compute_mac().unwrap();
            }
            page.as_bytes_mut()[..REPORT_SIZE].copy_from_slice(report.as_bytes());
            *self.seen.borrow_mut() = Some(request);
            Ok(())
        }

        fn verifies_session_mac(&self) -> bool {
            self.session_mac
        }
    }

    #[test]
    fn report_carries_custom_data() {
        let firmware = FakeFirmware::default();
        let report = get_report(&firmware, b"hello").unwrap();
        let fields = report.deobfuscate();
        assert_eq!(fields.user_data_str(), "hello");
        assert_eq!(fields.measure, MEASURE);
        assert_eq!(fields.chip_id_str().unwrap(), "HGN0123456789");

        let seen = firmware.seen.borrow().clone().unwrap();
        assert_eq!(&seen.data[..5], b"hello");
        assert_eq!(seen.data[5..], [0; USER_DATA_SIZE - 5]);
        assert_eq!(fields.mnonce, seen.mnonce);
    }

    #[test]
    fn custom_data_size_limit() {
        let firmware = FakeFirmware::default();
        get_report(&firmware, &[0x61; USER_DATA_SIZE]).unwrap();
        assert!(matches!(
            get_report(&firmware, &[0x61; USER_DATA_SIZE + 1]),
            Err(AcquireError::DataTooLarge(65))
        ));
        assert!(firmware.seen.borrow().is_some());
    }

    #[test]
    fn empty_custom_data_is_zero_padded() {
        let firmware = FakeFirmware::default();
        let report = get_report(&firmware, &[]).unwrap();
        assert_eq!(report.deobfuscate().user_data, [0; USER_DATA_SIZE]);
    }

    #[test]
    fn session_mac_is_checked() {
        let firmware = FakeFirmware {
            session_mac: true,
            ..Default::default()
        };
        get_report(&firmware, b"hello").unwrap();

        let firmware = FakeFirmware {
            session_mac: true,
            forge_mac: true,
            ..Default::default()
        };
        assert!(matches!(
            get_report(&firmware, b"hello"),
            Err(AcquireError::Mac(MacError::Mismatch))
        ));
    }

    #[test]
    fn mac_is_ignored_on_device_channel() {
        let firmware = FakeFirmware {
            forge_mac: true,
            ..Default::default()
        };
        get_report(&firmware, b"hello").unwrap();
    }

    #[test]
    fn replayed_mnonce_is_rejected() {
        let firmware = FakeFirmware {
            replay_mnonce: true,
            ..Default::default()
        };
        assert!(matches!(
            get_report(&firmware, b"hello"),
            Err(AcquireError::MnonceMismatch)
        ));
    }

    #[test]
    fn sealing_key_request() {
        let firmware = FakeFirmware::default();
        let key = get_sealing_key(&firmware).unwrap();
        assert_eq!(key, [0x3c; SEALING_KEY_SIZE]);
        let seen = firmware.seen.borrow().clone().unwrap();
        assert_eq!(&seen.data[..SEALING_KEY_REQUEST.len()], SEALING_KEY_REQUEST);
    }

    #[test]
    fn request_hash_vector() {
        let data: [u8; USER_DATA_SIZE] = [
            103, 198, 105, 115, 81, 255, 74, 236, 41, 205, 186, 171, 242, 251, 227, 70, 124,
            194, 84, 248, 27, 232, 231, 141, 118, 90, 46, 99, 51, 159, 201, 154, 102, 50, 13,
            183, 49, 88, 163, 90, 37, 93, 5, 23, 88, 233, 94, 212, 171, 178, 205, 198, 155, 180,
            84, 17, 14, 130, 116, 65, 33, 61, 220, 135,
        ];
        let mnonce: [u8; MNONCE_SIZE] = [
            112, 233, 62, 161, 65, 225, 252, 103, 62, 1, 126, 151, 234, 220, 107, 150,
        ];
        let hash: [u8; HASH_SIZE] = [
            19, 76, 8, 98, 33, 246, 247, 155, 28, 21, 245, 185, 118, 74, 162, 128, 82, 15, 160,
            233, 212, 130, 106, 177, 89, 6, 119, 243, 130, 21, 3, 153,
        ];
        let request = ReportRequest::new(&data, mnonce).unwrap();
        assert_eq!(request.hash, hash);
        assert_eq!(request.as_bytes().len(), 112);
    }

    #[test]
    fn sm3_reference_digest() {
        let digest = openssl::hash::hash(MessageDigest::sm3(), b"abc").unwrap();
        assert_eq!(
            hex::encode(digest),
            "66c7f0f462eeedd9d1f2d46bdc10e4e24167c4875cf2f7a2297da02b8f4ba8e0"
        );
    }

    #[test]
    fn request_page_is_page_aligned() {
        let mut page = RequestPage::new();
        assert_eq!(page.as_mut_ptr() as usize % PAGE_SIZE, 0);
        assert_eq!(page.as_bytes().len(), PAGE_SIZE);
        assert!(page.as_bytes().iter().all(|b| *b == 0));
    }
}
