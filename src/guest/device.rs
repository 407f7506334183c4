// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{AcquireError, ReportChannel, RequestPage, PAGE_SIZE};
use log::debug;
use nix::ioctl_readwrite;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

pub const CSV_GUEST_DEVICE: &str = "/dev/csv-guest";

const CSV_GUEST_IOC_TYPE: u8 = b'D';
const CSV_CMD_GET_REPORT: u8 = 1;

/// Argument of the `csv-guest` report ioctl.
#[repr(C)]
#[derive(Debug)]
pub struct CsvGuestMem {
    pub va: u64,
    pub size: i32,
}

ioctl_readwrite!(
    csv_get_report,
    CSV_GUEST_IOC_TYPE,
    CSV_CMD_GET_REPORT,
    CsvGuestMem
);

/// Report channel backed by the `csv-guest` kernel driver.
#[derive(Debug, Clone)]
pub struct CsvGuestDevice {
    path: PathBuf,
}

impl Default for CsvGuestDevice {
    fn default() -> Self {
        Self::new(CSV_GUEST_DEVICE)
    }
}

impl CsvGuestDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportChannel for CsvGuestDevice {
    fn submit(&self, page: &mut RequestPage) -> Result<(), AcquireError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(AcquireError::Device)?;

        let mut mem = CsvGuestMem {
            va: page.as_mut_ptr() as u64,
            size: PAGE_SIZE as i32,
        };
        debug!("report ioctl on {}", self.path.display());
        // SAFETY: `mem` points at a live page of `PAGE_SIZE` bytes that stays
        // borrowed for the duration of the call.
        unsafe { csv_get_report(device.as_raw_fd(), &mut mem) }.map_err(AcquireError::Ioctl)?;
        Ok(())
    }
}
