// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::certs::{parse_hrk, parse_hsk_cek, Cek, CertError, CertProvider};
use crate::hygon_kds::HygonKds;
use csv_cvm::certs::RootCert;
use log::{debug, info};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zerocopy::AsBytes;

pub const HRK_FILE: &str = "hrk.cert";

pub fn hsk_cek_file(chip_id: &str) -> String {
    format!("{chip_id}_hsk_cek.cert")
}

/// Certificates kept in a local directory. Missing files are fetched from
/// `upstream` and stored, existing files are never replaced.
pub struct CertCache<P = HygonKds> {
    dir: PathBuf,
    upstream: P,
}

impl CertCache<HygonKds> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_upstream(dir, HygonKds::default())
    }
}

impl<P: CertProvider> CertCache<P> {
    pub fn with_upstream(dir: impl Into<PathBuf>, upstream: P) -> Self {
        Self {
            dir: dir.into(),
            upstream,
        }
    }

    fn read_or_fetch(
        &self,
        name: &str,
        fetch: impl FnOnce() -> Result<Vec<u8>, CertError>,
    ) -> Result<Vec<u8>, CertError> {
        let path = self.dir.join(name);
        if path.exists() {
            debug!("using cached {}", path.display());
        } else {
            let bytes = fetch()?;
            self.store(&path, &bytes)?;
        }
        Ok(fs::read(&path)?)
    }

    fn store(&self, path: &Path, bytes: &[u8]) -> Result<(), CertError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(bytes)?;
        file.as_file().sync_all()?;
        match file.persist_noclobber(path) {
            Ok(_) => {
                info!("cached {}", path.display());
                Ok(())
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!("{} was stored concurrently", path.display());
                Ok(())
            }
            Err(e) => Err(e.error.into()),
        }
    }
}

impl<P: CertProvider> CertProvider for CertCache<P> {
    fn get_hrk(&self) -> Result<RootCert, CertError> {
        let bytes = self.read_or_fetch(HRK_FILE, || {
            let hrk = self.upstream.get_hrk()?;
            Ok(hrk.as_bytes().to_vec())
        })?;
        parse_hrk(&bytes)
    }

    fn get_hsk_cek(&self, chip_id: &str) -> Result<(RootCert, Cek), CertError> {
        let bytes = self.read_or_fetch(&hsk_cek_file(chip_id), || {
            let (hsk, cek) = self.upstream.get_hsk_cek(chip_id)?;
            let mut bytes = hsk.as_bytes().to_vec();
            bytes.extend_from_slice(cek.0.as_bytes());
            Ok(bytes)
        })?;
        parse_hsk_cek(&bytes)
    }
}
