// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{AcquireError, ReportChannel, RequestPage, PAGE_SIZE};
use log::{debug, warn};
use nix::sys::mman::{mlock, munlock};
use std::ffi::c_void;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

pub const KVM_HC_VM_ATTESTATION: u32 = 100;
/// Number used by older hypervisors.
pub const KVM_HC_VM_ATTESTATION_LEGACY: u32 = 12;
const HYPERCALL_NR_ENV: &str = "KVM_HC_VM_ATTESTATION";

const PAGEMAP: &str = "/proc/self/pagemap";
const PAGEMAP_ENTRY_SIZE: u64 = 8;
const PFN_MASK: u64 = (1 << 55) - 1;
const PAGE_SHIFT: u32 = 12;
const HYGON_VENDOR: &str = "HygonGenuine";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HypercallNr(u32);

impl HypercallNr {
    pub fn from_env() -> Result<Self, AcquireError> {
        Self::parse(std::env::var(HYPERCALL_NR_ENV).ok().as_deref())
    }

    /// Unset or empty selects the default number.
    pub fn parse(value: Option<&str>) -> Result<Self, AcquireError> {
        let value = match value.map(str::trim) {
            None | Some("") => return Ok(Self::default()),
            Some(value) => value,
        };
        match value.parse::<u32>() {
            Ok(nr @ (KVM_HC_VM_ATTESTATION | KVM_HC_VM_ATTESTATION_LEGACY)) => Ok(Self(nr)),
            _ => Err(AcquireError::HypercallNr(value.to_string())),
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for HypercallNr {
    fn default() -> Self {
        Self(KVM_HC_VM_ATTESTATION)
    }
}

/// Report channel that passes the physical address of the request page to
/// the hypervisor. Reports returned this way carry a session MAC.
#[derive(Debug, Clone, Default)]
pub struct Hypercall {
    nr: HypercallNr,
}

impl Hypercall {
    pub fn new(nr: HypercallNr) -> Self {
        Self { nr }
    }

    pub fn from_env() -> Result<Self, AcquireError> {
        Ok(Self::new(HypercallNr::from_env()?))
    }

    fn call(&self, page: &mut RequestPage) -> Result<(), AcquireError> {
        let pa = physical_address(page.as_mut_ptr() as u64)?;
        debug!("hypercall {} for page at pa {pa:#x}", self.nr.get());
        let ret = vmmcall(self.nr.get(), pa, PAGE_SIZE as u64)?;
        if ret != 0 {
            return Err(AcquireError::Hypercall(ret));
        }
        Ok(())
    }
}

impl ReportChannel for Hypercall {
    fn submit(&self, page: &mut RequestPage) -> Result<(), AcquireError> {
        check_cpu()?;
        let addr = page.as_mut_ptr() as *const c_void;
        // SAFETY: the page is a live allocation of `PAGE_SIZE` bytes.
        unsafe { mlock(addr, PAGE_SIZE) }.map_err(AcquireError::Mlock)?;
        let result = self.call(page);
        // SAFETY: same range as locked above.
        if let Err(e) = unsafe { munlock(addr, PAGE_SIZE) } {
            warn!("failed to unlock request page: {e}");
        }
        result
    }

    fn verifies_session_mac(&self) -> bool {
        true
    }
}

#[cfg_attr(not(target_arch = "x86_64"), allow(dead_code))]
fn check_vendor(vendor: &str) -> Result<(), AcquireError> {
    if vendor != HYGON_VENDOR {
        return Err(AcquireError::UnsupportedCpu(vendor.to_string()));
    }
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn cpu_vendor() -> String {
    raw_cpuid::CpuId::new()
        .get_vendor_info()
        .map(|info| info.as_str().to_string())
        .unwrap_or_default()
}

/// `vmmcall` raises #UD outside of a Hygon guest, so refuse to issue it there.
#[cfg(target_arch = "x86_64")]
pub(super) fn check_cpu() -> Result<(), AcquireError> {
    check_vendor(&cpu_vendor())
}

#[cfg(not(target_arch = "x86_64"))]
pub(super) fn check_cpu() -> Result<(), AcquireError> {
    Err(AcquireError::Unsupported)
}

/// Frame number of a pagemap entry, `None` when the kernel withholds it.
fn pfn(entry: u64) -> Option<u64> {
    match entry & PFN_MASK {
        0 => None,
        pfn => Some(pfn),
    }
}

fn physical_address(va: u64) -> Result<u64, AcquireError> {
    let mut pagemap = File::open(PAGEMAP).map_err(AcquireError::Pagemap)?;
    let offset = va / PAGE_SIZE as u64 * PAGEMAP_ENTRY_SIZE;
    pagemap
        .seek(SeekFrom::Start(offset))
        .map_err(AcquireError::Pagemap)?;
    let mut entry = [0u8; PAGEMAP_ENTRY_SIZE as usize];
    pagemap
        .read_exact(&mut entry)
        .map_err(AcquireError::Pagemap)?;
    let pfn = pfn(u64::from_le_bytes(entry)).ok_or(AcquireError::PfnUnavailable)?;
    Ok((pfn << PAGE_SHIFT) | (va % PAGE_SIZE as u64))
}

#[cfg(target_arch = "x86_64")]
fn vmmcall(nr: u32, pa: u64, len: u64) -> Result<i64, AcquireError> {
    let mut rax = u64::from(nr);
    // SAFETY: the hypervisor only writes to the locked page at `pa`. rbx is
    // reserved by LLVM, so the address is swapped in and out around the call.
    unsafe {
        std::arch::asm!(
            "xchg {pa}, rbx",
            "vmmcall",
            "xchg {pa}, rbx",
            pa = inout(reg) pa => _,
            inout("rax") rax,
            in("rcx") len,
            options(nostack),
        );
    }
    Ok(rax as i64)
}

#[cfg(not(target_arch = "x86_64"))]
fn vmmcall(_nr: u32, _pa: u64, _len: u64) -> Result<i64, AcquireError> {
    Err(AcquireError::Unsupported)
}
