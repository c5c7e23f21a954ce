//! Make sure a user range can be accessed before the kernel dereferences it.
//!
//! Each page the range touches is probed once. A page that faults is handed
//! to the caller's resolver (normally the page-fault handler of the current
//! address space, which may map it lazily or break copy-on-write) and probed
//! again. The copy helpers at the bottom move data across only after the
//! walk has made the pages it is about to touch accessible.

use alloc::{string::String, vec::Vec};
use core::ops::ControlFlow;

use config::mm::{PAGE_MASK, PAGE_SIZE, USER_SPACE_END};
use systype::{SysError, SysResult};

use crate::cause::AccessType;

/// Answers whether touching one user byte would fault.
pub trait UserProbe {
    fn will_fail(&self, vaddr: usize, access: AccessType) -> bool;
}

/// Probes through `__try_read_user` / `__try_write_user`.
#[cfg(target_arch = "riscv64")]
pub struct HardwareProbe;

#[cfg(target_arch = "riscv64")]
impl UserProbe for HardwareProbe {
    fn will_fail(&self, vaddr: usize, access: AccessType) -> bool {
        match access {
            AccessType::Write => crate::user_rw::will_write_fail(vaddr),
            AccessType::Read | AccessType::Execute => crate::user_rw::will_read_fail(vaddr),
        }
    }
}

/// Bulk access to user memory the walk has already made accessible.
///
/// Chunks never cross a page boundary.
pub trait UserMemory: UserProbe {
    fn read_chunk(&self, vaddr: usize, dst: &mut [u8]);
    fn write_chunk(&self, vaddr: usize, src: &[u8]);
}

// A page unmapped by another hart between the check and the copy still
// faults the kernel; this layer assumes the address space is not shared.
#[cfg(target_arch = "riscv64")]
impl UserMemory for HardwareProbe {
    fn read_chunk(&self, vaddr: usize, dst: &mut [u8]) {
        let _sum: arch::memory::SumGuard = arch::memory::SumGuard::new();
        unsafe { core::ptr::copy_nonoverlapping(vaddr as *const u8, dst.as_mut_ptr(), dst.len()) }
    }

    fn write_chunk(&self, vaddr: usize, src: &[u8]) {
        let _sum: arch::memory::SumGuard = arch::memory::SumGuard::new();
        unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), vaddr as *mut u8, src.len()) }
    }
}

fn check_user_range(begin: usize, len: usize) -> SysResult<()> {
    match begin.checked_add(len) {
        Some(end) if end <= USER_SPACE_END => Ok(()),
        _ => {
            log::warn!("[user_access] {begin:#x} + {len:#x} leaves user space");
            Err(SysError::EFAULT)
        }
    }
}

/// Ensure that the whole range is accessible, or return an error.
pub fn ensure_user_area<P: UserProbe>(
    probe: &P,
    begin: usize,
    len: usize,
    access: AccessType,
    resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
) -> SysResult<()> {
    if len == 0 {
        return Ok(());
    }
    check_user_range(begin, len)?;
    walk_user_area(probe, begin, len, access, resolve, |_, _| {
        ControlFlow::Continue(())
    })
}

/// Walk `[begin, begin + len)` page by page, making each page accessible and
/// then calling `f(vaddr, len)` on the accessible chunk.
///
/// `f` stops the walk early with `Break(None)` (success) or
/// `Break(Some(err))`. A range running past the end of user space is cut
/// there, so `len` may be `usize::MAX` for data of unknown length such as a C
/// string; reaching the cut without `f` breaking is an `EFAULT`.
pub fn walk_user_area<P: UserProbe>(
    probe: &P,
    begin: usize,
    len: usize,
    access: AccessType,
    mut resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
    mut f: impl FnMut(usize, usize) -> ControlFlow<Option<SysError>>,
) -> SysResult<()> {
    if len == 0 {
        return Ok(());
    }
    if begin >= USER_SPACE_END {
        log::warn!("[walk_user_area] {begin:#x} is not a user address");
        return Err(SysError::EFAULT);
    }
    let wanted_end = begin.saturating_add(len);
    let end = wanted_end.min(USER_SPACE_END);

    let mut curr = begin;
    while curr < end {
        if probe.will_fail(curr, access) {
            resolve(curr, access).map_err(|err| {
                log::warn!("[walk_user_area] cannot resolve {curr:#x}: {err:?}");
                SysError::EFAULT
            })?;
            if probe.will_fail(curr, access) {
                log::warn!("[walk_user_area] {curr:#x} still faults after resolving");
                return Err(SysError::EFAULT);
            }
        }

        let next_page = (curr & !PAGE_MASK) + PAGE_SIZE;
        let chunk_end = next_page.min(end);
        match f(curr, chunk_end - curr) {
            ControlFlow::Continue(()) => {}
            ControlFlow::Break(None) => return Ok(()),
            ControlFlow::Break(Some(err)) => return Err(err),
        }
        curr = chunk_end;
    }

    if end < wanted_end {
        Err(SysError::EFAULT)
    } else {
        Ok(())
    }
}

/// Fill `dst` from user memory starting at `src`.
pub fn copy_from_user<M: UserMemory>(
    mem: &M,
    src: usize,
    dst: &mut [u8],
    resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
) -> SysResult<()> {
    check_user_range(src, dst.len())?;
    let mut copied = 0;
    walk_user_area(mem, src, dst.len(), AccessType::Read, resolve, |va, len| {
        mem.read_chunk(va, &mut dst[copied..copied + len]);
        copied += len;
        ControlFlow::Continue(())
    })
}

/// Store `src` in user memory starting at `dst`.
pub fn copy_to_user<M: UserMemory>(
    mem: &M,
    dst: usize,
    src: &[u8],
    resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
) -> SysResult<()> {
    check_user_range(dst, src.len())?;
    let mut copied = 0;
    walk_user_area(mem, dst, src.len(), AccessType::Write, resolve, |va, len| {
        mem.write_chunk(va, &src[copied..copied + len]);
        copied += len;
        ControlFlow::Continue(())
    })
}

/// Read a NUL-terminated string of at most `max_len` bytes (the NUL
/// included) starting at `src`.
///
/// No NUL within `max_len` bytes, or bytes that are not UTF-8, give
/// `EINVAL`; running off the end of user space gives `EFAULT`.
pub fn read_user_cstr<M: UserMemory>(
    mem: &M,
    src: usize,
    max_len: usize,
    resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
) -> SysResult<String> {
    let mut bytes = Vec::new();
    let mut terminated = false;
    walk_user_area(mem, src, max_len, AccessType::Read, resolve, |va, len| {
        let start = bytes.len();
        bytes.resize(start + len, 0);
        mem.read_chunk(va, &mut bytes[start..]);
        match bytes[start..].iter().position(|&b| b == 0) {
            Some(nul) => {
                bytes.truncate(start + nul);
                terminated = true;
                ControlFlow::Break(None)
            }
            None => ControlFlow::Continue(()),
        }
    })?;
    if !terminated {
        log::warn!("[read_user_cstr] no NUL within {max_len:#x} bytes of {src:#x}");
        return Err(SysError::EINVAL);
    }
    String::from_utf8(bytes).map_err(|_| SysError::EINVAL)
}

/// Store `s` followed by a NUL at `dst`.
pub fn write_user_cstr<M: UserMemory>(
    mem: &M,
    dst: usize,
    s: &str,
    resolve: impl FnMut(usize, AccessType) -> SysResult<()>,
) -> SysResult<()> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    copy_to_user(mem, dst, &bytes, resolve)
}
