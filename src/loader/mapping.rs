//! Anonymous process-memory mapping with explicit protection states.
//!
//! The mapping moves through `Writable -> Finalized` (the third state,
//! unmapped, is the absence of the value). Segment bytes are copied and
//! relocations patched while `Writable`; [`Mapping::finalize`] then applies
//! each segment's declared permissions, making executable pages live only
//! after every write has completed. No page is ever writable and executable
//! at the same time.

use crate::error::{Error, Result};
use crate::image::{perms, Segment};

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

pub(crate) fn round_up_to_page(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) & !(page - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protection {
    Writable,
    Finalized,
}

/// An owned anonymous mapping holding one loaded image.
pub struct Mapping {
    ptr: *mut u8,
    len: usize,
    state: Protection,
}

// SAFETY: the mapping is exclusively owned; mutation happens only through
// `&mut self` while `Writable`, and after `finalize` the code/rodata pages
// are immutable (writable data segments are only touched by the loaded code
// itself, outside this type's API).
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Maps `len` bytes (rounded up to page size) of zeroed read+write
    /// memory.
    pub fn new(len: usize) -> Result<Self> {
        let len = round_up_to_page(len.max(1));
        // SAFETY: anonymous private mapping, no fd; result checked against
        // MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::ResourceExhausted(format!(
                "mmap of {len} bytes failed"
            )));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
            state: Protection::Writable,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base(&self) -> *const u8 {
        self.ptr
    }

    pub(crate) fn base_mut(&mut self) -> *mut u8 {
        debug_assert_eq!(self.state, Protection::Writable);
        self.ptr
    }

    /// Whole-mapping writable view, only available before finalization.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if self.state != Protection::Writable {
            return Err(Error::InvalidArgument(
                "mapping is finalized and no longer writable".into(),
            ));
        }
        // SAFETY: ptr/len describe our own live RW mapping.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) })
    }

    /// Read-only view of `len` bytes at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "range {offset}+{len} exceeds mapping of {} bytes",
                    self.len
                ))
            })?;
        // SAFETY: bounds checked above; pages are always at least readable.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.add(offset), end - offset) })
    }

    /// Transitions `Writable -> Finalized`: applies each segment's declared
    /// permissions. Executable segments become read+exec in the same call
    /// that removes their writability, so no instruction byte is ever
    /// reachable through a writable and an executable view at once.
    pub fn finalize(&mut self, segments: &[Segment]) -> Result<()> {
        if self.state != Protection::Writable {
            return Err(Error::InvalidArgument("mapping already finalized".into()));
        }
        for seg in segments {
            let mut prot = 0;
            if seg.perms & perms::READ != 0 {
                prot |= libc::PROT_READ;
            }
            if seg.perms & perms::WRITE != 0 {
                prot |= libc::PROT_WRITE;
            }
            if seg.perms & perms::EXEC != 0 {
                prot |= libc::PROT_EXEC;
            }
            let offset = seg.vaddr as usize;
            let prot_len = round_up_to_page(seg.mem_size as usize);
            debug_assert_eq!(offset % page_size(), 0);
            debug_assert!(offset + prot_len <= self.len);
            // SAFETY: page-aligned subrange of our own mapping (validated by
            // the loader before any segment byte was copied).
            let rc = unsafe { libc::mprotect(self.ptr.add(offset) as *mut _, prot_len, prot) };
            if rc != 0 {
                return Err(Error::Fatal(format!(
                    "mprotect({offset:#x}, {prot_len}) failed"
                )));
            }
        }
        self.state = Protection::Finalized;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.state == Protection::Finalized
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap owned by self.
        unsafe {
            libc::munmap(self.ptr as *mut _, self.len);
        }
    }
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("len", &self.len)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_zeroed_and_writable() {
        let mut m = Mapping::new(100).unwrap();
        assert!(m.len() >= 100);
        let s = m.as_mut_slice().unwrap();
        assert!(s.iter().all(|&b| b == 0));
        s[0] = 0xAB;
        assert_eq!(m.slice(0, 1).unwrap(), &[0xAB]);
    }

    #[test]
    fn finalize_locks_out_writes() {
        let mut m = Mapping::new(page_size()).unwrap();
        let seg = Segment {
            vaddr: 0,
            mem_size: page_size() as u32,
            file_offset: 0,
            file_size: 0,
            perms: perms::READ,
        };
        m.finalize(&[seg]).unwrap();
        assert!(m.is_finalized());
        assert!(m.as_mut_slice().is_err());
        assert!(m.finalize(&[seg]).is_err());
        // Still readable.
        assert_eq!(m.slice(0, 4).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn out_of_bounds_slice_rejected() {
        let m = Mapping::new(16).unwrap();
        assert!(m.slice(0, m.len() + 1).is_err());
        assert!(m.slice(usize::MAX, 2).is_err());
    }
}
