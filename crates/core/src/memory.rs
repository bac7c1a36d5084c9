//! Raw code memory
//!
//! `CodeMemory` owns one anonymous mapping and is the only place in the
//! system that talks to the OS about memory: `map`, `make_writable`,
//! `make_executable`, `flush_icache` and `unmap`. Everything above it
//! addresses code through instruction indices.
//!
//! # W^X
//!
//! [`Protection`] has no read+write+execute variant, so no page managed
//! here can ever be writable and executable at the same time. Updating
//! code is always `make_writable` → copy → `make_executable` →
//! `flush_icache`, with nothing executing in between (the JIT is
//! single-threaded).
//!
//! # Platform Support
//!
//! - Linux / macOS: `mmap` + `mprotect`; instruction cache maintenance via
//!   `__clear_cache` (Linux, AArch64) or `sys_icache_invalidate` (macOS).
//! - x86-64 hosts keep coherent instruction caches, so flushing is a no-op.

use crate::error::MemoryError;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// Page protection states used by the heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Guard pages: any access faults
    None,
    ReadOnly,
    ReadWrite,
    ReadExecute,
}

impl Protection {
    pub fn flags(self) -> libc::c_int {
        match self {
            Protection::None => libc::PROT_NONE,
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protection::None => "PROT_NONE",
            Protection::ReadOnly => "PROT_READ",
            Protection::ReadWrite => "PROT_READ|PROT_WRITE",
            Protection::ReadExecute => "PROT_READ|PROT_EXEC",
        }
    }
}

/// The OS page size, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 { 4096 } else { size as usize }
    })
}

/// Round `value` up to a multiple of the page size.
pub fn page_align(value: usize) -> usize {
    let page = page_size();
    value.div_ceil(page) * page
}

/// One anonymous mapping, initially inaccessible.
pub struct CodeMemory {
    base: NonNull<u8>,
    len: usize,
    transitions: usize,
}

impl CodeMemory {
    /// Reserve `len` bytes (rounded up to whole pages) with no access rights.
    pub fn map(len: usize) -> Result<CodeMemory, MemoryError> {
        let len = page_align(len.max(1));

        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;

        // SAFETY: anonymous mapping at a kernel-chosen address
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::Map {
                len,
                source: std::io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(ptr as *mut u8).ok_or_else(|| MemoryError::Map {
            len,
            source: std::io::Error::other("mmap returned null"),
        })?;
        tracing::debug!(addr = ptr as usize, len, "mapped code memory");
        Ok(CodeMemory {
            base,
            len,
            transitions: 0,
        })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `addr` lies inside this mapping.
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr < start + self.len
    }

    /// Number of protection changes made so far.
    pub fn transitions(&self) -> usize {
        self.transitions
    }

    /// Change the protection of the pages covering `range` (byte offsets
    /// from the mapping base; widened to whole pages).
    pub fn protect(&mut self, range: Range<usize>, protection: Protection) -> Result<(), MemoryError> {
        let pages = self.page_span(range);
        if pages.is_empty() {
            return Ok(());
        }
        // SAFETY: the span lies inside our own mapping
        let rc = unsafe {
            libc::mprotect(
                self.base.as_ptr().add(pages.start) as *mut libc::c_void,
                pages.len(),
                protection.flags(),
            )
        };
        if rc != 0 {
            return Err(MemoryError::Protect {
                protection: protection.name(),
                addr: self.base.as_ptr() as usize + pages.start,
                len: pages.len(),
                source: std::io::Error::last_os_error(),
            });
        }
        self.transitions += 1;
        Ok(())
    }

    /// Make `range` read+write (and not executable).
    pub fn make_writable(&mut self, range: Range<usize>) -> Result<(), MemoryError> {
        self.protect(range, Protection::ReadWrite)
    }

    /// Make `range` read+execute (and not writable).
    pub fn make_executable(&mut self, range: Range<usize>) -> Result<(), MemoryError> {
        self.protect(range, Protection::ReadExecute)
    }

    /// Invalidate the instruction cache for `range` after new code was copied in.
    pub fn flush_icache(&self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        debug_assert!(range.end <= self.len);
        // SAFETY: the range is inside our mapping
        let start = unsafe { self.base.as_ptr().add(range.start) };
        let len = range.len();

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        unsafe {
            __clear_cache(start as *mut libc::c_char, start.add(len) as *mut libc::c_char);
        }

        #[cfg(target_os = "macos")]
        unsafe {
            sys_icache_invalidate(start as *mut libc::c_void, len);
        }

        #[cfg(not(any(all(target_os = "linux", target_arch = "aarch64"), target_os = "macos")))]
        {
            let _ = (start, len);
        }
    }

    /// Release the mapping, reporting failure.
    pub fn unmap(self) -> Result<(), MemoryError> {
        let this = std::mem::ManuallyDrop::new(self);
        this.release()
    }

    fn release(&self) -> Result<(), MemoryError> {
        // SAFETY: we own the mapping and nothing refers to it after this
        let rc = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };
        if rc != 0 {
            return Err(MemoryError::Unmap(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn page_span(&self, range: Range<usize>) -> Range<usize> {
        if range.is_empty() {
            return 0..0;
        }
        let page = page_size();
        let start = range.start / page * page;
        let end = page_align(range.end).min(self.len);
        start..end
    }
}

impl Drop for CodeMemory {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("failed to unmap code memory: {}", e);
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe extern "C" {
    fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
}

#[cfg(target_os = "macos")]
unsafe extern "C" {
    fn sys_icache_invalidate(start: *mut libc::c_void, len: libc::size_t);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_never_combines_write_and_execute() {
        for p in [
            Protection::None,
            Protection::ReadOnly,
            Protection::ReadWrite,
            Protection::ReadExecute,
        ] {
            let flags = p.flags();
            assert!(
                flags & libc::PROT_WRITE == 0 || flags & libc::PROT_EXEC == 0,
                "{} is W+X",
                p.name()
            );
        }
    }

    #[test]
    fn test_map_rounds_to_pages() {
        let memory = CodeMemory::map(1).unwrap();
        assert_eq!(memory.len(), page_size());
        assert!(memory.contains(memory.base().as_ptr() as usize));
        assert!(!memory.contains(memory.base().as_ptr() as usize + memory.len()));
        memory.unmap().unwrap();
    }

    #[test]
    fn test_protect_counts_transitions_and_allows_writes() {
        let page = page_size();
        let mut memory = CodeMemory::map(page * 2).unwrap();
        memory.make_writable(0..8).unwrap();
        unsafe { memory.base().as_ptr().write(0xAB) };
        assert_eq!(unsafe { memory.base().as_ptr().read() }, 0xAB);
        memory.make_executable(0..8).unwrap();
        assert_eq!(memory.transitions(), 2);

        // Empty ranges are free
        memory.make_writable(5..5).unwrap();
        assert_eq!(memory.transitions(), 2);
    }

    #[test]
    fn test_page_span_widens_to_whole_pages() {
        let page = page_size();
        let memory = CodeMemory::map(page * 4).unwrap();
        assert_eq!(memory.page_span(1..2), 0..page);
        assert_eq!(memory.page_span(page - 1..page + 1), 0..page * 2);
        assert_eq!(memory.page_span(page..page * 2), page..page * 2);
    }
}
