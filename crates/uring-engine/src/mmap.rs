//! `Mmap` — owned memory mapping, unmapped on drop.
//!
//! The ring handle keeps one `Mmap` per kernel region so that a setup
//! step failing halfway releases every region mapped before it.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

use nix::errno::Errno;

pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

// Safety: the mapping is plain memory owned by this value; synchronisation
// of its contents is the job of the ring views built on top of it.
unsafe impl Send for Mmap {}

impl Mmap {
    /// Map `len` bytes of a kernel-provided region of `fd` at `offset`,
    /// shared and pre-faulted.
    pub fn shared(fd: BorrowedFd<'_>, len: usize, offset: libc::off_t) -> nix::Result<Self> {
        Self::map(
            len,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd.as_raw_fd(),
            offset,
        )
    }

    /// Map `len` zeroed bytes of private anonymous memory.
    pub fn anonymous(len: usize) -> nix::Result<Self> {
        Self::map(len, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1, 0)
    }

    fn map(len: usize, flags: libc::c_int, fd: libc::c_int, offset: libc::off_t) -> nix::Result<Self> {
        if len == 0 {
            return Err(Errno::EINVAL);
        }
        // Safety: a fresh mapping at a kernel-chosen address aliases nothing.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                offset,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or(Errno::EINVAL)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}
