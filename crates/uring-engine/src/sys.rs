//! Raw io_uring kernel ABI.
//!
//! Mirrors the structs from `<linux/io_uring.h>` that cross the
//! user/kernel boundary. Layouts are fixed by the kernel; the ring
//! offsets inside the mapped regions are NOT, and must always be taken
//! from the `io_uring_params` the kernel fills in at setup time.
//!
//! Opcode numbers come from the `io-uring` crate so they track the
//! kernel headers it is generated from.

use std::os::fd::RawFd;

use nix::errno::Errno;

// ── mmap offsets ──

pub const IORING_OFF_SQ_RING: libc::off_t = 0;
pub const IORING_OFF_CQ_RING: libc::off_t = 0x0800_0000;
pub const IORING_OFF_SQES: libc::off_t = 0x1000_0000;

// ── io_uring_params.features ──

/// SQ and CQ rings can be mapped with a single mmap (kernel >= 5.4).
pub const IORING_FEAT_SINGLE_MMAP: u32 = 1 << 0;

// ── io_uring_enter flags ──

pub const IORING_ENTER_GETEVENTS: u32 = 1 << 0;

// ── Opcodes ──

pub mod op {
    use io_uring::opcode;

    pub const READ: u8 = opcode::Read::CODE;
    pub const WRITE: u8 = opcode::Write::CODE;
    pub const ACCEPT: u8 = opcode::Accept::CODE;
}

/// `struct io_sqring_offsets`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// `struct io_cqring_offsets`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct CqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// `struct io_uring_params` — in/out argument of `io_uring_setup(2)`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct IoUringParams {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: SqRingOffsets,
    pub cq_off: CqRingOffsets,
}

/// `struct io_uring_sqe` (64 bytes).
///
/// Unions are flattened to the member this engine uses:
/// `off` doubles as `addr2`, `op_flags` as `rw_flags`/`accept_flags`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sqe {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub addr3: u64,
    pub _pad2: u64,
}

/// `struct io_uring_cqe` (16 bytes).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

const _: () = assert!(std::mem::size_of::<SqRingOffsets>() == 40);
const _: () = assert!(std::mem::size_of::<CqRingOffsets>() == 40);
const _: () = assert!(std::mem::size_of::<IoUringParams>() == 120);
const _: () = assert!(std::mem::size_of::<Sqe>() == 64);
const _: () = assert!(std::mem::size_of::<Cqe>() == 16);

/// `io_uring_setup(2)`. Returns the ring fd; `params` is filled in by the kernel.
pub fn io_uring_setup(entries: u32, params: &mut IoUringParams) -> nix::Result<RawFd> {
    // Safety: params is a valid, exclusively borrowed io_uring_params.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_setup,
            entries as libc::c_long,
            params as *mut IoUringParams,
        )
    };
    Errno::result(ret).map(|fd| fd as RawFd)
}

/// `io_uring_enter(2)` without a signal mask.
///
/// Returns the number of SQEs the kernel consumed.
pub fn io_uring_enter(fd: RawFd, to_submit: u32, min_complete: u32, flags: u32) -> nix::Result<u32> {
    // Safety: no pointers are passed except a null sigset.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_io_uring_enter,
            fd as libc::c_long,
            to_submit as libc::c_long,
            min_complete as libc::c_long,
            flags as libc::c_long,
            std::ptr::null::<libc::sigset_t>(),
            0 as libc::size_t,
        )
    };
    Errno::result(ret).map(|n| n as u32)
}
