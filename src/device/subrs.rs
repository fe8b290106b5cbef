//! Random device subroutines
//!
//! Based on Mach4 device/subrs.c

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::config::checked_round_page;
use crate::device::io_req::{IoOp, IoRequest, IoReturn};
use crate::types::DeviceId;

/// Longest message [`harderr`] will build
pub const HARDERR_MAX: usize = 64;

/// Unit, partition and record part of a report: the longest `u32` unit
/// plus the longest `u64` record number still fits.
type HarderrTail = heapless::String<48>;

/// Report a hard error on a disk request.
///
/// Units encode drive and partition: `unit >> 3` is the drive and the low
/// three bits pick partition `a`..`h`. The full report is logged; the
/// returned copy keeps the whole tail and cuts the driver name to fit.
pub fn harderr(ior: &IoRequest, name: &str) -> heapless::String<HARDERR_MAX> {
    let part = char::from(b'a' + (ior.unit & 7) as u8);
    let mut tail = HarderrTail::new();
    // Cannot overflow: 10 + 1 + 15 + 20 bytes at most.
    let _ = write!(tail, "{}{}: hard error sn{}", ior.unit >> 3, part, ior.recnum);
    log::error!("{}{}", name, tail);

    let mut room = HARDERR_MAX - tail.len();
    if name.len() < room {
        room = name.len();
    }
    while !name.is_char_boundary(room) {
        room -= 1;
    }

    let mut msg = heapless::String::new();
    let _ = msg.push_str(&name[..room]);
    let _ = msg.push_str(&tail);
    msg
}

/// Get a kernel buffer of `size` bytes wrapped in an internal request
pub fn geteblk(size: usize) -> Result<Arc<IoRequest>, IoReturn> {
    let alloc = checked_round_page(size).ok_or(IoReturn::NoMemory)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(alloc).map_err(|_| IoReturn::NoMemory)?;
    buf.resize(size, 0);

    let ior = IoRequest::read(DeviceId::NULL, 0, 0, size);
    ior.clear_op(IoOp::READ);
    ior.set_op(IoOp::INTERNAL);
    ior.with_data(|data| *data = buf);
    ior.set_alloc_size(alloc);
    Ok(Arc::new(ior))
}

/// Release a buffer obtained from [`geteblk`]
pub fn brelse(ior: Arc<IoRequest>) {
    drop(ior.take_data());
    ior.set_alloc_size(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn test_harderr_format() {
        let ior = IoRequest::read(DeviceId(3), 10, 1234, 512);
        assert_eq!(harderr(&ior, "hd").as_str(), "hd1c: hard error sn1234");

        let ior = IoRequest::read(DeviceId(3), 0, 0, 512);
        assert_eq!(harderr(&ior, "sd").as_str(), "sd0a: hard error sn0");
    }

    #[test]
    fn test_harderr_long_name_keeps_error_text() {
        let ior = IoRequest::read(DeviceId(3), 10, 1234, 512);
        for len in [40, 60, 100] {
            let name: alloc::string::String = core::iter::repeat('x').take(len).collect();
            let msg = harderr(&ior, &name);
            assert!(msg.len() <= HARDERR_MAX);
            assert!(msg.starts_with("xxxx"));
            assert!(msg.ends_with("1c: hard error sn1234"), "{}", msg);
        }
    }

    #[test]
    fn test_harderr_cuts_name_on_char_boundary() {
        let ior = IoRequest::read(DeviceId(3), u32::MAX, u64::MAX, 512);
        let name: alloc::string::String = core::iter::repeat('é').take(40).collect();
        let msg = harderr(&ior, &name);
        assert!(msg.len() <= HARDERR_MAX);
        assert!(msg.ends_with("536870911h: hard error sn18446744073709551615"), "{}", msg);
    }

    #[test]
    fn test_geteblk_huge_size_fails_cleanly() {
        assert_eq!(geteblk(usize::MAX - 10).err(), Some(IoReturn::NoMemory));
    }

    #[test]
    fn test_geteblk_brelse() {
        let ior = geteblk(1000).unwrap();
        assert!(ior.op().contains(IoOp::INTERNAL));
        assert!(!ior.op().is_read());
        assert_eq!(ior.count(), 1000);
        assert_eq!(ior.alloc_size(), PAGE_SIZE);
        assert!(ior.data().iter().all(|&b| b == 0));

        let held = Arc::clone(&ior);
        brelse(ior);
        assert_eq!(held.alloc_size(), 0);
        assert!(held.data().is_empty());
    }
}
