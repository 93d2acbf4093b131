/*
 * The MIT License
 * Copyright (c) 2022 Guillem Castro
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
 * THE SOFTWARE.
 */

//! Raw btrfs/block-device ioctl bindings.
//!
//! Kept separate from `drivers::btrfs`/`drivers::lvm` the way `syscall.rs`
//! keeps raw kernel interfaces separate from driver/runtime logic in the
//! teacher crate. Struct layouts and ioctl numbers are taken directly from
//! `linux/btrfs.h` as pinned down in the spec.

use std::os::unix::io::RawFd;

use color_eyre::eyre::Result;
use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

pub const BTRFS_SUBVOL_NAME_MAX: usize = 4039;
pub const BTRFS_PATH_NAME_MAX: usize = 4087;

const BTRFS_IOCTL_MAGIC: u8 = 0x94;

#[repr(C)]
struct BtrfsIoctlSpaceInfo {
    flags: u64,
    total_bytes: u64,
    used_bytes: u64,
}

#[repr(C)]
struct BtrfsIoctlSpaceArgs {
    space_slots: u64,
    total_spaces: u64,
    // Flexible array member (`spaces[0]` in C); zero-length so the
    // fixed-size struct alone is enough for the probe ioctl, which only
    // asks the kernel how many slots exist.
    spaces: [BtrfsIoctlSpaceInfo; 0],
}

#[repr(C)]
struct BtrfsIoctlVolArgs {
    fd: i64,
    name: [u8; BTRFS_PATH_NAME_MAX + 1],
}

#[repr(C)]
union BtrfsIoctlVolArgsV2Union {
    size: u64,
    unused: [u64; 4],
}

#[repr(C)]
struct BtrfsIoctlVolArgsV2 {
    fd: i64,
    transid: u64,
    flags: u64,
    payload: BtrfsIoctlVolArgsV2Union,
    name: [u8; BTRFS_SUBVOL_NAME_MAX + 1],
}

// BTRFS_IOC_SPACE_INFO = _IOWR(0x94, 20, struct btrfs_ioctl_space_args)
ioctl_readwrite!(btrfs_ioc_space_info, BTRFS_IOCTL_MAGIC, 20, BtrfsIoctlSpaceArgs);
// BTRFS_IOC_SUBVOL_CREATE = _IOW(0x94, 14, struct btrfs_ioctl_vol_args)
ioctl_write_ptr!(btrfs_ioc_subvol_create, BTRFS_IOCTL_MAGIC, 14, BtrfsIoctlVolArgs);
// BTRFS_IOC_SNAP_CREATE_V2 = _IOW(0x94, 23, struct btrfs_ioctl_vol_args_v2)
ioctl_write_ptr!(btrfs_ioc_snap_create_v2, BTRFS_IOCTL_MAGIC, 23, BtrfsIoctlVolArgsV2);
// BLKGETSIZE64 = _IOR(0x12, 114, size_t)
ioctl_read!(blkgetsize64, 0x12, 114, u64);

fn name_buf<const N: usize>(name: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = name.as_bytes();
    let len = bytes.len().min(N - 1);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

/// `BTRFS_IOC_SPACE_INFO` probe used by driver detection: succeeds only on
/// a btrfs filesystem.
pub fn probe_space_info(fd: RawFd) -> Result<()> {
    let mut args = BtrfsIoctlSpaceArgs {
        space_slots: 0,
        total_spaces: 0,
        spaces: [],
    };
    unsafe { btrfs_ioc_space_info(fd, &mut args as *mut _) }?;
    Ok(())
}

/// Create a new subvolume named `name` inside the directory referenced by
/// `parent_dir_fd`. This is `BTRFS_IOC_SUBVOL_CREATE` issued on the
/// parent's fd, as described in the spec; unlike the original C
/// implementation this never writes a diagnostic record anywhere.
pub fn subvolume_create(parent_dir_fd: RawFd, name: &str) -> Result<()> {
    let mut args = BtrfsIoctlVolArgs {
        fd: 0,
        name: name_buf(name),
    };
    unsafe { btrfs_ioc_subvol_create(parent_dir_fd, &mut args as *mut _) }?;
    Ok(())
}

/// Create a read-write snapshot of `origin_fd` named `name` inside the
/// directory referenced by `parent_dir_fd` (`BTRFS_IOC_SNAP_CREATE_V2`).
pub fn snapshot_create(parent_dir_fd: RawFd, origin_fd: RawFd, name: &str) -> Result<()> {
    let mut args = BtrfsIoctlVolArgsV2 {
        fd: origin_fd as i64,
        transid: 0,
        flags: 0,
        payload: BtrfsIoctlVolArgsV2Union { unused: [0; 4] },
        name: name_buf(name),
    };
    unsafe { btrfs_ioc_snap_create_v2(parent_dir_fd, &mut args as *mut _) }?;
    Ok(())
}

/// `BLKGETSIZE64`: the 64-bit byte size of the block device open on `fd`.
pub fn block_get_size64(fd: RawFd) -> Result<u64> {
    let mut size: u64 = 0;
    unsafe { blkgetsize64(fd, &mut size as *mut _) }?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_buf_is_null_terminated_and_truncates_safely() {
        let buf: [u8; 8] = name_buf("toolongname");
        assert_eq!(&buf, b"toolong\0");
    }

    #[test]
    fn name_buf_pads_short_names_with_zero() {
        let buf: [u8; 8] = name_buf("ab");
        assert_eq!(&buf, b"ab\0\0\0\0\0\0");
    }
}
