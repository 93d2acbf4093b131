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

//! btrfs backing store: subvolume create and snapshot via the raw
//! `BTRFS_IOC_*` ioctls (see `btrfs_ioctl.rs`), bind-mounted into place.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{self, Result};
use sys_mount::{unmount, FilesystemType, Mount, MountFlags, UnmountFlags};

use super::{default_rootfs_path, BdevDriver};
use crate::btrfs_ioctl;
use crate::instance::{StorageInstance, StorageKind};
use crate::pathrewrite::{self, CloneNames};

fn is_btrfs_subvolume(path: &str) -> bool {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    if btrfs_ioctl::probe_space_info(file.as_raw_fd()).is_err() {
        return false;
    }
    match fs::metadata(path) {
        Ok(meta) => {
            use std::os::unix::fs::MetadataExt;
            meta.is_dir() && meta.ino() == 256
        }
        Err(_) => false,
    }
}

/// Remove `path` if it exists and is an empty directory; the
/// `BTRFS_IOC_SUBVOL_CREATE`/`..._SNAP_CREATE_V2` ioctls refuse to create
/// into an already-existing directory, so callers must clear it first.
/// An absent directory is not an error.
fn rmdir_tolerating_missing(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn subvolume_create(target: &Path) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| eyre::eyre!("bad path: {}", target.display()))?;
    let name = target
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| eyre::eyre!("bad path: {}", target.display()))?;
    let parent_fd = fs::File::open(parent)?;
    btrfs_ioctl::subvolume_create(parent_fd.as_raw_fd(), name)
}

fn snapshot_create(origin: &Path, new: &Path) -> Result<()> {
    rmdir_tolerating_missing(new)?;
    let new_name = new
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| eyre::eyre!("bad path: {}", new.display()))?;
    let new_dir = new
        .parent()
        .ok_or_else(|| eyre::eyre!("bad path: {}", new.display()))?;
    let origin_fd = fs::File::open(origin)?;
    let new_dir_fd = fs::File::open(new_dir)?;
    btrfs_ioctl::snapshot_create(new_dir_fd.as_raw_fd(), origin_fd.as_raw_fd(), new_name)
}

pub struct BtrfsDriver;

impl BdevDriver for BtrfsDriver {
    fn kind(&self) -> StorageKind {
        StorageKind::Btrfs
    }

    fn detect(&self, source: &str) -> bool {
        is_btrfs_subvolume(source)
    }

    fn mount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Btrfs)?;
        let (src, dst) = instance.require_complete()?;
        Mount::new(
            src,
            dst,
            FilesystemType::from("bind"),
            MountFlags::BIND | MountFlags::REC,
            None,
        )?;
        Ok(())
    }

    fn umount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Btrfs)?;
        let (_src, dst) = instance.require_complete()?;
        unmount(dst, UnmountFlags::empty())?;
        Ok(())
    }

    fn clone_paths(
        &self,
        orig: &StorageInstance,
        new: &mut StorageInstance,
        names: &CloneNames,
        snapshot: bool,
        _newsize: u64,
    ) -> Result<()> {
        let (orig_src, orig_dst) = orig.require_complete()?;
        let orig_is_btrfs = orig.kind == Some(StorageKind::Btrfs);

        let new_target: PathBuf = if !orig_is_btrfs {
            if snapshot {
                return Err(eyre::eyre!(
                    "btrfs snapshot from {} backing store is not supported",
                    orig.kind.map(|k| k.as_str()).unwrap_or("<none>")
                ));
            }
            default_rootfs_path(names.newroot, names.newname)
        } else {
            PathBuf::from(pathrewrite::rewrite(orig_src, names))
        };

        if let Some(aux) = &orig.aux {
            new.aux = Some(aux.clone());
        }

        if snapshot {
            snapshot_create(Path::new(orig_dst), &new_target)?;
        } else {
            rmdir_tolerating_missing(&new_target)?;
            subvolume_create(&new_target)?;
        }

        new.source = Some(new_target.to_string_lossy().into_owned());
        new.target = Some(new_target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>() -> CloneNames<'a> {
        CloneNames {
            oldname: "c1",
            newname: "c2",
            oldroot: "/var/lib/lxc",
            newroot: "/var/lib/lxc",
        }
    }

    #[test]
    fn snapshot_from_non_btrfs_origin_is_rejected() {
        let driver = BtrfsDriver;
        let mut orig = StorageInstance::new(StorageKind::Dir);
        orig.source = Some("/var/lib/lxc/c1/rootfs".to_string());
        orig.target = Some("/var/lib/lxc/c1/rootfs".into());
        let mut new = StorageInstance::new(StorageKind::Btrfs);
        let err = driver
            .clone_paths(&orig, &mut new, &names(), true, 0)
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn detect_rejects_non_subvolume_paths() {
        let driver = BtrfsDriver;
        assert!(!driver.detect("/this/path/should/not/exist/anywhere"));
    }
}
