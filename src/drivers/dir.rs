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

//! Plain directory backing store: a recursive bind mount of an existing
//! directory tree. The catch-all driver - probed last so more specific
//! kinds get a chance first.

use std::path::Path;

use color_eyre::eyre::{self, Result};
use sys_mount::{unmount, FilesystemType, Mount, MountFlags, UnmountFlags};

use super::{default_rootfs_path, BdevDriver};
use crate::instance::{StorageInstance, StorageKind};
use crate::pathrewrite::CloneNames;

pub struct DirDriver;

impl BdevDriver for DirDriver {
    fn kind(&self) -> StorageKind {
        StorageKind::Dir
    }

    fn detect(&self, source: &str) -> bool {
        source.starts_with("dir:") || Path::new(source).is_dir()
    }

    fn mount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Dir)?;
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
        instance.require_kind(StorageKind::Dir)?;
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
        if snapshot {
            return Err(eyre::eyre!(
                "directories cannot be snapshotted. Try overlayfs."
            ));
        }
        orig.require_complete()?;

        let rootfs = default_rootfs_path(names.newroot, names.newname);
        new.source = Some(rootfs.to_string_lossy().into_owned());
        new.target = Some(rootfs);
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
    fn clone_non_snapshot_derives_rootfs_path() {
        let driver = DirDriver;
        let mut orig = StorageInstance::new(StorageKind::Dir);
        orig.source = Some("/var/lib/lxc/c1/rootfs".to_string());
        orig.target = Some("/var/lib/lxc/c1/rootfs".into());

        let mut new = StorageInstance::new(StorageKind::Dir);
        driver.clone_paths(&orig, &mut new, &names(), false, 0).unwrap();

        assert_eq!(new.source.as_deref(), Some("/var/lib/lxc/c2/rootfs"));
        assert_eq!(new.target, Some("/var/lib/lxc/c2/rootfs".into()));
    }

    #[test]
    fn clone_snapshot_is_rejected() {
        let driver = DirDriver;
        let mut orig = StorageInstance::new(StorageKind::Dir);
        orig.source = Some("/var/lib/lxc/c1/rootfs".to_string());
        orig.target = Some("/var/lib/lxc/c1/rootfs".into());

        let mut new = StorageInstance::new(StorageKind::Dir);
        let err = driver
            .clone_paths(&orig, &mut new, &names(), true, 0)
            .unwrap_err();
        assert!(err.to_string().contains("snapshot"));
    }

    #[test]
    fn detect_matches_explicit_prefix_and_existing_directory() {
        let driver = DirDriver;
        assert!(driver.detect("dir:/no/such/path"));
        assert!(driver.detect("/tmp"));
        assert!(!driver.detect("/this/path/really/should/not/exist"));
    }

    #[test]
    fn mount_rejects_wrong_kind() {
        let driver = DirDriver;
        let instance = StorageInstance::new(StorageKind::Zfs);
        assert!(driver.mount(&instance).is_err());
    }
}
