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

//! ZFS backing store: dataset create/clone/snapshot via the `zfs` CLI,
//! bind-mounted into place like the other drivers since lxc always asks
//! `zfs create`/`zfs clone` to set `-omountpoint=$lxcpath/$name/rootfs`
//! up front, so `mount` really only needs to bind it in.

use std::process::Command;

use color_eyre::eyre::{self, Result};
use sys_mount::{unmount, FilesystemType, Mount, MountFlags, UnmountFlags};

use super::{default_rootfs_path, BdevDriver};
use crate::instance::{StorageInstance, StorageKind};
use crate::pathrewrite::CloneNames;
use crate::subprocess;

const DEFAULT_ZPOOL: &str = "tank";

/// Run `zfs list` and return the first line whose text contains `path`.
fn zfs_list_entry(path: &str) -> Result<Option<String>> {
    let output = Command::new("zfs").arg("list").output()?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.lines().find(|line| line.contains(path)).map(String::from))
}

/// The zpool root for `opath`: the first whitespace-delimited field of its
/// `zfs list` line, with the trailing `/<component>` stripped. Falls back
/// to `tank` (lxc's historical default) if `opath` isn't in `zfs list` at
/// all yet.
fn zpool_root(opath: &str) -> Result<String> {
    let entry = zfs_list_entry(opath)?;
    let first_field = match entry {
        Some(line) => line
            .split_whitespace()
            .next()
            .map(String::from)
            .ok_or_else(|| eyre::eyre!("empty zfs list entry for {opath}"))?,
        None => DEFAULT_ZPOOL.to_string(),
    };
    match first_field.rfind('/') {
        Some(idx) => Ok(first_field[..idx].to_string()),
        None => Ok(first_field),
    }
}

fn zfs_clone(
    opath: &str,
    oname: &str,
    nname: &str,
    lxcpath: &str,
    snapshot: bool,
) -> Result<()> {
    let zpool = zpool_root(opath)?;
    let option = format!("-omountpoint={lxcpath}/{nname}/rootfs");

    if !snapshot {
        let dataset = format!("{zpool}/{nname}");
        subprocess::run("zfs", &["create", &option, &dataset])
    } else {
        let snap = format!("{zpool}/{oname}@{nname}");
        let dataset = format!("{zpool}/{nname}");
        // best-effort: a stale snapshot from a previous failed clone
        // attempt is expected to usually not exist.
        let _ = subprocess::run("zfs", &["destroy", &snap]);
        subprocess::run("zfs", &["snapshot", &snap])?;
        subprocess::run("zfs", &["clone", &option, &snap, &dataset])
    }
}

pub struct ZfsDriver;

impl BdevDriver for ZfsDriver {
    fn kind(&self) -> StorageKind {
        StorageKind::Zfs
    }

    fn detect(&self, source: &str) -> bool {
        matches!(zfs_list_entry(source), Ok(Some(_)))
    }

    fn mount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Zfs)?;
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
        instance.require_kind(StorageKind::Zfs)?;
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
        let (orig_src, _orig_dst) = orig.require_complete()?;

        if snapshot && orig.kind != Some(StorageKind::Zfs) {
            return Err(eyre::eyre!(
                "zfs snapshot from {} backing store is not supported",
                orig.kind.map(|k| k.as_str()).unwrap_or("<none>")
            ));
        }

        let rootfs = default_rootfs_path(names.newroot, names.newname);
        new.source = Some(rootfs.to_string_lossy().into_owned());
        new.target = Some(rootfs.clone());

        zfs_clone(orig_src, names.oldname, names.newname, names.newroot, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zpool_root_strips_trailing_component() {
        // simulate the "tank/lxc/c1  mounted  ..." line shape
        let line = "tank/lxc/c1  -  /var/lib/lxc/c1/rootfs";
        let first = line.split_whitespace().next().unwrap();
        let stripped = &first[..first.rfind('/').unwrap()];
        assert_eq!(stripped, "tank/lxc");
    }

    #[test]
    fn detect_rejects_when_zfs_binary_reports_no_match() {
        // On a machine without a `zfs` binary this also returns false
        // (the command fails to run), which is the desired fallback.
        let driver = ZfsDriver;
        assert!(!driver.detect("/this/is/surely/not/a/zfs/dataset/path"));
    }
}
