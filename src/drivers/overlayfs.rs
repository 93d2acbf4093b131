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

//! Overlayfs backing store: union-mount of a lower (read-only, the
//! original image) and an upper ("delta") directory. Source is encoded
//! as the compound string `overlayfs:LOWER:UPPER`. Only snapshot clones
//! are supported (§4.2.5): the delta directory is what makes the clone a
//! clone, so a non-snapshot "clone" wouldn't mean anything here.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{self, Result};
use sys_mount::{unmount, FilesystemType, Mount, MountFlags, UnmountFlags};

use super::BdevDriver;
use crate::instance::{StorageInstance, StorageKind};
use crate::pathrewrite::{self, CloneNames};
use crate::subprocess;

/// Split `overlayfs:LOWER:UPPER` into `(lower, upper)`.
fn parse_source(source: &str) -> Result<(&str, &str)> {
    let rest = source
        .strip_prefix("overlayfs:")
        .ok_or_else(|| eyre::eyre!("not an overlayfs source: {source}"))?;
    let (lower, upper) = rest
        .split_once(':')
        .ok_or_else(|| eyre::eyre!("malformed overlayfs source: {source}"))?;
    Ok((lower, upper))
}

pub struct OverlayfsDriver;

impl BdevDriver for OverlayfsDriver {
    fn kind(&self) -> StorageKind {
        StorageKind::Overlayfs
    }

    fn detect(&self, source: &str) -> bool {
        source.starts_with("overlayfs:")
    }

    fn mount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Overlayfs)?;
        let (src, dst) = instance.require_complete()?;
        let (lower, upper) = parse_source(src)?;
        let data = format!("upperdir={upper},lowerdir={lower}");
        // Original mounts with MS_MGC_VAL; that magic value is a no-op
        // left over from the pre-2.4 mount(2) ABI, so no flag is passed
        // here.
        Mount::new(
            lower,
            dst,
            FilesystemType::from("overlay"),
            MountFlags::empty(),
            Some(data.as_str()),
        )?;
        Ok(())
    }

    fn umount(&self, instance: &StorageInstance) -> Result<()> {
        instance.require_kind(StorageKind::Overlayfs)?;
        let (_src, dst) = instance.require_complete()?;
        // lazy-detach, mirroring the teacher's own OverlayDriver::umount.
        unmount(dst, UnmountFlags::DETACH)?;
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
        if !snapshot {
            return Err(eyre::eyre!("overlayfs is only for snapshot clones"));
        }
        let (orig_src, orig_dst) = orig.require_complete()?;

        let new_target = PathBuf::from(pathrewrite::rewrite(&orig_dst.to_string_lossy(), names));
        fs::create_dir_all(&new_target)?;

        let new_source = match orig.kind {
            Some(StorageKind::Dir) => {
                let delta = delta_path(&new_target)?;
                fs::create_dir(&delta)?;
                format!("overlayfs:{}:{}", orig_src, delta.display())
            }
            Some(StorageKind::Overlayfs) => {
                let (lower, old_delta) = parse_source(orig_src)?;
                let new_delta = pathrewrite::rewrite(old_delta, names);
                subprocess::run("rsync", &["-a", &format!("{old_delta}/"), &new_delta])?;
                format!("overlayfs:{lower}:{new_delta}")
            }
            Some(StorageKind::Lvm) => {
                return Err(eyre::eyre!(
                    "overlayfs clone of lvm container is not yet supported"
                ));
            }
            other => {
                return Err(eyre::eyre!(
                    "overlayfs clone of {} container is not supported",
                    other.map(|k| k.as_str()).unwrap_or("<none>")
                ));
            }
        };

        new.target = Some(new_target);
        new.source = Some(new_source);
        Ok(())
    }
}

/// If `new_target` is `.../rootfs`, the delta directory is its sibling
/// `.../delta0` - the last six characters (`rootfs`) are replaced
/// in-place, matching the original's `strcpy(&delta[strlen(delta)-6],
/// "delta0")`.
fn delta_path(new_target: &Path) -> Result<PathBuf> {
    let s = new_target.to_string_lossy();
    if s.len() < 6 {
        return Err(eyre::eyre!(
            "target path too short to derive a delta directory: {s}"
        ));
    }
    let mut out = s.into_owned();
    out.truncate(out.len() - 6);
    out.push_str("delta0");
    Ok(PathBuf::from(out))
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
    fn parses_compound_source() {
        let (lower, upper) = parse_source("overlayfs:/a/b:/c/d").unwrap();
        assert_eq!(lower, "/a/b");
        assert_eq!(upper, "/c/d");
    }

    #[test]
    fn delta_path_replaces_rootfs_suffix() {
        let delta = delta_path(Path::new("/var/lib/lxc/c2/rootfs")).unwrap();
        assert_eq!(delta, PathBuf::from("/var/lib/lxc/c2/delta0"));
    }

    #[test]
    fn non_snapshot_clone_is_rejected() {
        let driver = OverlayfsDriver;
        let mut orig = StorageInstance::new(StorageKind::Dir);
        orig.source = Some("/var/lib/lxc/c1/rootfs".to_string());
        orig.target = Some("/var/lib/lxc/c1/rootfs".into());
        let mut new = StorageInstance::new(StorageKind::Overlayfs);
        let err = driver
            .clone_paths(&orig, &mut new, &names(), false, 0)
            .unwrap_err();
        assert!(err.to_string().contains("snapshot"));
    }

    #[test]
    fn lvm_origin_is_unsupported() {
        let driver = OverlayfsDriver;
        let mut orig = StorageInstance::new(StorageKind::Lvm);
        orig.source = Some("/dev/lxc/c1".to_string());
        orig.target = Some("/var/lib/lxc/c1/rootfs".into());
        let mut new = StorageInstance::new(StorageKind::Overlayfs);
        let err = driver
            .clone_paths(&orig, &mut new, &names(), true, 0)
            .unwrap_err();
        assert!(err.to_string().contains("not yet supported"));
    }
}
