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

//! Per-kind driver implementations: directory bind mount, ZFS, LVM, btrfs
//! and overlayfs. Each driver is a unit struct implementing [`BdevDriver`];
//! the registry hands out `Box<dyn BdevDriver>` on demand rather than
//! storing the vtable on the data record (see `instance.rs`).

pub mod btrfs;
pub mod dir;
pub mod lvm;
pub mod overlayfs;
pub mod zfs;

pub use btrfs::BtrfsDriver;
pub use dir::DirDriver;
pub use lvm::LvmDriver;
pub use overlayfs::OverlayfsDriver;
pub use zfs::ZfsDriver;

use color_eyre::eyre::Result;

use crate::instance::{StorageInstance, StorageKind};
use crate::pathrewrite::CloneNames;

/// The operations every storage driver exposes (§4.2 of the spec): a pure
/// `detect` probe, `mount`/`umount`, and `clone_paths` to provision a new
/// endpoint derived from an origin.
pub trait BdevDriver {
    fn kind(&self) -> StorageKind;

    /// Pure probe: must not mutate anything and must tolerate nonexistent
    /// paths by returning `false`.
    fn detect(&self, source: &str) -> bool;

    fn mount(&self, instance: &StorageInstance) -> Result<()>;

    fn umount(&self, instance: &StorageInstance) -> Result<()>;

    /// Fill `new`'s `source`/`target`/`aux` and perform any side effects
    /// (volume creation, snapshot, mkfs, overlay delta dir) needed to make
    /// the new endpoint usable.
    fn clone_paths(
        &self,
        orig: &StorageInstance,
        new: &mut StorageInstance,
        names: &CloneNames,
        snapshot: bool,
        newsize: u64,
    ) -> Result<()>;
}

/// `<root>/<name>/rootfs`, the layout convention every driver falls back
/// to unless it explicitly preserves a custom source path.
pub(crate) fn default_rootfs_path(root: &str, name: &str) -> std::path::PathBuf {
    std::path::Path::new(root).join(name).join("rootfs")
}
