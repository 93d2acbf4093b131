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

//! Pluggable storage-driver layer for container root filesystems.
//!
//! A [`StorageInstance`](instance::StorageInstance) names a backing store
//! (plain directory, ZFS dataset, LVM logical volume, btrfs subvolume, or
//! overlayfs union mount) of some [`StorageKind`](instance::StorageKind).
//! The [`registry`] module detects a kind from an existing source path and
//! hands back the matching driver; drivers mount/unmount instances and
//! provision new ones from an origin (optionally as a COW snapshot). The
//! [`clone`] module orchestrates that whole pipeline, including the
//! isolated-mount-namespace bulk copy for non-snapshot clones.

pub mod btrfs_ioctl;
pub mod clone;
pub mod drivers;
pub mod fsprobe;
pub mod instance;
pub mod pathrewrite;
pub mod registry;
pub mod subprocess;

pub use clone::{clone_and_copy, CloneRequest};
pub use drivers::BdevDriver;
pub use instance::{StorageInstance, StorageKind};
pub use pathrewrite::CloneNames;
