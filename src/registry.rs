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

//! Driver registry: name -> driver table, detect-by-probing, constructors.
//!
//! The C source keeps a static array of `{name, ops}` pairs and walks it
//! both for exact lookup (`bdev_get`) and for probing (`bdev_init`). The
//! table itself never changes at runtime, so it is modeled here as a
//! `match` over [`StorageKind`] rather than a literal array of trait
//! objects: the compiler enforces exhaustiveness, which is the typed
//! equivalent of the C table never being mutated after static init.

use color_eyre::eyre::{self, Result};

use crate::drivers::{BdevDriver, DirDriver, LvmDriver, OverlayfsDriver, ZfsDriver};
use crate::drivers::btrfs::BtrfsDriver;
use crate::instance::{StorageInstance, StorageKind};

/// Resolve the driver implementation for a given kind. This is the only
/// place that knows about all five concrete driver types.
pub fn driver_for(kind: StorageKind) -> Box<dyn BdevDriver> {
    match kind {
        StorageKind::Dir => Box::new(DirDriver),
        StorageKind::Zfs => Box::new(ZfsDriver),
        StorageKind::Lvm => Box::new(LvmDriver),
        StorageKind::Btrfs => Box::new(BtrfsDriver),
        StorageKind::Overlayfs => Box::new(OverlayfsDriver),
    }
}

/// Blank record of the named kind. No I/O performed.
pub fn construct_by_kind(kind: StorageKind) -> StorageInstance {
    StorageInstance::new(kind)
}

/// Probe `source` against every driver's `detect` in [`StorageKind::PROBE_ORDER`]
/// and adopt the first match. Returns `Ok(None)` (rather than an error) when
/// nothing matches, mirroring `bdev_init`'s `NULL` return for "not found" as
/// opposed to a hard failure.
pub fn construct_by_probe(source: &str) -> Result<Option<StorageInstance>> {
    for kind in StorageKind::PROBE_ORDER {
        let driver = driver_for(kind);
        if driver.detect(source) {
            let mut instance = StorageInstance::new(kind);
            instance.source = Some(source.to_string());
            return Ok(Some(instance));
        }
    }
    Ok(None)
}

/// Same as [`construct_by_probe`] but fails instead of returning `None`,
/// for callers (like the clone orchestrator) that can't proceed without a
/// match.
pub fn construct_by_probe_or_fail(source: &str) -> Result<StorageInstance> {
    construct_by_probe(source)?
        .ok_or_else(|| eyre::eyre!("failed to detect storage driver for '{source}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_plain_directory_as_dir() {
        let dir = tempfile_dir();
        let instance = construct_by_probe(dir.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(instance.kind, Some(StorageKind::Dir));
    }

    #[test]
    fn explicit_dir_prefix_wins_detection() {
        let instance = construct_by_probe("dir:/does/not/exist").unwrap().unwrap();
        assert_eq!(instance.kind, Some(StorageKind::Dir));
    }

    #[test]
    fn explicit_lvm_prefix_is_detected_before_dir() {
        let instance = construct_by_probe("lvm:/dev/lxc/c1").unwrap().unwrap();
        assert_eq!(instance.kind, Some(StorageKind::Lvm));
    }

    #[test]
    fn overlayfs_prefix_is_detected() {
        let instance = construct_by_probe("overlayfs:/a:/b").unwrap().unwrap();
        assert_eq!(instance.kind, Some(StorageKind::Overlayfs));
    }

    #[test]
    fn nonexistent_bare_path_matches_nothing() {
        let result = construct_by_probe("/this/path/does/not/exist/at/all").unwrap();
        assert!(result.is_none());
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lxc-bdev-registry-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
