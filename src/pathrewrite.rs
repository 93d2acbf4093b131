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

/// Names and roots used to derive a clone's source/target from an
/// origin's, used by every driver's `clone_paths`.
#[derive(Debug, Clone)]
pub struct CloneNames<'a> {
    pub oldname: &'a str,
    pub newname: &'a str,
    pub oldroot: &'a str,
    pub newroot: &'a str,
}

/// Substitute `oldroot` -> `newroot` as a prefix of `src`, then replace
/// every non-overlapping occurrence of `oldname` with `newname` in the
/// remainder.
///
/// This is the Rust translation of `dir_new_path` in the original source:
/// there it hand-rolls the allocation size and copies byte ranges; here
/// `String::replace` already gives exact, non-overlapping, left-to-right
/// substitution, so the function reduces to prefix-swap + replace.
pub fn rewrite(src: &str, names: &CloneNames) -> String {
    match src.strip_prefix(names.oldroot) {
        Some(rest) => format!("{}{}", names.newroot, rest.replace(names.oldname, names.newname)),
        None => src.replace(names.oldname, names.newname),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_prefix_and_name() {
        let names = CloneNames {
            oldname: "c1",
            newname: "c2",
            oldroot: "/var/lib/lxc",
            newroot: "/var/lib/lxc",
        };
        let out = rewrite("/var/lib/lxc/c1/rootfs", &names);
        assert_eq!(out, "/var/lib/lxc/c2/rootfs");
    }

    #[test]
    fn rewrites_root_when_moved_to_new_storage() {
        let names = CloneNames {
            oldname: "c1",
            newname: "c2",
            oldroot: "/var/lib/lxc",
            newroot: "/srv/lxc",
        };
        let out = rewrite("/var/lib/lxc/c1/rootfs", &names);
        assert_eq!(out, "/srv/lxc/c2/rootfs");
    }

    #[test]
    fn leaves_unrelated_paths_untouched_in_root() {
        let names = CloneNames {
            oldname: "c1",
            newname: "c2",
            oldroot: "/var/lib/lxc",
            newroot: "/var/lib/lxc",
        };
        // source outside oldroot: prefix swap doesn't apply, but name
        // substitution still runs over the whole string.
        let out = rewrite("/mnt/images/c1-base", &names);
        assert_eq!(out, "/mnt/images/c2-base");
    }

    #[test]
    fn newroot_is_exempt_from_name_substitution() {
        // oldname also occurs inside newroot itself; only the tail after
        // the prefix swap is a substitution target, matching dir_new_path
        // advancing past oldpath before scanning for oldname.
        let names = CloneNames {
            oldname: "c1",
            newname: "X",
            oldroot: "/pool",
            newroot: "/pool-c1-store",
        };
        let out = rewrite("/pool/c1/rootfs", &names);
        assert_eq!(out, "/pool-c1-store/X/rootfs");
    }

    #[test]
    fn replaces_every_non_overlapping_occurrence() {
        let names = CloneNames {
            oldname: "c1",
            newname: "cc",
            oldroot: "",
            newroot: "",
        };
        let out = rewrite("/c1/c1/c1", &names);
        assert_eq!(out, "/cc/cc/cc");
    }

    #[test]
    fn length_matches_the_law_in_spec() {
        // |out| == |src| + (|newroot|-|oldroot|) + k*(|newname|-|oldname|)
        let src = "/var/lib/lxc/c1/rootfs/c1extra";
        let names = CloneNames {
            oldname: "c1",
            newname: "container-two",
            oldroot: "/var/lib/lxc",
            newroot: "/data/containers",
        };
        let out = rewrite(src, &names);
        let k = 2; // "c1" appears twice in the tail after the root swap
        let expected_len = src.len() as isize
            + (names.newroot.len() as isize - names.oldroot.len() as isize)
            + k * (names.newname.len() as isize - names.oldname.len() as isize);
        assert_eq!(out.len() as isize, expected_len);
    }
}
