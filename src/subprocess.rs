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

//! Fork+exec+wait helper for the external tools the drivers shell out to
//! (`rsync`, `mkfs`, `lvcreate`, `zfs`). Replaces the repeated
//! fork/execlp/wait_for_pid blocks in the original C source with one
//! function; every caller still gets the same "subprocess exited nonzero
//! -> failure" semantics.

use std::ffi::CString;

use color_eyre::eyre::{self, Result};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, fork, ForkResult};

/// Run `program arg1 arg2 ...` as a direct child, wait for it, and turn a
/// nonzero exit (or a signal) into an error. PATH-resolved, matching the
/// `execlp`/`execvp` convention of the original drivers.
pub fn run(program: &str, args: &[&str]) -> Result<()> {
    log::debug!("running subprocess: {program} {}", args.join(" "));

    let prog_c = CString::new(program)?;
    let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
    argv.push(prog_c.clone());
    for a in args {
        argv.push(CString::new(*a)?);
    }

    // Safety: the child only calls async-signal-safe functions
    // (execvp) before either succeeding or exiting.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            let status = waitpid(child, None)?;
            match status {
                WaitStatus::Exited(_, 0) => Ok(()),
                WaitStatus::Exited(_, code) => Err(eyre::eyre!(
                    "{program} exited with status {code}"
                )),
                other => Err(eyre::eyre!("{program} did not exit cleanly: {other:?}")),
            }
        }
        ForkResult::Child => {
            let ret = execvp(&prog_c, &argv);
            // execvp only returns on failure.
            if let Err(e) = ret {
                log::error!("failed to exec {program}: {e}");
            }
            std::process::exit(127);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_returns_ok() {
        run("true", &[]).unwrap();
    }

    #[test]
    fn failing_command_is_reported() {
        let err = run("false", &[]).unwrap_err();
        assert!(err.to_string().contains("false"));
    }

    #[test]
    fn nonexistent_program_is_reported() {
        assert!(run("this-program-does-not-exist-xyz", &[]).is_err());
    }
}
