// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Launching external tools.
//!
//! Back-ends only ever produce an [`Invocation`]; something implementing
//! [`ProcessRunner`] turns that into a process. [`SystemRunner`] is the real
//! one. Tests use a fake that records what it was asked to run.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::BackendKind;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("could not start {}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {} while waiting for it", program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("the {backend} backend needs memory images, but none were prepared")]
    MissingArtifacts { backend: BackendKind },
}

/// A program and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Appends `prefix` immediately followed by `path`, as a single
    /// argument.
    pub fn arg_path(&mut self, prefix: &str, path: &Path) -> &mut Self {
        let mut arg = OsString::from(prefix);
        arg.push(path);
        self.args.push(arg);
        self
    }

    /// Arguments as strings, for logging and tests.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// How a child process ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own with this status code.
    Exited(i32),
    /// Killed by this signal.
    Signaled(i32),
    /// We killed it because the run was cancelled.
    Cancelled,
}

impl Termination {
    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }

    /// The status a shell would report for this termination.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Termination::Exited(code) => code,
            Termination::Signaled(signal) => 128 + signal,
            Termination::Cancelled => 130,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Exited(code) => write!(f, "exited with status {code}"),
            Termination::Signaled(signal) => write!(f, "was killed by signal {signal}"),
            Termination::Cancelled => f.write_str("was cancelled"),
        }
    }
}

impl From<ExitStatus> for Termination {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Termination::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }
        Termination::Exited(1)
    }
}

/// Shared flag that asks a running child to be killed.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait ProcessRunner {
    /// Runs `invocation` to completion, blocking until the child is gone.
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
    ) -> Result<Termination, LaunchError>;
}

/// Runs tools as real child processes with inherited stdio.
///
/// There is no timeout: a simulation can take the better part of an hour.
#[derive(Clone, Debug)]
pub struct SystemRunner {
    poll_interval: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        SystemRunner {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancelToken,
    ) -> Result<Termination, LaunchError> {
        if cancel.is_cancelled() {
            return Ok(Termination::Cancelled);
        }

        let program = &invocation.program;
        let mut child = Command::new(program)
            .args(&invocation.args)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;
        let wait_error = |source| LaunchError::Wait {
            program: program.clone(),
            source,
        };

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.into()),
                Ok(None) => (),
                Err(e) => {
                    // Don't leave it running behind us
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(wait_error(e));
                }
            }

            if cancel.is_cancelled() {
                log::warn!("cancelled; killing {}", program.display());
                // This fails only if the child has already exited, in which
                // case `wait` reaps it all the same.
                let _ = child.kill();
                child.wait().map_err(wait_error)?;
                return Ok(Termination::Cancelled);
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

/// Records invocations instead of running them.
#[cfg(test)]
pub(crate) struct FakeRunner {
    outcome: Option<Termination>,
    calls: std::cell::RefCell<Vec<Invocation>>,
}

#[cfg(test)]
impl FakeRunner {
    pub(crate) fn exiting(code: i32) -> Self {
        Self::with(Some(Termination::Exited(code)))
    }

    /// Behaves as if the program did not exist.
    pub(crate) fn unlaunchable() -> Self {
        Self::with(None)
    }

    pub(crate) fn with(outcome: Option<Termination>) -> Self {
        FakeRunner {
            outcome,
            calls: Default::default(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }
}

#[cfg(test)]
impl ProcessRunner for FakeRunner {
    fn run(
        &self,
        invocation: &Invocation,
        _cancel: &CancelToken,
    ) -> Result<Termination, LaunchError> {
        self.calls.borrow_mut().push(invocation.clone());
        self.outcome.ok_or_else(|| LaunchError::Spawn {
            program: invocation.program.clone(),
            source: std::io::ErrorKind::NotFound.into(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Invocation {
        let mut inv = Invocation::new("/bin/sh");
        inv.arg("-c").arg(script);
        inv
    }

    #[test]
    fn propagates_exit_status() {
        let runner = SystemRunner::default();
        let cancel = CancelToken::new();
        assert_eq!(
            runner.run(&sh("exit 0"), &cancel).unwrap(),
            Termination::Exited(0)
        );
        assert_eq!(
            runner.run(&sh("exit 42"), &cancel).unwrap(),
            Termination::Exited(42)
        );
    }

    #[test]
    fn distinguishes_signals() {
        let t = SystemRunner::default()
            .run(&sh("kill -9 $$"), &CancelToken::new())
            .unwrap();
        assert_eq!(t, Termination::Signaled(9));
        assert_eq!(t.exit_code(), 137);
    }

    #[test]
    fn missing_program_fails_to_launch() {
        let err = SystemRunner::default()
            .run(
                &Invocation::new("/nonexistent/Vchip_sim_tb"),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/Vchip_sim_tb"));
    }

    #[test]
    fn non_executable_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loader.py");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        let err = SystemRunner::default()
            .run(&Invocation::new(&path), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn cancellation_kills_the_child() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let start = Instant::now();
        let res = SystemRunner::default()
            .run(&sh("sleep 30"), &cancel)
            .unwrap();
        t.join().unwrap();
        assert_eq!(res, Termination::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn already_cancelled_never_starts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let res = SystemRunner::default()
            .run(&Invocation::new("/nonexistent/qemu"), &cancel)
            .unwrap();
        assert_eq!(res, Termination::Cancelled);
    }

    #[test]
    fn renders_command_lines() {
        let mut inv = Invocation::new("/ot/Vchip_sim_tb");
        inv.arg_path("--meminit=flash,", Path::new("out/kernel.64.vmem"));
        assert_eq!(
            inv.to_string(),
            "/ot/Vchip_sim_tb --meminit=flash,out/kernel.64.vmem"
        );
    }
}
