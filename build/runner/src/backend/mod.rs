// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The three places an earlgrey kernel can run.
//!
//! Each back-end lives in its own module with its configuration type, the
//! code that resolves it, and the code that turns it into a command line.
//! [`BackendConfig`] ties them together; adding a back-end means adding a
//! variant and a module.

use std::fmt;
use std::path::{Path, PathBuf};

use memimage::ArtifactPaths;

use crate::process::{CancelToken, Invocation, LaunchError, ProcessRunner, Termination};

pub mod emulator;
pub mod fpga;
pub mod simulator;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Verilator model of the chip.
    Simulator,
    /// CW310 board, programmed through the OpenTitan loader.
    Fpga,
    /// QEMU's `opentitan` machine.
    Emulator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Simulator => "simulator",
            BackendKind::Fpga => "fpga",
            BackendKind::Emulator => "emulator",
        })
    }
}

/// A fully resolved back-end. Constructed by [`crate::config::resolve`],
/// which guarantees that every required path is present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    Simulator(simulator::SimulatorConfig),
    Fpga(fpga::FpgaConfig),
    Emulator(emulator::EmulatorConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Simulator(_) => BackendKind::Simulator,
            BackendConfig::Fpga(_) => BackendKind::Fpga,
            BackendConfig::Emulator(_) => BackendKind::Emulator,
        }
    }

    pub fn app(&self) -> Option<&Path> {
        match self {
            BackendConfig::Simulator(c) => c.app.as_deref(),
            BackendConfig::Fpga(c) => c.app.as_deref(),
            BackendConfig::Emulator(c) => c.app.as_deref(),
        }
    }

    /// Whether this back-end loads memory images rather than the ELF.
    pub fn requires_transform(&self) -> bool {
        match self {
            BackendConfig::Simulator(_) | BackendConfig::Fpga(_) => true,
            BackendConfig::Emulator(_) => false,
        }
    }

    /// The application to merge into the kernel before transformation. The
    /// emulator loads applications separately, so it never has one.
    pub fn overlay(&self) -> Option<&Path> {
        if self.requires_transform() {
            self.app()
        } else {
            None
        }
    }

    pub fn command(&self, artifacts: &Artifacts) -> Result<Invocation, LaunchError> {
        match self {
            BackendConfig::Simulator(c) => Ok(c.command(artifacts.memory(self.kind())?)),
            BackendConfig::Fpga(c) => Ok(c.command(artifacts.memory(self.kind())?)),
            BackendConfig::Emulator(c) => Ok(c.command(&artifacts.image)),
        }
    }
}

/// Files handed to a back-end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifacts {
    /// The kernel ELF exactly as it was given to us.
    pub image: PathBuf,
    /// Flat binary and VMEM image, when the back-end needs them.
    pub memory: Option<ArtifactPaths>,
}

impl Artifacts {
    fn memory(&self, backend: BackendKind) -> Result<&ArtifactPaths, LaunchError> {
        self.memory
            .as_ref()
            .ok_or(LaunchError::MissingArtifacts { backend })
    }
}

/// How a back-end run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationResult {
    pub backend: BackendKind,
    pub command: Invocation,
    pub termination: Termination,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        self.termination.success()
    }
}

/// Runs the back-end to completion. A tool that starts and then fails is a
/// normal result; only failing to start it is an error.
pub fn invoke(
    config: &BackendConfig,
    artifacts: &Artifacts,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> Result<InvocationResult, LaunchError> {
    let command = config.command(artifacts)?;
    log::info!("{}: running {command}", config.kind());

    let termination = runner.run(&command, cancel)?;
    match termination {
        Termination::Exited(0) => log::info!("{} finished", config.kind()),
        t => log::warn!("{} {t}", config.kind()),
    }

    Ok(InvocationResult {
        backend: config.kind(),
        command,
        termination,
    })
}
