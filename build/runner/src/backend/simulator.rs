// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use memimage::ArtifactPaths;

use crate::backend::BackendKind;
use crate::config::{locate, ConfigError, Env, Layout, Params};
use crate::process::Invocation;

/// The Verilator build of the earlgrey top level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub executable: PathBuf,
    /// Boot ROM memory image.
    pub rom: PathBuf,
    /// OTP memory image.
    pub otp: PathBuf,
    pub app: Option<PathBuf>,
}

impl SimulatorConfig {
    pub fn resolve(
        env: &Env,
        params: &Params,
        layout: &Layout,
    ) -> Result<Self, ConfigError> {
        const KIND: BackendKind = BackendKind::Simulator;
        let tree = env.opentitan_tree();
        let root = ("opentitan-tree", tree.as_deref());
        let sub = &layout.simulator;

        Ok(SimulatorConfig {
            executable: locate(KIND, "simulator", None, root, &sub.executable)?,
            rom: locate(KIND, "rom", params.rom.as_deref(), root, &sub.rom)?,
            otp: locate(KIND, "otp", params.otp.as_deref(), root, &sub.otp)?,
            app: params.app(env),
        })
    }

    /// Binds the three memories of the model to their images.
    pub fn command(&self, images: &ArtifactPaths) -> Invocation {
        let mut cmd = Invocation::new(&self.executable);
        cmd.arg_path("--meminit=rom,", &self.rom)
            .arg_path("--meminit=flash,", &images.vmem)
            .arg_path("--meminit=otp,", &self.otp);
        cmd
    }
}
