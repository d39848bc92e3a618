// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use memimage::ArtifactPaths;

use crate::backend::BackendKind;
use crate::config::{locate, ConfigError, Env, Layout, Params};
use crate::process::Invocation;

/// A CW310 board, programmed over USB by the OpenTitan loader.
///
/// This is the only back-end that changes physical state, so everything it
/// needs must resolve before anything is transformed or launched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FpgaConfig {
    pub loader: PathBuf,
    pub app: Option<PathBuf>,
}

impl FpgaConfig {
    pub fn resolve(
        env: &Env,
        params: &Params,
        layout: &Layout,
    ) -> Result<Self, ConfigError> {
        let tree = env.opentitan_tree();
        let root = ("opentitan-tree", tree.as_deref());
        Ok(FpgaConfig {
            loader: locate(BackendKind::Fpga, "loader", None, root, &layout.fpga.loader)?,
            app: params.app(env),
        })
    }

    /// The loader takes the flat binary, with any application already
    /// merged in.
    pub fn command(&self, images: &ArtifactPaths) -> Invocation {
        let mut cmd = Invocation::new(&self.loader);
        cmd.arg("--firmware").arg(&images.flat);
        cmd
    }
}
