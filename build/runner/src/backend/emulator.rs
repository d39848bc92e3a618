// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::backend::BackendKind;
use crate::config::{locate, non_empty, ConfigError, Env, Layout, Params};
use crate::process::Invocation;

/// QEMU running the `opentitan` machine.
///
/// QEMU loads ELF files itself, so it gets the kernel untouched and the
/// application as a separate image rather than merged in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub executable: PathBuf,
    pub boot_rom: PathBuf,
    pub machine: String,
    pub app: Option<PathBuf>,
    pub app_address: u32,
}

impl EmulatorConfig {
    pub fn resolve(
        env: &Env,
        params: &Params,
        layout: &Layout,
    ) -> Result<Self, ConfigError> {
        const KIND: BackendKind = BackendKind::Emulator;
        let root = ("tock-root", params.tock_root.as_deref());
        let sub = &layout.emulator;
        if non_empty(root.1).is_none() {
            return Err(ConfigError::MissingConfig {
                backend: KIND,
                field: "tock-root",
            });
        }
        if sub.machine.is_empty() {
            return Err(ConfigError::MissingConfig {
                backend: KIND,
                field: "machine",
            });
        }

        Ok(EmulatorConfig {
            executable: locate(KIND, "emulator", None, root, &sub.executable)?,
            boot_rom: locate(KIND, "boot-rom", None, root, &sub.boot_rom)?,
            machine: sub.machine.clone(),
            app: params.app(env),
            app_address: sub.app_address,
        })
    }

    pub fn command(&self, image: &Path) -> Invocation {
        let mut cmd = Invocation::new(&self.executable);
        cmd.arg("-M")
            .arg(&self.machine)
            .arg("-bios")
            .arg(&self.boot_rom)
            .arg("-nographic")
            .arg("-serial")
            .arg("stdio")
            .arg("-monitor")
            .arg("none")
            .arg("-semihosting")
            .arg("-kernel")
            .arg(image);

        if let Some(app) = &self.app {
            let mut loader = OsString::from("loader,file=");
            loader.push(app);
            loader.push(format!(",addr={:#x}", self.app_address));
            cmd.arg("-device").arg(loader);
        }
        cmd
    }
}
