// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deciding which back-end to run and where its inputs live.
//!
//! Everything here is a pure function of three values captured at the start
//! of a run: an [`Env`] snapshot, the invocation [`Params`] and the
//! [`Layout`] of the external trees.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::{
    emulator::EmulatorConfig, fpga::FpgaConfig, simulator::SimulatorConfig,
    BackendConfig, BackendKind,
};

/// Selects the Verilator simulator when set to `yes`, `true` or `1`, in any
/// case.
pub const SIMULATION_VAR: &str = "VERILATOR";
/// Root of an OpenTitan checkout with simulator and FPGA tooling built.
pub const OPENTITAN_TREE_VAR: &str = "OPENTITAN_TREE";
/// Application bundle to run alongside the kernel.
pub const APP_VAR: &str = "APP";

const CAPTURED_VARS: [&str; 3] = [SIMULATION_VAR, OPENTITAN_TREE_VAR, APP_VAR];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the {backend} backend requires `{field}`, which is not set")]
    MissingConfig {
        backend: BackendKind,
        field: &'static str,
    },

    #[error("could not read layout file {}", path.display())]
    LayoutRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid layout file {}", path.display())]
    Layout {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The environment variables we care about, read once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, OsString>,
}

impl Env {
    pub fn capture() -> Self {
        Self::from_vars(
            CAPTURED_VARS
                .iter()
                .filter_map(|&k| std::env::var_os(k).map(|v| (k, v))),
        )
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        Env {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns a variable's value, treating empty as unset.
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .get(key)
            .map(OsString::as_os_str)
            .filter(|v| !v.is_empty())
    }

    pub fn simulation_mode(&self) -> bool {
        self.get(SIMULATION_VAR)
            .and_then(OsStr::to_str)
            .map(|v| {
                ["yes", "true", "1"]
                    .iter()
                    .any(|flag| v.trim().eq_ignore_ascii_case(flag))
            })
            .unwrap_or(false)
    }

    pub fn opentitan_tree(&self) -> Option<PathBuf> {
        self.get(OPENTITAN_TREE_VAR).map(PathBuf::from)
    }

    pub fn app(&self) -> Option<PathBuf> {
        self.get(APP_VAR).map(PathBuf::from)
    }
}

/// What the caller asked for on this invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params {
    /// Kernel ELF.
    pub image: PathBuf,
    /// Application bundle; takes precedence over `$APP`.
    pub app: Option<PathBuf>,
    /// Tock checkout containing the emulator and its boot ROM.
    pub tock_root: Option<PathBuf>,
    /// Overrides the simulator boot ROM image.
    pub rom: Option<PathBuf>,
    /// Overrides the simulator OTP image.
    pub otp: Option<PathBuf>,
}

impl Params {
    pub(crate) fn app(&self, env: &Env) -> Option<PathBuf> {
        non_empty(self.app.as_deref())
            .map(Path::to_path_buf)
            .or_else(|| env.app())
    }
}

/// Where tools and auxiliary images live inside the external trees.
///
/// These are conventions of the OpenTitan and Tock build outputs, not
/// something we go looking for. Each can be overridden from a TOML file;
/// setting an entry to the empty string removes it, which turns into a
/// `MissingConfig` error for any back-end that needs it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Layout {
    pub simulator: SimulatorLayout,
    pub fpga: FpgaLayout,
    pub emulator: EmulatorLayout,
    pub image: ImageLayout,
}

/// Paths relative to `$OPENTITAN_TREE`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct SimulatorLayout {
    pub executable: PathBuf,
    pub rom: PathBuf,
    pub otp: PathBuf,
}

impl Default for SimulatorLayout {
    fn default() -> Self {
        SimulatorLayout {
            executable: "build/lowrisc_dv_chip_verilator_sim_0.1/sim-verilator/Vchip_sim_tb".into(),
            rom: "build-bin/sw/device/lib/testing/test_rom/test_rom_sim_verilator.scr.39.vmem".into(),
            otp: "build-bin/sw/device/otp_img/otp_img_sim_verilator.vmem".into(),
        }
    }
}

/// Paths relative to `$OPENTITAN_TREE`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct FpgaLayout {
    pub loader: PathBuf,
}

impl Default for FpgaLayout {
    fn default() -> Self {
        FpgaLayout {
            loader: "util/fpga/cw310_loader.py".into(),
        }
    }
}

/// Paths relative to the Tock checkout.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct EmulatorLayout {
    pub executable: PathBuf,
    pub boot_rom: PathBuf,
    pub machine: String,
    /// Where QEMU's generic loader places the application.
    pub app_address: u32,
}

impl Default for EmulatorLayout {
    fn default() -> Self {
        EmulatorLayout {
            executable: "tools/qemu/build/qemu-system-riscv32".into(),
            boot_rom: "tools/qemu-runner/opentitan-boot-rom.elf".into(),
            machine: "opentitan".into(),
            app_address: 0x2003_0000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ImageLayout {
    /// Kernel section that receives the application on hardware back-ends.
    pub overlay_section: String,
}

impl Default for ImageLayout {
    fn default() -> Self {
        ImageLayout {
            overlay_section: memimage::overlay::DEFAULT_OVERLAY_SECTION.into(),
        }
    }
}

impl Layout {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::LayoutRead {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Layout {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Picks a back-end. The simulation flag wins; an OpenTitan tree without it
/// means real hardware; anything else runs in the emulator.
pub fn select(env: &Env) -> BackendKind {
    if env.simulation_mode() {
        BackendKind::Simulator
    } else if env.opentitan_tree().is_some() {
        BackendKind::Fpga
    } else {
        BackendKind::Emulator
    }
}

/// Selects a back-end and gathers everything it needs, failing on the first
/// missing value.
pub fn resolve(
    env: &Env,
    params: &Params,
    layout: &Layout,
) -> Result<BackendConfig, ConfigError> {
    let kind = select(env);
    if non_empty(Some(&params.image)).is_none() {
        return Err(ConfigError::MissingConfig {
            backend: kind,
            field: "image",
        });
    }

    let config = match kind {
        BackendKind::Simulator => {
            BackendConfig::Simulator(SimulatorConfig::resolve(env, params, layout)?)
        }
        BackendKind::Fpga => {
            BackendConfig::Fpga(FpgaConfig::resolve(env, params, layout)?)
        }
        BackendKind::Emulator => {
            BackendConfig::Emulator(EmulatorConfig::resolve(env, params, layout)?)
        }
    };
    log::debug!("resolved {config:?}");
    Ok(config)
}

pub(crate) fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Resolves one required path: an explicit override if there is one,
/// otherwise `sub` under the root directory. `root` pairs the name reported
/// when the root is absent with its value.
pub(crate) fn locate(
    backend: BackendKind,
    field: &'static str,
    explicit: Option<&Path>,
    root: (&'static str, Option<&Path>),
    sub: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = non_empty(explicit) {
        return Ok(path.to_path_buf());
    }
    if non_empty(Some(sub)).is_none() {
        return Err(ConfigError::MissingConfig { backend, field });
    }
    let (root_field, root) = root;
    match non_empty(root) {
        Some(root) => Ok(root.join(sub)),
        None => Err(ConfigError::MissingConfig {
            backend,
            field: root_field,
        }),
    }
}
