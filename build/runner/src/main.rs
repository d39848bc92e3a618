// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use board_runner::dispatch::{self, DispatchError};
use board_runner::{CancelToken, Env, Layout, Options, Params, SystemRunner};

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "runs earlgrey kernels on the simulator, an FPGA, or QEMU"
)]
struct Args {
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Picks a back-end from the environment, prepares the kernel for it and
    /// runs it. Exits with the back-end's status.
    Run {
        #[clap(flatten)]
        target: Target,
        /// Keep generated images in this directory rather than a temporary
        /// one. Stale images in it are removed first.
        #[clap(long)]
        scratch: Option<PathBuf>,
    },

    /// Writes the flat binary and VMEM image for a kernel without running
    /// anything.
    Convert {
        /// Kernel ELF.
        image: PathBuf,
        /// Application bundle to merge into the kernel.
        #[clap(long)]
        app: Option<PathBuf>,
        /// Directory for the generated images.
        #[clap(long)]
        out: PathBuf,
        /// Overrides for tool and image locations, in TOML.
        #[clap(long)]
        layout: Option<PathBuf>,
    },

    /// Prints the back-end that `run` would pick and the command it would
    /// launch.
    ShowConfig {
        #[clap(flatten)]
        target: Target,
    },
}

#[derive(Debug, clap::Args)]
struct Target {
    /// Kernel ELF.
    image: PathBuf,
    /// Application bundle; overrides $APP.
    #[clap(long)]
    app: Option<PathBuf>,
    /// Tock checkout containing the QEMU build and its boot ROM.
    #[clap(long, default_value = ".")]
    root: PathBuf,
    /// Overrides for tool and image locations, in TOML.
    #[clap(long)]
    layout: Option<PathBuf>,
    /// Simulator boot ROM image, instead of the one in $OPENTITAN_TREE.
    #[clap(long)]
    rom: Option<PathBuf>,
    /// Simulator OTP image, instead of the one in $OPENTITAN_TREE.
    #[clap(long)]
    otp: Option<PathBuf>,
}

impl Target {
    fn params(&self) -> Params {
        Params {
            image: self.image.clone(),
            app: self.app.clone(),
            tock_root: Some(self.root.clone()),
            rom: self.rom.clone(),
            otp: self.otp.clone(),
        }
    }
}

fn load_layout(path: Option<&Path>) -> Result<Layout, DispatchError> {
    match path {
        Some(path) => Ok(Layout::from_file(path)?),
        None => Ok(Layout::default()),
    }
}

fn run(args: Args) -> Result<i32> {
    match args.cmd {
        Cmd::Run { target, scratch } => {
            let options = Options {
                layout: load_layout(target.layout.as_deref())?,
                scratch,
            };

            let cancel = CancelToken::new();
            let handler = cancel.clone();
            ctrlc::set_handler(move || handler.cancel())
                .context("failed to install Ctrl-C handler")?;

            let result = dispatch::run(
                &Env::capture(),
                &target.params(),
                &options,
                &SystemRunner::default(),
                &cancel,
            )?;
            Ok(result.termination.exit_code())
        }
        Cmd::Convert {
            image,
            app,
            out,
            layout,
        } => {
            let layout = load_layout(layout.as_deref())?;
            let paths = dispatch::convert(&image, app.as_deref(), &layout, &out)?;
            println!("{}", paths.flat.display());
            println!("{}", paths.vmem.display());
            Ok(0)
        }
        Cmd::ShowConfig { target } => {
            let options = Options {
                layout: load_layout(target.layout.as_deref())?,
                scratch: None,
            };
            let (config, command) =
                dispatch::describe(&Env::capture(), &target.params(), &options)?;
            println!("backend: {}", config.kind());
            if let Some(app) = config.app() {
                println!("app:     {}", app.display());
            }
            println!("command: {command}");
            Ok(0)
        }
    }
}

fn main() {
    let env = env_logger::Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    let code = match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            e.downcast_ref::<DispatchError>()
                .map(DispatchError::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}
