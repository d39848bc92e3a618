// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use memimage::{ArtifactPaths, Image, Overlay, TransformError, Transformer};

use crate::backend::{self, Artifacts, BackendConfig, InvocationResult};
use crate::config::{self, ConfigError, Env, Layout, Params};
use crate::process::{CancelToken, Invocation, LaunchError, ProcessRunner};
use crate::scratch::{Scratch, ScratchError};

/// Exit statuses for failures that happen before a back-end runs. These
/// follow `sysexits.h`.
pub mod exit {
    pub const DATAERR: i32 = 65;
    pub const UNAVAILABLE: i32 = 69;
    pub const IOERR: i32 = 74;
    pub const CONFIG: i32 = 78;
}

/// A run that never got as far as a back-end result. The message names the
/// stage; the source names the cause.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("config-resolution failed")]
    Config(#[from] ConfigError),

    #[error("transform failed")]
    Transform(#[from] TransformError),

    #[error("scratch directory setup failed")]
    Scratch(#[from] ScratchError),

    #[error("launch failed")]
    Launch(#[from] LaunchError),
}

impl DispatchError {
    pub fn stage(&self) -> &'static str {
        match self {
            DispatchError::Config(_) => "config-resolution",
            DispatchError::Transform(_) => "transform",
            DispatchError::Scratch(_) => "scratch",
            DispatchError::Launch(_) => "launch",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            DispatchError::Config(_) => exit::CONFIG,
            DispatchError::Transform(_) => exit::DATAERR,
            DispatchError::Scratch(_) => exit::IOERR,
            DispatchError::Launch(_) => exit::UNAVAILABLE,
        }
    }
}

/// Settings that are not part of the per-run parameters.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub layout: Layout,
    /// Keep images in this directory instead of a temporary one.
    pub scratch: Option<PathBuf>,
}

/// Resolves a back-end, prepares its inputs and runs it.
///
/// Stages run strictly in order and the first error ends the run; in
/// particular nothing is written or launched until configuration has fully
/// resolved.
pub fn run(
    env: &Env,
    params: &Params,
    options: &Options,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> Result<InvocationResult, DispatchError> {
    let config = config::resolve(env, params, &options.layout)?;
    log::info!("using the {} backend", config.kind());

    // Must outlive the back-end, which reads the images from here.
    let scratch = if config.requires_transform() {
        Some(Scratch::prepare(options.scratch.as_deref())?)
    } else {
        None
    };
    let memory = scratch
        .as_ref()
        .map(|s| prepare(&params.image, config.overlay(), &options.layout, s.path()))
        .transpose()?;

    let artifacts = Artifacts {
        image: params.image.clone(),
        memory,
    };
    Ok(backend::invoke(&config, &artifacts, runner, cancel)?)
}

/// Transforms `image` (with `overlay` merged in) and writes the results to
/// `out_dir`, without running anything.
pub fn convert(
    image: &Path,
    overlay: Option<&Path>,
    layout: &Layout,
    out_dir: &Path,
) -> Result<ArtifactPaths, DispatchError> {
    std::fs::create_dir_all(out_dir).map_err(|source| ScratchError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    prepare(image, overlay, layout, out_dir)
}

/// Resolves configuration and renders the command that [`run`] would
/// launch, using placeholder paths for generated images.
pub fn describe(
    env: &Env,
    params: &Params,
    options: &Options,
) -> Result<(BackendConfig, Invocation), DispatchError> {
    let config = config::resolve(env, params, &options.layout)?;
    let memory = config.requires_transform().then(|| {
        let dir = options
            .scratch
            .clone()
            .unwrap_or_else(|| PathBuf::from("<scratch>"));
        let stem = artifact_stem(&params.image);
        ArtifactPaths {
            flat: dir.join(format!("{stem}.bin")),
            vmem: dir.join(format!("{stem}.64.vmem")),
        }
    });
    let artifacts = Artifacts {
        image: params.image.clone(),
        memory,
    };
    let command = config.command(&artifacts)?;
    Ok((config, command))
}

fn prepare(
    image: &Path,
    overlay: Option<&Path>,
    layout: &Layout,
    dir: &Path,
) -> Result<ArtifactPaths, DispatchError> {
    let kernel = Image::load(image)?;
    let app = overlay.map(Overlay::load).transpose()?;
    let transformed = Transformer::new(layout.image.overlay_section.as_str())
        .transform(&kernel, app.as_ref())?;
    Ok(memimage::write_artifacts(
        dir,
        &artifact_stem(image),
        &transformed,
    )?)
}

fn artifact_stem(image: &Path) -> String {
    image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::config::{APP_VAR, OPENTITAN_TREE_VAR, SIMULATION_VAR};
    use crate::process::{FakeRunner, Termination};
    use memimage::fixture::ElfBuilder;

    struct Workspace {
        dir: tempfile::TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            Workspace {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn kernel(&self, text: &[u8], apps: Option<usize>) -> PathBuf {
            let mut b = ElfBuilder::new().section(".text", 0x2000_0000, text);
            if let Some(len) = apps {
                b = b.section(".apps", 0x2003_0000, &vec![0u8; len]);
            }
            let path = self.path("earlgrey-cw310.elf");
            std::fs::write(&path, b.build()).unwrap();
            path
        }

        fn params(&self, image: PathBuf) -> Params {
            Params {
                image,
                tock_root: Some(self.path("tock")),
                ..Default::default()
            }
        }

        fn options(&self) -> Options {
            Options {
                layout: Layout::default(),
                scratch: Some(self.path("scratch")),
            }
        }
    }

    #[test]
    fn emulator_runs_the_untouched_elf() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x13; 20], None);
        let runner = FakeRunner::exiting(0);

        let result = run(
            &Env::default(),
            &ws.params(image.clone()),
            &ws.options(),
            &runner,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.backend, BackendKind::Emulator);
        assert!(result.success());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].program,
            ws.path("tock").join("tools/qemu/build/qemu-system-riscv32")
        );
        let args = calls[0].args_lossy();
        let kernel = args.iter().position(|a| a == "-kernel").unwrap();
        assert_eq!(args[kernel + 1], image.to_string_lossy());

        // No images were generated, not even a scratch directory
        assert!(!ws.path("scratch").exists());
    }

    #[test]
    fn fpga_gets_a_padded_flat_binary() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 10], None);
        let env = Env::from_vars([(OPENTITAN_TREE_VAR, ws.path("ot"))]);
        let runner = FakeRunner::exiting(0);

        let result = run(
            &env,
            &ws.params(image),
            &ws.options(),
            &runner,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.backend, BackendKind::Fpga);

        let calls = runner.calls();
        assert_eq!(calls[0].program, ws.path("ot").join("util/fpga/cw310_loader.py"));
        let flat = ws.path("scratch").join("earlgrey-cw310.bin");
        assert_eq!(
            calls[0].args_lossy(),
            ["--firmware".to_string(), flat.to_string_lossy().into_owned()]
        );

        assert_eq!(std::fs::read(&flat).unwrap(), vec![0x42; 10]);
        let vmem = std::fs::read_to_string(ws.path("scratch").join("earlgrey-cw310.64.vmem"))
            .unwrap();
        assert_eq!(
            vmem,
            "@00000000 4242424242424242\n\
             @00000001 FFFFFFFFFFFF4242\n"
        );
    }

    #[test]
    fn fpga_merges_the_application() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 8], Some(16));
        let app = ws.path("blink.tbf");
        std::fs::write(&app, [0xA5; 16]).unwrap();
        let env = Env::from_vars([
            (OPENTITAN_TREE_VAR, ws.path("ot")),
            (APP_VAR, app.clone()),
        ]);
        let runner = FakeRunner::exiting(0);

        run(&env, &ws.params(image), &ws.options(), &runner, &CancelToken::new())
            .unwrap();

        let flat = std::fs::read(ws.path("scratch").join("earlgrey-cw310.bin")).unwrap();
        // .text at 0x20000000, then zeros up to .apps at 0x20030000
        assert_eq!(flat.len(), 0x3_0000 + 16);
        assert_eq!(&flat[..8], &[0x42; 8]);
        assert_eq!(&flat[0x3_0000..], &[0xA5; 16]);
    }

    #[test]
    fn oversized_application_stops_before_launch() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 8], Some(16));
        let app = ws.path("blink.tbf");
        std::fs::write(&app, [0xA5; 17]).unwrap();
        let env = Env::from_vars([
            (OPENTITAN_TREE_VAR, ws.path("ot")),
            (APP_VAR, app.clone()),
        ]);
        let runner = FakeRunner::exiting(0);

        let err = run(&env, &ws.params(image), &ws.options(), &runner, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.stage(), "transform");
        assert_eq!(err.exit_code(), exit::DATAERR);
        assert!(matches!(
            err,
            DispatchError::Transform(TransformError::OverlaySizeMismatch { .. })
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn simulator_binds_generated_flash_image() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 16], None);
        let ot = ws.path("ot");
        let env = Env::from_vars([(SIMULATION_VAR, PathBuf::from("yes")), (OPENTITAN_TREE_VAR, ot)]);
        let runner = FakeRunner::exiting(0);

        run(&env, &ws.params(image), &ws.options(), &runner, &CancelToken::new())
            .unwrap();

        let calls = runner.calls();
        let vmem = ws.path("scratch").join("earlgrey-cw310.64.vmem");
        assert_eq!(
            calls[0].args_lossy()[1],
            format!("--meminit=flash,{}", vmem.display())
        );
        assert_eq!(
            std::fs::read_to_string(&vmem).unwrap().lines().count(),
            2
        );
    }

    #[test]
    fn missing_otp_launches_nothing() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 16], None);
        let env = Env::from_vars([
            (SIMULATION_VAR, PathBuf::from("yes")),
            (OPENTITAN_TREE_VAR, ws.path("ot")),
        ]);
        let mut options = ws.options();
        options.layout.simulator.otp = PathBuf::new();
        let runner = FakeRunner::exiting(0);

        let err = run(&env, &ws.params(image), &options, &runner, &CancelToken::new())
            .unwrap_err();
        match &err {
            DispatchError::Config(ConfigError::MissingConfig { field, .. }) => {
                assert_eq!(*field, "otp")
            }
            e => panic!("unexpected error: {e}"),
        }
        assert_eq!(err.exit_code(), exit::CONFIG);
        assert!(runner.calls().is_empty());
        assert!(!ws.path("scratch").exists());
    }

    #[test]
    fn malformed_image_is_a_transform_error() {
        let ws = Workspace::new();
        let image = ws.path("kernel.elf");
        std::fs::write(&image, b"#!/bin/sh\n").unwrap();
        let env = Env::from_vars([(OPENTITAN_TREE_VAR, ws.path("ot"))]);
        let runner = FakeRunner::exiting(0);

        let err = run(&env, &ws.params(image), &ws.options(), &runner, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Transform(TransformError::MalformedImage { .. })
        ));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn backend_failure_is_passed_through() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x13; 8], None);
        let runner = FakeRunner::with(Some(Termination::Signaled(6)));
        let result = run(
            &Env::default(),
            &ws.params(image),
            &ws.options(),
            &runner,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(result.termination, Termination::Signaled(6));
        assert_eq!(result.termination.exit_code(), 134);
    }

    #[test]
    fn launch_errors_name_the_stage() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x13; 8], None);
        let err = run(
            &Env::default(),
            &ws.params(image),
            &ws.options(),
            &FakeRunner::unlaunchable(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.stage(), "launch");
        assert_eq!(err.exit_code(), exit::UNAVAILABLE);
        assert!(err.to_string().starts_with("launch"));
    }

    #[test]
    fn convert_writes_without_running() {
        let ws = Workspace::new();
        let image = ws.kernel(&[0x42; 24], None);
        let out = ws.path("dist");
        let paths = convert(&image, None, &Layout::default(), &out).unwrap();
        assert_eq!(std::fs::read(&paths.flat).unwrap().len(), 24);
        assert_eq!(
            std::fs::read_to_string(&paths.vmem).unwrap().lines().count(),
            3
        );
    }

    #[test]
    fn describe_renders_the_command() {
        let ws = Workspace::new();
        let env = Env::from_vars([(OPENTITAN_TREE_VAR, "/ot")]);
        let params = ws.params("build/kernel.elf".into());
        let (config, cmd) = describe(&env, &params, &Options::default()).unwrap();
        assert_eq!(config.kind(), BackendKind::Fpga);
        assert_eq!(
            cmd.to_string(),
            "/ot/util/fpga/cw310_loader.py --firmware <scratch>/kernel.bin"
        );
    }
}
