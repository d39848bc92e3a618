// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs an earlgrey kernel on whichever back-end the environment selects:
//! the Verilator model, a CW310 FPGA, or QEMU.
//!
//! A run has four stages, each with its own error type:
//!
//! 1. [`config::resolve`] picks a back-end and finds everything it needs,
//! 2. for hardware back-ends, [`memimage`] turns the ELF into a flat binary
//!    and a VMEM image in a [`scratch::Scratch`] directory,
//! 3. the back-end's [`process::Invocation`] is built,
//! 4. a [`process::ProcessRunner`] runs it to completion.
//!
//! [`dispatch::run`] strings these together.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod process;
pub mod scratch;

pub use backend::{BackendConfig, BackendKind, InvocationResult};
pub use config::{Env, Layout, Params};
pub use dispatch::{DispatchError, Options};
pub use process::{CancelToken, SystemRunner, Termination};
