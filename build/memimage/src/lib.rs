// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns a kernel ELF into the images the earlgrey hardware back-ends load.
//!
//! The pipeline is:
//!
//! 1. optionally place an application bundle into the kernel's reserved
//!    application section ([`overlay::merge`]),
//! 2. pull the loadable segments out into a flat binary ([`FlatBinary`]),
//! 3. pad and frame that as 64-bit words ([`MemoryImage`]) and encode it as
//!    VMEM text.
//!
//! [`Transformer`] runs all three; [`write_artifacts`] puts the results on
//! disk.

use std::path::{Path, PathBuf};

mod elf;
mod error;
mod flat;
pub mod overlay;
pub mod vmem;

#[cfg(any(test, feature = "fixture"))]
pub mod fixture;

pub use elf::{Image, Section};
pub use error::{Result, TransformError};
pub use flat::FlatBinary;
pub use overlay::Overlay;
pub use vmem::MemoryImage;

/// Runs the whole pipeline.
#[derive(Clone, Debug)]
pub struct Transformer {
    overlay_section: String,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(overlay::DEFAULT_OVERLAY_SECTION)
    }
}

/// Output of [`Transformer::transform`].
#[derive(Clone, Debug)]
pub struct Transformed {
    pub flat: FlatBinary,
    pub memory: MemoryImage,
}

/// Where [`write_artifacts`] put things.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub flat: PathBuf,
    pub vmem: PathBuf,
}

impl Transformer {
    pub fn new(overlay_section: impl Into<String>) -> Self {
        Transformer {
            overlay_section: overlay_section.into(),
        }
    }

    pub fn transform(
        &self,
        image: &Image,
        overlay: Option<&Overlay>,
    ) -> Result<Transformed> {
        let merged;
        let image = match overlay {
            Some(app) => {
                merged = overlay::merge(image, &self.overlay_section, app)?;
                &merged
            }
            None => image,
        };

        let flat = FlatBinary::extract(image)?;
        let memory = MemoryImage::frame(&flat);
        log::info!(
            "{}: {} byte flat image at {:#x} (entry {:#x}), {} words ({} fill bytes)",
            image.path().display(),
            flat.len(),
            flat.base(),
            image.entry(),
            memory.len() / vmem::WORD_BYTES,
            memory.padding(),
        );
        Ok(Transformed { flat, memory })
    }
}

/// Writes `<stem>.bin` and `<stem>.64.vmem` into `dir`, which must exist.
pub fn write_artifacts(
    dir: &Path,
    stem: &str,
    out: &Transformed,
) -> Result<ArtifactPaths> {
    let flat = dir.join(format!("{stem}.bin"));
    std::fs::write(&flat, out.flat.bytes())
        .map_err(TransformError::io("write flat binary", &flat))?;

    let vmem = dir.join(format!("{stem}.64.vmem"));
    std::fs::File::create(&vmem)
        .and_then(|file| out.memory.write_to(std::io::BufWriter::new(file)))
        .map_err(TransformError::io("write memory image", &vmem))?;

    log::debug!("wrote {} and {}", flat.display(), vmem.display());
    Ok(ArtifactPaths { flat, vmem })
}
