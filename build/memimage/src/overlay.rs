// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use crate::elf::Image;
use crate::error::{Result, TransformError};

/// Section the kernel linker script reserves for applications.
pub const DEFAULT_OVERLAY_SECTION: &str = ".apps";

/// An application binary (typically a TBF bundle) to be placed into the
/// kernel image's reserved application section.
#[derive(Clone, Debug)]
pub struct Overlay {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl Overlay {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(TransformError::io("read application", path))?;
        Ok(Self::from_bytes(path, bytes))
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Overlay {
            path: path.into(),
            bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Writes `overlay` over the contents of `section`, returning a new image.
///
/// The overlay must be exactly as long as the section, and the section must
/// lie inside a loadable segment so that it reaches the flat image. Nothing
/// outside the section is touched.
pub fn merge(image: &Image, section: &str, overlay: &Overlay) -> Result<Image> {
    let sec = image.section(section)?.ok_or_else(|| {
        TransformError::malformed(
            image.path(),
            format!("no `{section}` section to hold the application"),
        )
    })?;
    if !sec.has_contents {
        return Err(TransformError::malformed(
            image.path(),
            format!("section `{section}` has no file contents"),
        ));
    }

    let loaded = image.loadable_segments()?.values().any(|segment| {
        segment.start <= sec.file_range.start && sec.file_range.end <= segment.end
    });
    if !loaded {
        return Err(TransformError::malformed(
            image.path(),
            format!("section `{section}` is not part of any loadable segment"),
        ));
    }

    let reserved = sec.size();
    let actual = overlay.len() as u64;
    if actual != reserved {
        return Err(TransformError::OverlaySizeMismatch {
            image: image.path().to_path_buf(),
            overlay: overlay.path().to_path_buf(),
            section: section.to_string(),
            reserved,
            actual,
        });
    }

    log::info!(
        "placing {} ({actual} bytes) in {section} at {:#x}",
        overlay.path().display(),
        sec.addr
    );
    Ok(image.patched(sec.file_range, overlay.bytes()))
}
