// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

/// Everything that can go wrong between reading a kernel ELF and writing its
/// memory images.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The input does not have the structure we need to build a flat image
    /// out of it.
    #[error("malformed image {}: {reason}", path.display())]
    MalformedImage { path: PathBuf, reason: String },

    /// The application overlay is not the size of the section reserved for
    /// it.
    #[error(
        "overlay {} is {actual} bytes, but section `{section}` of {} is \
         {reserved}",
        overlay.display(),
        image.display()
    )]
    OverlaySizeMismatch {
        image: PathBuf,
        overlay: PathBuf,
        section: String,
        reserved: u64,
        actual: u64,
    },

    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransformError {
    pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
        TransformError::MalformedImage {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io<'a>(
        action: &'static str,
        path: &'a Path,
    ) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| TransformError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
