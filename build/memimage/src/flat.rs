// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::elf::Image;
use crate::error::{Result, TransformError};

/// Flat images larger than this are assumed to come from a bad link (e.g. a
/// stray segment in RAM with a RAM load address) rather than real firmware.
/// Earlgrey has 1 MiB of embedded flash.
pub const MAX_FLAT_SPAN: u64 = 64 << 20;

/// The raw bytes of an image's loadable segments, as `objcopy -O binary`
/// would produce them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatBinary {
    base: u64,
    data: Vec<u8>,
}

impl FlatBinary {
    /// Extracts loadable data from `image`. Gaps between segments are zero
    /// filled; sections outside any segment are dropped.
    pub fn extract(image: &Image) -> Result<Self> {
        let segments = image.loadable_segments()?;

        // `Image` guarantees at least one loadable segment.
        let (Some((&base, _)), Some((&last, last_range))) =
            (segments.first_key_value(), segments.last_key_value())
        else {
            return Err(TransformError::malformed(
                image.path(),
                "no loadable segment with file contents",
            ));
        };
        let span = last + last_range.len() as u64 - base;
        if span > MAX_FLAT_SPAN {
            return Err(TransformError::malformed(
                image.path(),
                format!(
                    "loadable segments span {span:#x} bytes from {base:#x}; \
                     is something linked with a RAM load address?"
                ),
            ));
        }

        let mut data = vec![0u8; span as usize];
        for (addr, range) in segments {
            let start = (addr - base) as usize;
            data[start..start + range.len()]
                .copy_from_slice(&image.bytes()[range]);
        }

        log::debug!(
            "extracted {} bytes at {base:#x} from {}",
            data.len(),
            image.path().display()
        );
        Ok(FlatBinary { base, data })
    }

    /// Target address of the first byte.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
