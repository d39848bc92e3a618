// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use goblin::elf::header::EM_RISCV;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::SHT_NOBITS;
use goblin::elf::{Elf, SectionHeader};

use crate::error::{Result, TransformError};

/// A kernel ELF as produced by the board build.
///
/// We hold on to the raw file contents rather than the parsed `Elf`, because
/// an overlay is applied by patching bytes in place and re-parsing.
#[derive(Clone, Debug)]
pub struct Image {
    path: PathBuf,
    bytes: Vec<u8>,
    entry: u64,
}

/// Location of a named section, both in the file and in the target's
/// address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub addr: u64,
    pub file_range: Range<usize>,
    /// `false` for NOBITS sections such as `.bss`, which occupy no space in
    /// the file.
    pub has_contents: bool,
}

impl Section {
    pub fn size(&self) -> u64 {
        self.file_range.len() as u64
    }
}

impl Image {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(TransformError::io("read image", path))?;
        Self::from_bytes(path, bytes)
    }

    /// Validates `bytes` as a loadable RISC-V ELF. `path` is only used in
    /// diagnostics.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self> {
        let path = path.into();
        let entry = {
            let elf = parse(&path, &bytes)?;
            if elf.header.e_machine != EM_RISCV {
                return Err(TransformError::malformed(
                    &path,
                    format!(
                        "not a RISC-V file (e_machine is {:#x})",
                        elf.header.e_machine
                    ),
                ));
            }
            if !elf
                .program_headers
                .iter()
                .any(|phdr| phdr.p_type == PT_LOAD && phdr.p_filesz > 0)
            {
                return Err(TransformError::malformed(
                    &path,
                    "no loadable segment with file contents",
                ));
            }
            elf.header.e_entry
        };
        Ok(Image { path, bytes, entry })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub(crate) fn elf(&self) -> Result<Elf<'_>> {
        parse(&self.path, &self.bytes)
    }

    /// Looks up a section by name.
    pub fn section(&self, name: &str) -> Result<Option<Section>> {
        let elf = self.elf()?;
        let Some(shdr) = get_section_by_name(&elf, name) else {
            return Ok(None);
        };
        let has_contents = shdr.sh_type != SHT_NOBITS;
        let file_range = if has_contents {
            self.file_range(shdr.sh_offset, shdr.sh_size)?
        } else {
            0..0
        };
        Ok(Some(Section {
            name: name.to_string(),
            addr: shdr.sh_addr,
            file_range,
            has_contents,
        }))
    }

    /// Returns the file ranges of every PT_LOAD segment that carries data,
    /// keyed by physical load address.
    ///
    /// Note that this is the LMA rather than the VMA: initialised data is
    /// stored in flash and copied to RAM by the kernel's startup code, so it
    /// must land at its flash address in the flat image.
    pub(crate) fn loadable_segments(&self) -> Result<BTreeMap<u64, Range<usize>>> {
        let elf = self.elf()?;
        let mut segments: BTreeMap<u64, Range<usize>> = BTreeMap::new();

        for phdr in &elf.program_headers {
            if phdr.p_type != PT_LOAD || phdr.p_filesz == 0 {
                continue;
            }
            let addr = phdr.p_paddr;
            let range = self.file_range(phdr.p_offset, phdr.p_filesz)?;
            let end = addr.checked_add(phdr.p_filesz).ok_or_else(|| {
                TransformError::malformed(
                    &self.path,
                    format!("segment at {addr:#x} wraps the address space"),
                )
            })?;

            // Check for address overlap in both directions
            let overlap = segments
                .range(..end)
                .next_back()
                .filter(|(base, r)| **base + r.len() as u64 > addr);
            if let Some((&base, _)) = overlap {
                return Err(TransformError::malformed(
                    &self.path,
                    format!(
                        "ELF file internally inconsistent: address range \
                         {addr:#x}..{end:#x} overlaps segment at {base:#x}"
                    ),
                ));
            }
            segments.insert(addr, range);
        }
        Ok(segments)
    }

    /// Returns a copy of this image with `data` written over the file bytes
    /// in `range`.
    pub(crate) fn patched(&self, range: Range<usize>, data: &[u8]) -> Image {
        let mut bytes = self.bytes.clone();
        bytes[range].copy_from_slice(data);
        Image {
            path: self.path.clone(),
            bytes,
            entry: self.entry,
        }
    }

    fn file_range(&self, offset: u64, size: u64) -> Result<Range<usize>> {
        let start = usize::try_from(offset).ok();
        let end = start.and_then(|s| s.checked_add(usize::try_from(size).ok()?));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(TransformError::malformed(
                &self.path,
                format!(
                    "{size:#x} bytes at file offset {offset:#x} run past the \
                     end of the file ({:#x} bytes)",
                    self.bytes.len()
                ),
            )),
        }
    }
}

fn parse<'a>(path: &Path, bytes: &'a [u8]) -> Result<Elf<'a>> {
    Elf::parse(bytes).map_err(|e| TransformError::malformed(path, e.to_string()))
}

fn get_section_by_name<'a>(
    elf: &'a Elf<'_>,
    name: &str,
) -> Option<&'a SectionHeader> {
    elf.section_headers.iter().find(|section| {
        elf.shdr_strtab.get_at(section.sh_name) == Some(name)
    })
}
