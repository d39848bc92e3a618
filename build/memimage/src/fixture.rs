// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic ELF32 images for tests.
//!
//! Every loadable section gets its own PT_LOAD segment, so the flat image is
//! exactly the concatenation of section contents (plus zero gaps).

use goblin::elf::header::EM_RISCV;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::{
    SHF_ALLOC, SHF_EXECINSTR, SHT_NOBITS, SHT_PROGBITS, SHT_STRTAB,
};
use scroll::{Pwrite, LE};

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;

#[derive(Clone, Debug)]
enum Kind {
    Load { vaddr: u32, paddr: u32 },
    NoBits { addr: u32, size: u32 },
    Debug,
}

#[derive(Clone, Debug)]
struct FixtureSection {
    name: String,
    kind: Kind,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ElfBuilder {
    machine: u16,
    entry: u32,
    sections: Vec<FixtureSection>,
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfBuilder {
    pub fn new() -> Self {
        ElfBuilder {
            machine: EM_RISCV,
            entry: 0,
            sections: Vec::new(),
        }
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    /// Adds a loadable section whose load address equals its run address.
    pub fn section(self, name: &str, addr: u32, data: &[u8]) -> Self {
        self.section_at(name, addr, addr, data)
    }

    /// Adds a loadable section that runs at `vaddr` but is stored at `paddr`,
    /// like `.data`.
    pub fn section_at(
        mut self,
        name: &str,
        vaddr: u32,
        paddr: u32,
        data: &[u8],
    ) -> Self {
        self.sections.push(FixtureSection {
            name: name.to_string(),
            kind: Kind::Load { vaddr, paddr },
            data: data.to_vec(),
        });
        self
    }

    pub fn nobits(mut self, name: &str, addr: u32, size: u32) -> Self {
        self.sections.push(FixtureSection {
            name: name.to_string(),
            kind: Kind::NoBits { addr, size },
            data: Vec::new(),
        });
        self
    }

    /// Adds a section that is in the file but not in any segment.
    pub fn debug_section(mut self, name: &str, data: &[u8]) -> Self {
        self.sections.push(FixtureSection {
            name: name.to_string(),
            kind: Kind::Debug,
            data: data.to_vec(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for s in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let phnum = self
            .sections
            .iter()
            .filter(|s| !matches!(s.kind, Kind::Debug))
            .count();

        // File layout: header, program headers, section contents, string
        // table, section headers.
        let mut offset = EHDR_SIZE + phnum * PHDR_SIZE;
        let mut data_offsets = Vec::new();
        for s in &self.sections {
            offset = align4(offset);
            data_offsets.push(offset);
            offset += s.data.len();
        }
        let shstrtab_offset = offset;
        offset = align4(offset + shstrtab.len());
        let shoff = offset;
        let shnum = self.sections.len() + 2;
        let total = shoff + shnum * SHDR_SIZE;

        let mut out = vec![0u8; total];
        out[..4].copy_from_slice(b"\x7fELF");
        out[4] = 1; // ELFCLASS32
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        put(&mut out, 16, 2u16); // ET_EXEC
        put(&mut out, 18, self.machine);
        put(&mut out, 20, 1u32);
        put(&mut out, 24, self.entry);
        put(&mut out, 28, if phnum > 0 { EHDR_SIZE as u32 } else { 0 });
        put(&mut out, 32, shoff as u32);
        put(&mut out, 36, 0u32);
        put(&mut out, 40, EHDR_SIZE as u16);
        put(&mut out, 42, PHDR_SIZE as u16);
        put(&mut out, 44, phnum as u16);
        put(&mut out, 46, SHDR_SIZE as u16);
        put(&mut out, 48, shnum as u16);
        put(&mut out, 50, (shnum - 1) as u16);

        let mut phdr = EHDR_SIZE;
        let mut shdr = shoff + SHDR_SIZE; // skip the null section
        for ((s, &data_offset), &name) in
            self.sections.iter().zip(&data_offsets).zip(&name_offsets)
        {
            out[data_offset..data_offset + s.data.len()].copy_from_slice(&s.data);

            let (sh_type, sh_flags, sh_addr, sh_size) = match s.kind {
                Kind::Load { vaddr, paddr } => {
                    let size = s.data.len() as u32;
                    write_phdr(&mut out, phdr, data_offset as u32, vaddr, paddr, size, size);
                    phdr += PHDR_SIZE;
                    (SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, vaddr, size)
                }
                Kind::NoBits { addr, size } => {
                    write_phdr(&mut out, phdr, data_offset as u32, addr, addr, 0, size);
                    phdr += PHDR_SIZE;
                    (SHT_NOBITS, SHF_ALLOC, addr, size)
                }
                Kind::Debug => (SHT_PROGBITS, 0, 0, s.data.len() as u32),
            };
            put(&mut out, shdr, name);
            put(&mut out, shdr + 4, sh_type);
            put(&mut out, shdr + 8, sh_flags);
            put(&mut out, shdr + 12, sh_addr);
            put(&mut out, shdr + 16, data_offset as u32);
            put(&mut out, shdr + 20, sh_size);
            put(&mut out, shdr + 32, 4u32);
            shdr += SHDR_SIZE;
        }

        out[shstrtab_offset..shstrtab_offset + shstrtab.len()]
            .copy_from_slice(&shstrtab);
        put(&mut out, shdr, shstrtab_name);
        put(&mut out, shdr + 4, SHT_STRTAB);
        put(&mut out, shdr + 16, shstrtab_offset as u32);
        put(&mut out, shdr + 20, shstrtab.len() as u32);
        put(&mut out, shdr + 32, 1u32);

        out
    }
}

fn write_phdr(
    out: &mut [u8],
    at: usize,
    offset: u32,
    vaddr: u32,
    paddr: u32,
    filesz: u32,
    memsz: u32,
) {
    put(out, at, PT_LOAD);
    put(out, at + 4, offset);
    put(out, at + 8, vaddr);
    put(out, at + 12, paddr);
    put(out, at + 16, filesz);
    put(out, at + 20, memsz);
    put(out, at + 24, 5u32); // R + X
    put(out, at + 28, 4u32);
}

fn put<N: scroll::ctx::TryIntoCtx<scroll::Endian, Error = scroll::Error>>(
    out: &mut [u8],
    at: usize,
    value: N,
) {
    out.pwrite_with(value, at, LE)
        .expect("fixture buffer is sized for every header field");
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}
