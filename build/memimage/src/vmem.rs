// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 64-bit VMEM memory images, the format the earlgrey simulator takes for
//! `--meminit`.
//!
//! Each line is `@AAAAAAAA WWWWWWWWWWWWWWWW`: a word address (in words, not
//! bytes, counting from zero) followed by one 64-bit word in hex. Flash is
//! little-endian, and the simulator reads each word most significant byte
//! first, so every 8-byte group is byte swapped on the way out. The tail is
//! padded with erased-flash bytes so the last word is complete.
//!
//! The word width and fill byte must match the simulator's memory models;
//! they are not tunable.

use std::fmt::Write as _;
use std::io;

use crate::flat::FlatBinary;

/// Width of one memory-image word, in bytes.
pub const WORD_BYTES: usize = 8;

/// Value of erased flash, used for all padding.
pub const FILL_BYTE: u8 = 0xFF;

/// A flat binary padded out to a whole number of 64-bit words.
///
/// The bytes are kept in target memory order; [`MemoryImage::wire_bytes`]
/// and [`MemoryImage::encode`] apply the per-word swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryImage {
    data: Vec<u8>,
    padding: usize,
}

impl MemoryImage {
    pub fn frame(flat: &FlatBinary) -> Self {
        Self::from_bytes(flat.bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let padding = padding_for(bytes.len());
        let mut data = Vec::with_capacity(bytes.len() + padding);
        data.extend_from_slice(bytes);
        data.resize(bytes.len() + padding, FILL_BYTE);
        MemoryImage { data, padding }
    }

    /// Padded contents in memory order.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of fill bytes appended to the flat binary.
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Contents in the order they appear on the wire: each word's bytes
    /// reversed.
    pub fn wire_bytes(&self) -> Vec<u8> {
        swap_words(&self.data)
    }

    /// Renders the image as VMEM text, one wire-order word per line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() / WORD_BYTES * 27);
        for (addr, word) in self.wire_bytes().chunks_exact(WORD_BYTES).enumerate() {
            write!(out, "@{addr:08X} ").unwrap();
            for byte in word {
                write!(out, "{byte:02X}").unwrap();
            }
            writeln!(out).unwrap();
        }
        out
    }

    pub fn write_to(&self, mut out: impl io::Write) -> io::Result<()> {
        out.write_all(self.encode().as_bytes())?;
        out.flush()
    }
}

/// Number of fill bytes needed to round `len` up to a whole word.
pub fn padding_for(len: usize) -> usize {
    match len % WORD_BYTES {
        0 => 0,
        r => WORD_BYTES - r,
    }
}

/// Reverses the byte order within every 8-byte word. A trailing partial
/// word is reversed on its own, so applying this twice always gives back
/// the input.
pub fn swap_words(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks(WORD_BYTES)
        .flat_map(|chunk| chunk.iter().rev().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ten_bytes_become_two_words() {
        let img = MemoryImage::from_bytes(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(img.len(), 16);
        assert_eq!(img.padding(), 6);
        assert_eq!(&img.bytes()[10..], &[0xFF; 6]);
        assert_eq!(
            img.wire_bytes(),
            vec![7, 6, 5, 4, 3, 2, 1, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 9, 8]
        );
    }

    #[test]
    fn encodes_one_word_per_line() {
        let img = MemoryImage::from_bytes(&[
            0x13, 0x00, 0x00, 0x00, 0x6f, 0x00, 0x00, 0x00, //
            0xaa, 0xbb,
        ]);
        assert_eq!(
            img.encode(),
            "@00000000 0000006F00000013\n\
             @00000001 FFFFFFFFFFFFBBAA\n"
        );
    }

    #[test]
    fn addresses_count_words() {
        let img = MemoryImage::from_bytes(&[0u8; 8 * 17]);
        let encoded = img.encode();
        let last = encoded.lines().last().unwrap();
        assert_eq!(last, "@00000010 0000000000000000");
        assert_eq!(encoded.lines().count(), 17);
    }

    #[test]
    fn write_to_matches_encode() {
        let img = MemoryImage::from_bytes(&[1, 2, 3]);
        let mut out = Vec::new();
        img.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), img.encode());
    }

    proptest! {
        #[test]
        fn aligned_input_is_not_padded(words in proptest::collection::vec(any::<[u8; 8]>(), 1..64)) {
            let bytes: Vec<u8> = words.concat();
            let img = MemoryImage::from_bytes(&bytes);
            prop_assert_eq!(img.len(), bytes.len());
            prop_assert_eq!(img.padding(), 0);
            prop_assert_eq!(img.bytes(), &bytes[..]);
        }

        #[test]
        fn unaligned_input_is_padded_with_fill(bytes in proptest::collection::vec(any::<u8>(), 1..512)) {
            prop_assume!(bytes.len() % WORD_BYTES != 0);
            let img = MemoryImage::from_bytes(&bytes);
            let expected = WORD_BYTES - bytes.len() % WORD_BYTES;
            prop_assert_eq!(img.padding(), expected);
            prop_assert_eq!(img.len(), bytes.len() + expected);
            prop_assert_eq!(img.len() % WORD_BYTES, 0);
            prop_assert_eq!(&img.bytes()[..bytes.len()], &bytes[..]);
            prop_assert!(img.bytes()[bytes.len()..].iter().all(|&b| b == FILL_BYTE));
        }

        #[test]
        fn swap_is_self_inverse(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(swap_words(&swap_words(&bytes)), bytes);
        }

        #[test]
        fn encoded_words_read_memory_as_little_endian(bytes in proptest::collection::vec(any::<u8>(), 1..256)) {
            let img = MemoryImage::from_bytes(&bytes);
            let encoded = img.encode();
            let lines: Vec<&str> = encoded.lines().collect();
            prop_assert_eq!(lines.len(), img.len() / WORD_BYTES);
            for (line, chunk) in lines.iter().zip(img.bytes().chunks(WORD_BYTES)) {
                let mut word = [0u8; WORD_BYTES];
                word.copy_from_slice(chunk);
                let expected = format!("{:016X}", u64::from_le_bytes(word));
                prop_assert_eq!(&line[10..], expected.as_str());
            }
        }
    }
}
