//! The classic 5x5 "ARUCO original" code book.
//!
//! Each of the 1024 ids encodes 10 data bits, two per row, through parity
//! codewords; the full book is generated at construction instead of being
//! embedded as a table.

use crate::{Result, TrackError};

/// Row codewords indexed by two data bits (MSB first).
const ROW_CODES: [u32; 4] = [0b10000, 0b10111, 0b01001, 0b01110];

/// Result of matching a sampled bit grid against the code book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryMatch {
    pub id: u32,
    pub distance: u32,
}

/// A marker code book plus its grid geometry.
pub struct Dictionary {
    /// Full marker grid side including the black border (7 for 5x5 codes).
    mark_size: usize,
    /// One packed word of `data_size^2` bits per id.
    codes: Vec<u32>,
}

impl Dictionary {
    /// The 1024-entry ARUCO original dictionary.
    pub fn aruco_original() -> Self {
        let codes = (0..1024).map(Self::encode_aruco_id).collect();
        Self {
            mark_size: 7,
            codes,
        }
    }

    /// Look up a compiled-in dictionary by its product-facing name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ARUCO" => Ok(Self::aruco_original()),
            other => Err(TrackError::DictionaryMismatch(other.to_owned())),
        }
    }

    /// Grid side including the border cells.
    pub fn mark_size(&self) -> usize {
        self.mark_size
    }

    /// Side of the inner data grid.
    pub fn data_size(&self) -> usize {
        self.mark_size - 2
    }

    /// Packs a 10-bit id into its 25-bit row-parity codeword.
    fn encode_aruco_id(id: u32) -> u32 {
        let mut word = 0u32;
        for row in 0..5 {
            let pair = (id >> (8 - 2 * row)) & 0b11;
            word = (word << 5) | ROW_CODES[pair as usize];
        }
        word
    }

    /// Packs a flat row-major bit grid (one byte per cell, non-zero = 1)
    /// into a single word, MSB first.
    fn pack(bits: &[u8]) -> u32 {
        bits.iter()
            .fold(0u32, |acc, &b| (acc << 1) | u32::from(b != 0))
    }

    /// Finds the closest codeword within `max_distance` Hamming bits.
    ///
    /// The caller is responsible for trying the four grid rotations; this
    /// lookup matches one orientation only.
    pub fn find(&self, bits: &[u8], max_distance: u32) -> Option<DictionaryMatch> {
        debug_assert_eq!(bits.len(), self.data_size() * self.data_size());
        let word = Self::pack(bits);

        let mut best: Option<DictionaryMatch> = None;
        for (id, &code) in self.codes.iter().enumerate() {
            let distance = (word ^ code).count_ones();
            if distance <= max_distance && best.map_or(true, |b| distance < b.distance) {
                best = Some(DictionaryMatch {
                    id: id as u32,
                    distance,
                });
                if distance == 0 {
                    break;
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_zero_codeword() {
        // Reference value for ARUCO original id 0.
        assert_eq!(Dictionary::encode_aruco_id(0), 0x1084210);
    }

    #[test]
    fn codes_are_unique() {
        let dict = Dictionary::aruco_original();
        let mut sorted = dict.codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 1024);
    }

    #[test]
    fn exact_match_roundtrip() {
        let dict = Dictionary::aruco_original();
        for id in [0u32, 1, 7, 512, 1023] {
            let code = Dictionary::encode_aruco_id(id);
            let bits: Vec<u8> = (0..25).rev().map(|i| ((code >> i) & 1) as u8).collect();
            let m = dict.find(&bits, 0).unwrap();
            assert_eq!(m.id, id);
            assert_eq!(m.distance, 0);
        }
    }

    #[test]
    fn corrupted_bit_respects_max_distance() {
        let dict = Dictionary::aruco_original();
        let code = Dictionary::encode_aruco_id(42);
        let mut bits: Vec<u8> = (0..25).rev().map(|i| ((code >> i) & 1) as u8).collect();
        bits[3] ^= 1;

        assert!(dict.find(&bits, 0).is_none());
        let m = dict.find(&bits, 1).unwrap();
        assert_eq!(m.id, 42);
        assert_eq!(m.distance, 1);
    }

    #[test]
    fn unknown_dictionary_name() {
        assert!(Dictionary::from_name("DICT_6X6_250").is_err());
        assert!(Dictionary::from_name("ARUCO").is_ok());
    }
}
