//! One-hot encoding of biological sequences.
//!
//! A batch of equal-length sequences over an [`Alphabet`] becomes a dense host
//! tensor of shape `(n_sequences, length × alphabet_size)`: one row per sequence,
//! position-major, with one one-hot vector per position. Bytes outside the
//! alphabet (including its unknown symbol) are encoded according to the
//! [`UnknownPolicy`].
//!
//! Encoding is a pure host-side step; moving the result to a device is a separate,
//! explicit [`Tensor::to_device`](crate::tensors::Tensor::to_device).
//!
//! ```rust
//! use seqconv::encoding::SequenceEncoder;
//!
//! let encoder = SequenceEncoder::dna();
//! let x = encoder.encode::<f32, _>(&["ACGT", "TTAN"]).unwrap();
//! assert_eq!(x.shape, vec![2, 16]);
//! assert_eq!(&x.data[..4], &[1.0, 0.0, 0.0, 0.0]);
//! assert_eq!(encoder.decode(&x).unwrap(), vec![b"ACGT".to_vec(), b"TTAN".to_vec()]);
//! ```

use crate::error::{Result, SeqConvError};
use crate::tensors::{Float, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// An ordered set of symbols plus the symbol written for unknown positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<u8>,
    unknown: u8,
    lookup: [Option<u8>; 256],
}

impl Alphabet {
    /// Builds an alphabet. Symbols are matched byte-exactly.
    ///
    /// # Errors
    /// Rejects an empty or oversized symbol set, duplicate symbols, and an unknown
    /// symbol that is also a regular symbol.
    pub fn new(symbols: &[u8], unknown: u8) -> Result<Self> {
        if symbols.is_empty() || symbols.len() > usize::from(u8::MAX) {
            return Err(SeqConvError::invalid_argument(
                "symbols",
                format!("alphabet must hold 1 to 255 symbols, got {}", symbols.len()),
            ));
        }
        let mut lookup = [None; 256];
        for (i, &s) in (0u8..).zip(symbols) {
            if s == unknown || lookup[usize::from(s)].replace(i).is_some() {
                return Err(SeqConvError::invalid_argument(
                    "symbols",
                    format!("symbol {:?} is repeated", char::from(s)),
                ));
            }
        }
        Ok(Self {
            symbols: symbols.to_vec(),
            unknown,
            lookup,
        })
    }

    /// `A C G T`, with `N` as the unknown symbol.
    pub fn dna() -> Self {
        let mut lookup = [None; 256];
        for (i, &s) in (0u8..).zip(b"ACGT") {
            lookup[usize::from(s)] = Some(i);
        }
        Self {
            symbols: b"ACGT".to_vec(),
            unknown: b'N',
            lookup,
        }
    }

    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    pub fn unknown(&self) -> u8 {
        self.unknown
    }

    /// Number of channels per position.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Channel index of `symbol`, if it belongs to the alphabet.
    pub fn index_of(&self, symbol: u8) -> Option<usize> {
        self.lookup[usize::from(symbol)].map(usize::from)
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::dna()
    }
}

/// Encoding of positions whose byte is not in the alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// An all-zero vector.
    #[default]
    Zero,
    /// Every channel set to `1 / alphabet_size`.
    Uniform,
}

/// Turns sequences into one-hot tensors and back.
#[derive(Debug, Clone, Default)]
pub struct SequenceEncoder {
    alphabet: Alphabet,
    unknown: UnknownPolicy,
}

impl SequenceEncoder {
    pub fn new(alphabet: Alphabet, unknown: UnknownPolicy) -> Self {
        Self { alphabet, unknown }
    }

    /// DNA encoder with all-zero unknown positions.
    pub fn dna() -> Self {
        Self::default()
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn unknown_policy(&self) -> UnknownPolicy {
        self.unknown
    }

    /// Encodes equal-length sequences into `(n, length × alphabet_size)`.
    ///
    /// # Errors
    /// Returns a shape error if the sequences differ in length.
    pub fn encode<T: Float, S: AsRef<[u8]> + Sync>(&self, sequences: &[S]) -> Result<Tensor<T>> {
        let length = sequences.first().map_or(0, |s| s.as_ref().len());
        if let Some((i, s)) = sequences
            .iter()
            .enumerate()
            .find(|(_, s)| s.as_ref().len() != length)
        {
            return Err(SeqConvError::shape(
                "encode",
                format!(
                    "sequence {i} has length {} but sequence 0 has length {length}",
                    s.as_ref().len()
                ),
            ));
        }

        let row_len = length * self.alphabet.len();
        let mut data = vec![T::ZERO; sequences.len() * row_len];
        if row_len > 0 {
            data.par_chunks_mut(row_len)
                .zip(sequences.par_iter())
                .for_each(|(row, seq)| self.encode_row(seq.as_ref(), row));
        }
        Tensor::try_new(vec![sequences.len(), row_len], data)
    }

    /// Encodes `n` sequences of `width` bytes stored back to back in `raw`.
    pub fn encode_rows<T: Float>(&self, raw: &[u8], n: usize, width: usize) -> Result<Tensor<T>> {
        if raw.len() != n * width {
            return Err(SeqConvError::shape(
                "encode_rows",
                format!("{} bytes cannot hold {n} rows of width {width}", raw.len()),
            ));
        }
        if width == 0 {
            return Tensor::try_new(vec![n, 0], Vec::new());
        }
        let rows: Vec<&[u8]> = raw.chunks_exact(width).collect();
        self.encode(&rows)
    }

    fn encode_row<T: Float>(&self, seq: &[u8], row: &mut [T]) {
        let a = self.alphabet.len();
        let uniform = T::from_f64(1.0 / a as f64);
        for (&symbol, position) in seq.iter().zip(row.chunks_exact_mut(a)) {
            match (self.alphabet.index_of(symbol), self.unknown) {
                (Some(i), _) => position[i] = T::ONE,
                (None, UnknownPolicy::Zero) => {}
                (None, UnknownPolicy::Uniform) => position.fill(uniform),
            }
        }
    }

    /// Decodes a `(n, length × alphabet_size)` tensor back to sequences.
    ///
    /// A position decodes to its symbol only when it is exactly one-hot; anything
    /// else decodes to the alphabet's unknown symbol.
    pub fn decode<T: Float>(&self, encoded: &Tensor<T>) -> Result<Vec<Vec<u8>>> {
        let a = self.alphabet.len();
        let (n, row_len) = match encoded.shape.as_slice() {
            &[n, row_len] if row_len % a == 0 => (n, row_len),
            other => {
                return Err(SeqConvError::shape(
                    "decode",
                    format!("expected (n, length × {a}), got {other:?}"),
                ));
            }
        };
        if row_len == 0 {
            return Ok(vec![Vec::new(); n]);
        }

        Ok(encoded
            .data
            .par_chunks(row_len)
            .map(|row| {
                row.chunks_exact(a)
                    .map(|position| self.decode_position(position))
                    .collect()
            })
            .collect())
    }

    fn decode_position<T: Float>(&self, position: &[T]) -> u8 {
        let mut hot = None;
        for (i, &v) in position.iter().enumerate() {
            if v == T::ONE && hot.is_none() {
                hot = Some(i);
            } else if v != T::ZERO {
                return self.alphabet.unknown;
            }
        }
        hot.map_or(self.alphabet.unknown, |i| self.alphabet.symbols[i])
    }
}

/// Strips `leading` bytes from the front and `trailing` from the back.
///
/// # Errors
/// Returns a precondition error if the trim is longer than the sequence.
pub fn trim(sequence: &[u8], (leading, trailing): (usize, usize)) -> Result<&[u8]> {
    if leading + trailing > sequence.len() {
        return Err(SeqConvError::precondition(format!(
            "cannot trim {leading}+{trailing} bytes from a sequence of length {}",
            sequence.len()
        )));
    }
    Ok(&sequence[leading..sequence.len() - trailing])
}
