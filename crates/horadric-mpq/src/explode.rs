//! PKWARE Data Compression Library decoder ("explode").
//!
//! Sectors stored with the `IMPLODE` block flag, or with the PKWARE bit in
//! their compression mask, are DCL streams. A stream opens with two bytes:
//! the literal mode (0 = raw bytes, 1 = Huffman coded) and the dictionary
//! size as a power of two (4, 5 or 6 for 1, 2 or 4 KiB). What follows is a
//! little-endian bit stream of literals and back-references, terminated by
//! the length code 519.
//!
//! The three Huffman tables are fixed by the format and stored here in
//! run-length form: each byte is `(repeat - 1) << 4 | bit_length`.

use std::sync::OnceLock;

use thiserror::Error;

/// Longest code in any of the fixed tables.
const MAX_BITS: usize = 13;

/// Length value marking the end of the stream.
const END_OF_STREAM: usize = 519;

const LITERAL_LENGTHS: [u8; 98] = [
    11, 124, 8, 7, 28, 7, 188, 13, 76, 4, 10, 8, 12, 10, 12, 10, 8, 23, 8, 9, 7, 6, 7, 8, 7, 6, 55,
    8, 23, 24, 12, 11, 7, 9, 11, 12, 6, 7, 22, 5, 7, 24, 6, 11, 9, 6, 7, 22, 7, 11, 38, 7, 9, 8,
    25, 11, 8, 11, 9, 12, 8, 12, 5, 38, 5, 38, 5, 11, 7, 5, 6, 21, 6, 10, 53, 8, 7, 24, 10, 27, 44,
    253, 253, 253, 252, 252, 252, 13, 12, 45, 12, 45, 12, 61, 12, 45, 44, 173,
];

const LENGTH_LENGTHS: [u8; 6] = [2, 35, 36, 53, 38, 23];

const DISTANCE_LENGTHS: [u8; 7] = [2, 20, 53, 230, 247, 151, 248];

const LENGTH_BASE: [u16; 16] = [3, 2, 4, 5, 6, 7, 8, 9, 10, 12, 16, 24, 40, 72, 136, 264];

const LENGTH_EXTRA: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];

/// Errors raised while exploding a DCL stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExplodeError {
    /// The literal mode byte is neither 0 nor 1.
    #[error("invalid literal mode: {0}")]
    LiteralMode(u32),

    /// The dictionary size is outside 4..=6.
    #[error("invalid dictionary size: {0}")]
    DictionarySize(u32),

    /// The input ended before the stream did.
    #[error("unexpected end of compressed data")]
    UnexpectedEnd,

    /// A bit sequence matched no code in a table.
    #[error("invalid Huffman code")]
    InvalidCode,

    /// A back-reference points before the start of the output.
    #[error("distance {distance} exceeds {available} bytes of output")]
    DistanceTooFar { distance: usize, available: usize },
}

/// A canonical Huffman decoding table.
struct Huffman {
    /// Number of codes of each bit length
    count: [u16; MAX_BITS + 1],
    /// Symbols ordered by code
    symbol: Vec<u16>,
}

impl Huffman {
    fn from_run_lengths(runs: &[u8]) -> Self {
        let lengths: Vec<usize> = runs
            .iter()
            .flat_map(|&run| {
                let repeat = usize::from(run >> 4) + 1;
                std::iter::repeat(usize::from(run & 0x0F)).take(repeat)
            })
            .collect();

        let mut count = [0u16; MAX_BITS + 1];
        for &length in &lengths {
            count[length] += 1;
        }

        let mut offsets = [0usize; MAX_BITS + 2];
        for length in 1..=MAX_BITS {
            offsets[length + 1] = offsets[length] + usize::from(count[length]);
        }

        let mut symbol = vec![0u16; lengths.len()];
        for (value, &length) in lengths.iter().enumerate() {
            if length != 0 {
                symbol[offsets[length]] = value as u16;
                offsets[length] += 1;
            }
        }

        Self { count, symbol }
    }

    /// Decode one symbol. Codes are stored bit-inverted, first bit first.
    fn decode(&self, bits: &mut BitReader<'_>) -> Result<usize, ExplodeError> {
        let mut code = 0usize;
        let mut first = 0usize;
        let mut index = 0usize;

        for length in 1..=MAX_BITS {
            code |= (bits.read(1)? ^ 1) as usize;
            let count = usize::from(self.count[length]);
            if code < first + count {
                return self
                    .symbol
                    .get(index + code - first)
                    .map(|&s| usize::from(s))
                    .ok_or(ExplodeError::InvalidCode);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }

        Err(ExplodeError::InvalidCode)
    }
}

struct Tables {
    literal: Huffman,
    length: Huffman,
    distance: Huffman,
}

static TABLES: OnceLock<Tables> = OnceLock::new();

fn tables() -> &'static Tables {
    TABLES.get_or_init(|| Tables {
        literal: Huffman::from_run_lengths(&LITERAL_LENGTHS),
        length: Huffman::from_run_lengths(&LENGTH_LENGTHS),
        distance: Huffman::from_run_lengths(&DISTANCE_LENGTHS),
    })
}

/// LSB-first bit reader.
struct BitReader<'a> {
    input: &'a [u8],
    position: usize,
    buffer: u32,
    available: u32,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            position: 0,
            buffer: 0,
            available: 0,
        }
    }

    /// Read `need` bits (at most 8).
    fn read(&mut self, need: u32) -> Result<u32, ExplodeError> {
        let mut value = self.buffer;
        while self.available < need {
            let byte = *self
                .input
                .get(self.position)
                .ok_or(ExplodeError::UnexpectedEnd)?;
            self.position += 1;
            value |= u32::from(byte) << self.available;
            self.available += 8;
        }

        self.buffer = value >> need;
        self.available -= need;
        Ok(value & ((1 << need) - 1))
    }
}

/// Explode a DCL stream into at most `limit` bytes.
///
/// Decoding stops at the end-of-stream code or once `limit` bytes have been
/// produced, whichever comes first.
pub fn explode(input: &[u8], limit: usize) -> Result<Vec<u8>, ExplodeError> {
    let tables = tables();
    let mut bits = BitReader::new(input);

    let literal_mode = bits.read(8)?;
    if literal_mode > 1 {
        return Err(ExplodeError::LiteralMode(literal_mode));
    }
    let dictionary = bits.read(8)?;
    if !(4..=6).contains(&dictionary) {
        return Err(ExplodeError::DictionarySize(dictionary));
    }

    let mut output = Vec::with_capacity(limit);
    while output.len() < limit {
        if bits.read(1)? == 0 {
            let literal = if literal_mode == 1 {
                tables.literal.decode(&mut bits)? as u8
            } else {
                bits.read(8)? as u8
            };
            output.push(literal);
            continue;
        }

        let symbol = tables.length.decode(&mut bits)?;
        let length = usize::from(LENGTH_BASE[symbol])
            + bits.read(u32::from(LENGTH_EXTRA[symbol]))? as usize;
        if length == END_OF_STREAM {
            break;
        }

        let shift = if length == 2 { 2 } else { dictionary };
        let distance = ((tables.distance.decode(&mut bits)? << shift)
            | bits.read(shift)? as usize)
            + 1;
        if distance > output.len() {
            return Err(ExplodeError::DistanceTooFar {
                distance,
                available: output.len(),
            });
        }

        // Byte by byte: the source may overlap what is being written.
        let start = output.len() - distance;
        let length = length.min(limit - output.len());
        for i in 0..length {
            let byte = output[start + i];
            output.push(byte);
        }
    }

    Ok(output)
}
