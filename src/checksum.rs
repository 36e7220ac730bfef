//! Word-oriented CRC-32 matching the STM32 hardware CRC unit.
//!
//! The peripheral consumes 32-bit words, feeding each word MSB first
//! through the CRC-32/MPEG-2 polynomial `0x04C11DB7`. Words are assembled
//! little-endian from the byte stream, and a trailing partial word is
//! padded with zero bytes. There is no input/output reflection and no
//! final XOR, so the result differs from the zlib/PNG CRC-32.

/// Generator polynomial of the hardware CRC unit.
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Reset value of the hardware CRC unit.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

/// Running accumulator for one checksum computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumState {
    accumulator: u32,
}

impl ChecksumState {
    pub fn new(seed: u32) -> Self {
        Self { accumulator: seed }
    }

    /// Feeds one 32-bit word, most significant bit first.
    pub fn update_word(&mut self, word: u32) {
        let mut crc = self.accumulator;
        let mut bit = 0x8000_0000u32;

        while bit != 0 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            if word & bit != 0 {
                crc ^= POLYNOMIAL;
            }
            bit >>= 1;
        }

        self.accumulator = crc;
    }

    pub fn finish(self) -> u32 {
        self.accumulator
    }
}

impl Default for ChecksumState {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

/// Computes the checksum of the first `length` bytes of `data`.
///
/// Processing covers `ceil(length / 4)` words. Positions past `length`
/// in the last word, and any position past the end of `data`, read as
/// zero. A `length` of zero returns `seed` untouched.
pub fn compute(data: &[u8], length: usize, seed: u32) -> u32 {
    let mut state = ChecksumState::new(seed);
    let words = length.div_ceil(4);

    for i in 0..words {
        let mut word = [0u8; 4];
        for (j, byte) in word.iter_mut().enumerate() {
            let idx = i * 4 + j;
            if idx < length {
                *byte = data.get(idx).copied().unwrap_or(0);
            }
        }
        state.update_word(u32::from_le_bytes(word));
    }

    state.finish()
}

/// Checksum of the whole buffer with the hardware reset seed.
pub fn checksum(data: &[u8]) -> u32 {
    compute(data, data.len(), DEFAULT_SEED)
}
