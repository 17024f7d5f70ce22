//! chunkmap/bitmap — DivergenceBitmap: one immutable point-in-time view.
//!
//! Representation: 64-bit words, word w holds chunks [64w, 64w+64), bit (i % 64)
//! inside the word. Serialized little-endian, so on disk chunk i sits in byte
//! i / 8, bit i % 8. The word vector always spans whole metadata sectors.

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{BITMAP_WORD_BITS, SECTOR_SIZE, WORDS_PER_SECTOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergenceBitmap {
    words: Vec<u64>,
    nr_chunks: u64,
}

impl DivergenceBitmap {
    /// All-clear bitmap covering `nr_chunks`, padded to `sectors` metadata sectors.
    pub fn zeroed(nr_chunks: u64, sectors: u64) -> Self {
        let words = vec![0u64; sectors as usize * WORDS_PER_SECTOR];
        debug_assert!(words.len() as u64 * BITMAP_WORD_BITS >= nr_chunks);
        Self { words, nr_chunks }
    }

    /// Decode persisted sectors. `bytes` must be a whole number of sectors.
    pub fn from_le_bytes(nr_chunks: u64, bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len() % SECTOR_SIZE, 0);
        let mut words = vec![0u64; bytes.len() / 8];
        LittleEndian::read_u64_into(bytes, &mut words);
        Self { words, nr_chunks }
    }

    pub fn nr_chunks(&self) -> u64 {
        self.nr_chunks
    }

    /// Number of metadata sectors this bitmap spans.
    pub fn sectors(&self) -> u64 {
        (self.words.len() / WORDS_PER_SECTOR) as u64
    }

    /// O(1) bit test. Indices past `nr_chunks` read as "not diverged".
    #[inline]
    pub fn test(&self, chunk: u64) -> bool {
        if chunk >= self.nr_chunks {
            return false;
        }
        let w = (chunk / BITMAP_WORD_BITS) as usize;
        let b = chunk % BITMAP_WORD_BITS;
        (self.words[w] >> b) & 1 == 1
    }

    /// Copy of this bitmap with `chunk` set to `on`.
    pub fn with_bit(&self, chunk: u64, on: bool) -> Self {
        let mut next = self.clone();
        next.assign(chunk, on);
        next
    }

    fn assign(&mut self, chunk: u64, on: bool) {
        debug_assert!(chunk < self.nr_chunks);
        let w = (chunk / BITMAP_WORD_BITS) as usize;
        let mask = 1u64 << (chunk % BITMAP_WORD_BITS);
        if on {
            self.words[w] |= mask;
        } else {
            self.words[w] &= !mask;
        }
    }

    pub fn count_diverged(&self) -> u64 {
        let total: u64 = self.words.iter().map(|w| w.count_ones() as u64).sum();
        total - self.padding_bits_set()
    }

    /// Diverged chunk indices in ascending order.
    pub fn diverged(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(move |(wi, &word)| {
            let base = wi as u64 * BITMAP_WORD_BITS;
            (0..BITMAP_WORD_BITS)
                .filter(move |b| (word >> b) & 1 == 1)
                .map(move |b| base + b)
                .filter(move |&c| c < self.nr_chunks)
        })
    }

    /// Bits set at or beyond `nr_chunks`. Zero on a healthy device.
    pub fn padding_bits_set(&self) -> u64 {
        let first_pad_word = (self.nr_chunks / BITMAP_WORD_BITS) as usize;
        let mut n = 0u64;
        for (wi, &word) in self.words.iter().enumerate().skip(first_pad_word) {
            let base = wi as u64 * BITMAP_WORD_BITS;
            let pad = if base >= self.nr_chunks {
                word
            } else {
                let keep = self.nr_chunks - base;
                word & !((1u64 << keep) - 1)
            };
            n += pad.count_ones() as u64;
        }
        n
    }

    /// Encode one metadata sector.
    pub fn sector_le_bytes(&self, sector: u64) -> [u8; SECTOR_SIZE] {
        let start = sector as usize * WORDS_PER_SECTOR;
        let mut out = [0u8; SECTOR_SIZE];
        LittleEndian::write_u64_into(&self.words[start..start + WORDS_PER_SECTOR], &mut out);
        out
    }

    /// Encode the whole bitmap (all spanned sectors).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.words.len() * 8];
        LittleEndian::write_u64_into(&self.words, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_disk_bit_position_is_byte_then_bit() {
        let bm = DivergenceBitmap::zeroed(100, 1).with_bit(1, true).with_bit(9, true);
        let sec = bm.sector_le_bytes(0);
        assert_eq!(sec[0], 0b0000_0010);
        assert_eq!(sec[1], 0b0000_0010);
        assert!(sec[2..].iter().all(|&b| b == 0));

        let back = DivergenceBitmap::from_le_bytes(100, &bm.to_le_bytes());
        assert_eq!(back, bm);
    }

    #[test]
    fn with_bit_leaves_original_untouched() {
        let a = DivergenceBitmap::zeroed(8, 1);
        let b = a.with_bit(3, true);
        assert!(!a.test(3));
        assert!(b.test(3));
        assert!(!b.with_bit(3, false).test(3));
    }

    #[test]
    fn padding_is_ignored_by_test_and_counted_by_check() {
        let mut bytes = vec![0u8; SECTOR_SIZE];
        bytes[0] = 0b1000_0001; // chunk 0 and chunk 7
        bytes[1] = 0b0000_0001; // chunk 8 -> padding for nr_chunks = 8
        let bm = DivergenceBitmap::from_le_bytes(8, &bytes);
        assert!(bm.test(0));
        assert!(bm.test(7));
        assert!(!bm.test(8));
        assert_eq!(bm.padding_bits_set(), 1);
        assert_eq!(bm.count_diverged(), 2);
        assert_eq!(bm.diverged().collect::<Vec<_>>(), vec![0, 7]);
    }

    #[test]
    fn high_sector_encoding() {
        let bm = DivergenceBitmap::zeroed(4096 * 2, 2).with_bit(4096 + 3, true);
        assert!(bm.sector_le_bytes(0).iter().all(|&b| b == 0));
        let s1 = bm.sector_le_bytes(1);
        assert_eq!(s1[0], 0b0000_1000);
    }
}
