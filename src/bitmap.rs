use super::*;
use common::*;
use error::FsError;

/// A one-sector bitmap, used for free blocks and for free inodes.
///
/// Bit `i` lives in byte `i / 8`, most significant bit first. A set bit means
/// the resource is allocated.
#[derive(Clone, PartialEq, Eq)]
pub struct BitmapBlock {
    bytes: Box<[u8; BSIZE]>,
}

impl Default for BitmapBlock {
    fn default() -> Self {
        Self {
            bytes: Box::new([0; BSIZE]),
        }
    }
}

impl std::fmt::Debug for BitmapBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapBlock")
            .field("used", &self.num_used())
            .finish()
    }
}

fn locate(index: usize) -> (usize, u8) {
    assert!(index < BPB, "bit {index} outside the bitmap");
    (index / 8, 0x80 >> (index % 8))
}

impl BitmapBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, FsError> {
        if buf.len() != BSIZE {
            return Err(FsError::Corrupt {
                what: "bitmap block",
                why: format!("{} bytes instead of {BSIZE}", buf.len()),
            });
        }
        let mut bitmap = Self::new();
        bitmap.bytes.copy_from_slice(buf);
        Ok(bitmap)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    pub fn get(&self, index: usize) -> bool {
        let (byte, mask) = locate(index);
        self.bytes[byte] & mask != 0
    }

    pub fn set(&mut self, index: usize) {
        self.set_to(index, true);
    }

    pub fn unset(&mut self, index: usize) {
        self.set_to(index, false);
    }

    pub fn set_to(&mut self, index: usize, value: bool) {
        let (byte, mask) = locate(index);
        if value {
            self.bytes[byte] |= mask;
        } else {
            self.bytes[byte] &= !mask;
        }
    }

    /// Set and return the lowest clear bit, `None` when every bit is set.
    pub fn allocate(&mut self) -> Option<usize> {
        let byte = self.bytes.iter().position(|&b| b != u8::MAX)?;
        let bit = self.bytes[byte].leading_ones() as usize;
        let index = byte * 8 + bit;
        self.set(index);
        Some(index)
    }

    pub fn num_used(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn num_free(&self) -> usize {
        BPB - self.num_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_first_fit() {
        let mut bitmap = BitmapBlock::new();
        bitmap.set(0);
        bitmap.set(1);
        bitmap.set(3);
        assert_eq!(Some(2), bitmap.allocate());
        assert_eq!(Some(4), bitmap.allocate());
        assert!(bitmap.get(4));

        bitmap.unset(1);
        assert_eq!(Some(1), bitmap.allocate());
    }

    #[test]
    fn allocate_until_full() {
        let mut bitmap = BitmapBlock::new();
        for i in 0..BPB {
            assert_eq!(Some(i), bitmap.allocate());
        }
        assert_eq!(None, bitmap.allocate());
        assert_eq!(BPB, bitmap.num_used());
        assert_eq!(0, bitmap.num_free());
    }

    #[test]
    fn msb_first_layout() {
        let mut bitmap = BitmapBlock::new();
        bitmap.set(0);
        bitmap.set(9);
        let bytes = bitmap.encode();
        assert_eq!(0x80, bytes[0]);
        assert_eq!(0x40, bytes[1]);
    }

    #[test]
    fn round_trip() {
        let mut bitmap = BitmapBlock::new();
        for i in [0, 7, 8, 1000, BPB - 1] {
            bitmap.set(i);
        }
        let decoded = BitmapBlock::decode(&bitmap.encode()).unwrap();
        assert_eq!(bitmap, decoded);
        assert_eq!(5, decoded.num_used());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(BitmapBlock::decode(&[0; 10]).is_err());
    }
}
