use super::*;
use common::*;
use error::CacheError;

/// One sector worth of memory, the unit of caching and disk transfer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    data: Box<[u8; BSIZE]>,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            data: Box::new([0; BSIZE]),
        }
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Page({:02x?}..)", &self.data[..16])
    }
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// page[offset..offset + buf.len()] -> buf
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<(), CacheError> {
        let end = Self::span(offset, buf.len())?;
        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    /// buf -> page[offset..offset + buf.len()]
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<(), CacheError> {
        let end = Self::span(offset, buf.len())?;
        self.data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    /// Replace the whole page: `buf` at the front, zeros after it.
    pub fn set_bytes(&mut self, buf: &[u8]) -> Result<(), CacheError> {
        Self::span(0, buf.len())?;
        self.data[..buf.len()].copy_from_slice(buf);
        self.data[buf.len()..].fill(0);
        Ok(())
    }

    fn span(offset: usize, len: usize) -> Result<usize, CacheError> {
        match offset.checked_add(len) {
            Some(end) if end <= BSIZE => Ok(end),
            _ => Err(CacheError::PageBounds { offset, len }),
        }
    }
}

/// Which frames of the pool hold a page. Lowest free frame first.
#[derive(Debug, Clone)]
pub struct FrameTable {
    words: Vec<u64>,
    frames: usize,
}

impl FrameTable {
    pub fn new(frames: usize) -> Self {
        Self {
            words: vec![0; frames.div_ceil(64)],
            frames,
        }
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let (word, bit) = self
            .words
            .iter()
            .enumerate()
            .find_map(|(i, &bits)| (bits != u64::MAX).then_some((i, bits.trailing_ones())))?;
        let frame = word * 64 + bit as usize;
        if frame >= self.frames {
            return None; // memory full
        }
        self.words[word] |= 1 << bit;
        Some(frame)
    }

    pub fn free(&mut self, frame: usize) {
        assert!(frame < self.frames, "frame {frame} out of pool");
        self.words[frame / 64] &= !(1 << (frame % 64));
    }

    pub fn allocated(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn capacity(&self) -> usize {
        self.frames
    }

    pub fn is_full(&self) -> bool {
        self.allocated() == self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds() {
        let mut page = Page::new();
        page.write_at(BSIZE - 2, &[1, 2]).unwrap();
        assert!(matches!(
            page.write_at(BSIZE - 1, &[1, 2]),
            Err(CacheError::PageBounds {
                offset: 4095,
                len: 2
            })
        ));

        let mut buf = [0; 2];
        page.read_at(BSIZE - 2, &mut buf).unwrap();
        assert_eq!([1, 2], buf);
    }

    #[test]
    fn set_bytes_zero_fills() {
        let mut page = Page::new();
        page.as_bytes_mut().fill(0xff);
        page.set_bytes(&[7; 10]).unwrap();
        assert_eq!(&[7; 10], &page.as_bytes()[..10]);
        assert!(page.as_bytes()[10..].iter().all(|&b| b == 0));
        assert!(page.set_bytes(&vec![0; BSIZE + 1]).is_err());
    }

    #[test]
    fn frames_first_fit() {
        let mut table = FrameTable::new(70);
        for i in 0..70 {
            assert_eq!(Some(i), table.alloc());
        }
        assert_eq!(None, table.alloc());
        assert!(table.is_full());

        table.free(65);
        table.free(3);
        assert_eq!(Some(3), table.alloc());
        assert_eq!(Some(65), table.alloc());
        assert_eq!(70, table.allocated());
    }
}
