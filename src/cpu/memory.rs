//! Main memory: the system of record behind the cache.
//!
//! 65,536 sixteen-bit words, addressed 0..=65535. Outside of image loading,
//! only the cache's write-back path touches these cells.

use crate::word::Word;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The number of words of main memory.
pub const MEMORY_WORDS: usize = 1 << 16;

/// Main memory: 65,536 words.
#[derive(Clone, Serialize, Deserialize)]
pub struct MainMemory {
    cells: Vec<Word>,
}

impl MainMemory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![Word::ZERO; MEMORY_WORDS],
        }
    }

    /// Read a cell. Every `u16` is a valid address.
    #[inline]
    pub fn read(&self, addr: u16) -> Word {
        self.cells[usize::from(addr)]
    }

    /// Write a cell.
    #[inline]
    pub fn write(&mut self, addr: u16, value: Word) {
        self.cells[usize::from(addr)] = value;
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(Word::ZERO);
    }

    /// Zero memory, then copy `image` in starting at address 0.
    pub fn load_image(&mut self, image: &[Word]) -> Result<(), MemoryError> {
        if image.len() > MEMORY_WORDS {
            return Err(MemoryError::ImageTooLarge {
                size: image.len(),
                available: MEMORY_WORDS,
            });
        }

        self.clear();
        self.cells[..image.len()].copy_from_slice(image);
        Ok(())
    }

    /// Dump memory contents (for debugging).
    pub fn dump(&self, start: u16, count: usize) -> Vec<(u16, Word)> {
        let start_idx = usize::from(start);
        let end = (start_idx + count).min(MEMORY_WORDS);
        (start_idx..end)
            .map(|i| (i as u16, self.cells[i]))
            .collect()
    }
}

impl Default for MainMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MainMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|cell| !cell.is_zero()).count();

        f.debug_struct("MainMemory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_WORDS)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("image of {size} words exceeds memory of {available} words")]
    ImageTooLarge { size: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = MainMemory::new();
        mem.write(10, Word::from_signed(42));
        assert_eq!(mem.read(10).as_signed(), 42);
        assert!(mem.read(11).is_zero());
    }

    #[test]
    fn test_highest_address() {
        let mut mem = MainMemory::new();
        mem.write(u16::MAX, Word::from_signed(-5));
        assert_eq!(mem.read(u16::MAX).as_signed(), -5);
    }

    #[test]
    fn test_load_image_zeroes_the_rest() {
        let mut mem = MainMemory::new();
        mem.write(500, Word::from_raw(7));

        let image = [Word::from_raw(1), Word::from_raw(2), Word::from_raw(3)];
        mem.load_image(&image).unwrap();

        assert_eq!(mem.read(0).raw(), 1);
        assert_eq!(mem.read(2).raw(), 3);
        assert!(mem.read(3).is_zero());
        assert!(mem.read(500).is_zero());
    }

    #[test]
    fn test_load_image_too_large() {
        let mut mem = MainMemory::new();
        let image = vec![Word::ZERO; MEMORY_WORDS + 1];
        assert_eq!(
            mem.load_image(&image),
            Err(MemoryError::ImageTooLarge { size: MEMORY_WORDS + 1, available: MEMORY_WORDS })
        );
    }

    #[test]
    fn test_dump_clamps_at_top() {
        let mem = MainMemory::new();
        assert_eq!(mem.dump(65534, 10).len(), 2);
    }
}
