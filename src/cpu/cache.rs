//! Direct-mapped write-back cache in front of main memory.
//!
//! The cache has 32 one-word lines; `address % 32` picks the line. Writes
//! allocate a line and are buffered there until the line is evicted, so
//! main memory may hold stale values for dirty resident addresses. All
//! program-visible memory traffic goes through [`Cache::read`] and
//! [`Cache::write`], which also maintain the [`Statistics`] counters.

use crate::cpu::memory::{MainMemory, MemoryError};
use crate::cpu::stats::Statistics;
use crate::word::Word;
use serde::{Serialize, Deserialize};

/// The number of cache lines.
pub const CACHE_LINES: usize = 32;

/// One cache line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLine {
    /// Address of the word held in this line.
    pub tag: u16,
    /// The cached word.
    pub contents: Word,
    /// Contents differ from main memory and must be written back on eviction.
    pub dirty: bool,
    /// The line has been filled by at least one access.
    pub valid: bool,
}

impl CacheLine {
    /// A line that has never been accessed. The tag is the highest address
    /// but is ignored until the line becomes valid.
    pub const EMPTY: CacheLine = CacheLine {
        tag: u16::MAX,
        contents: Word::ZERO,
        dirty: false,
        valid: false,
    };

    /// Does this line currently hold `addr`?
    #[inline]
    pub fn holds(&self, addr: u16) -> bool {
        self.valid && self.tag == addr
    }
}

impl Default for CacheLine {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Map an address to its line index.
#[inline]
pub fn line_index(addr: u16) -> usize {
    usize::from(addr) % CACHE_LINES
}

/// The cache together with the main memory it fronts.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cache {
    lines: [CacheLine; CACHE_LINES],
    memory: MainMemory,
    stats: Statistics,
}

impl Cache {
    /// Create an empty cache over zeroed memory.
    pub fn new() -> Self {
        Self::with_memory(MainMemory::new())
    }

    /// Create an empty cache over existing memory.
    pub fn with_memory(memory: MainMemory) -> Self {
        Self {
            lines: [CacheLine::EMPTY; CACHE_LINES],
            memory,
            stats: Statistics::new(),
        }
    }

    /// Zero memory, load an image, and invalidate every line.
    pub fn load_image(&mut self, image: &[Word]) -> Result<(), MemoryError> {
        self.memory.load_image(image)?;
        self.invalidate();
        Ok(())
    }

    /// Read a word through the cache.
    pub fn read(&mut self, addr: u16) -> Word {
        let index = line_index(addr);

        if self.lines[index].holds(addr) {
            self.stats.cache_hits += 1;
            return self.lines[index].contents;
        }

        self.stats.cache_misses += 1;
        self.write_back(index);

        self.stats.main_memory_reads += 1;
        let contents = self.memory.read(addr);
        self.lines[index] = CacheLine {
            tag: addr,
            contents,
            dirty: false,
            valid: true,
        };
        contents
    }

    /// Write a word through the cache.
    ///
    /// The value stays in the cache; main memory sees it only when the line
    /// is evicted or flushed.
    pub fn write(&mut self, addr: u16, value: Word) {
        let index = line_index(addr);

        if !self.lines[index].holds(addr) {
            self.write_back(index);
            self.lines[index].tag = addr;
            self.lines[index].valid = true;
        }

        self.lines[index].contents = value;
        self.lines[index].dirty = true;
    }

    /// Write a dirty line back to main memory at its old tag.
    fn write_back(&mut self, index: usize) {
        let line = self.lines[index];
        if line.valid && line.dirty {
            self.memory.write(line.tag, line.contents);
            self.stats.main_memory_writes += 1;
            self.lines[index].dirty = false;
        }
    }

    /// Write every dirty line back to main memory. Lines stay resident.
    pub fn flush(&mut self) {
        for index in 0..CACHE_LINES {
            self.write_back(index);
        }
    }

    /// The coherent value at `addr`, without touching lines or counters.
    pub fn peek(&self, addr: u16) -> Word {
        let line = &self.lines[line_index(addr)];
        if line.holds(addr) {
            line.contents
        } else {
            self.memory.read(addr)
        }
    }

    /// Coherent values for up to `count` addresses from `start`, stopping at
    /// the end of memory. Touches no lines or counters.
    pub fn peek_range(&self, start: u16, count: usize) -> Vec<Word> {
        (usize::from(start)..usize::from(start).saturating_add(count))
            .map_while(|addr| u16::try_from(addr).ok())
            .map(|addr| self.peek(addr))
            .collect()
    }

    /// Drop every line without writing anything back.
    fn invalidate(&mut self) {
        self.lines = [CacheLine::EMPTY; CACHE_LINES];
    }

    /// The current line array.
    pub fn lines(&self) -> &[CacheLine; CACHE_LINES] {
        &self.lines
    }

    /// The backing memory. May be stale for dirty resident lines.
    pub fn memory(&self) -> &MainMemory {
        &self.memory
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Reset the counters without touching the lines.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resident = self.lines.iter().filter(|l| l.valid).count();
        let dirty = self.lines.iter().filter(|l| l.valid && l.dirty).count();

        f.debug_struct("Cache")
            .field("resident", &resident)
            .field("dirty", &dirty)
            .field("stats", &self.stats)
            .finish()
    }
}
