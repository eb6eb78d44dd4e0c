//! Memory traffic counters.

use std::fmt;
use std::io::{self, Write};
use serde::{Serialize, Deserialize};

/// The four counters maintained by the cache.
///
/// Hits and misses are only counted on reads. Writes never count as a hit or
/// a miss; they only show up here when a dirty line is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Statistics {
    /// Words fetched from main memory into the cache.
    pub main_memory_reads: u64,
    /// Dirty words written back from the cache into main memory.
    pub main_memory_writes: u64,
    /// Reads satisfied by the cache.
    pub cache_hits: u64,
    /// Reads that had to go to main memory.
    pub cache_misses: u64,
}

impl Statistics {
    /// Create a zeroed set of counters.
    pub const fn new() -> Self {
        Self {
            main_memory_reads: 0,
            main_memory_writes: 0,
            cache_hits: 0,
            cache_misses: 0,
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Total reads served, hit or miss.
    pub fn reads(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    /// Write the counter lines followed by `@exit(N)`.
    ///
    /// The exit line has no trailing newline and is left out when the
    /// machine produced no result.
    pub fn write_report(&self, out: &mut dyn Write, exit_value: Option<i16>) -> io::Result<()> {
        write!(out, "{}", self)?;
        if let Some(value) = exit_value {
            write!(out, "@exit({})", value)?;
        }
        Ok(())
    }
}

/// The end-of-run report, one tagged line per counter.
///
/// The main-memory tags carry `(fast-jeq)`: an untaken JEQ never reads its
/// target word.
impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "@number-of-main-memory-reads-(fast-jeq)\t{}", self.main_memory_reads)?;
        writeln!(f, "@number-of-main-memory-writes-(fast-jeq)\t{}", self.main_memory_writes)?;
        writeln!(f, "@number-of-cache-memory-hits\t{}", self.cache_hits)?;
        writeln!(f, "@number-of-cache-memory-misses\t{}", self.cache_misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_format() {
        let stats = Statistics {
            main_memory_reads: 3,
            main_memory_writes: 1,
            cache_hits: 4,
            cache_misses: 3,
        };
        let report = stats.to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines, [
            "@number-of-main-memory-reads-(fast-jeq)\t3",
            "@number-of-main-memory-writes-(fast-jeq)\t1",
            "@number-of-cache-memory-hits\t4",
            "@number-of-cache-memory-misses\t3",
        ]);
        assert_eq!(stats.reads(), 7);
    }

    #[test]
    fn test_report_ends_without_newline() {
        let stats = Statistics { cache_misses: 2, ..Statistics::new() };
        let mut out = Vec::new();
        stats.write_report(&mut out, Some(-3)).unwrap();

        let report = String::from_utf8(out).unwrap();
        assert!(report.ends_with("@number-of-cache-memory-misses\t2\n@exit(-3)"));
    }

    #[test]
    fn test_report_after_fault_has_no_exit_line() {
        let mut out = Vec::new();
        Statistics::new().write_report(&mut out, None).unwrap();

        let report = String::from_utf8(out).unwrap();
        assert_eq!(report.lines().count(), 4);
        assert!(!report.contains("@exit"));
    }

    #[test]
    fn test_report_surfaces_write_errors() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let err = Statistics::new().write_report(&mut Closed, Some(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_reset() {
        let mut stats = Statistics { cache_hits: 9, ..Statistics::new() };
        stats.reset();
        assert_eq!(stats, Statistics::default());
    }
}
