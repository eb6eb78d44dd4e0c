//! The 16-bit machine word.
//!
//! Every memory cell, register value and stack slot is a [`Word`]. The same
//! bits are read either as an unsigned address (0..=65535) or as a signed
//! two's-complement integer (-32768..=32767); which view applies is decided
//! by the instruction using the word, never implicitly.

use std::fmt;
use serde::{Serialize, Deserialize};

/// A 16-bit storage cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Word(u16);

impl Word {
    /// The all-zero word.
    pub const ZERO: Word = Word(0);

    /// Create a word from its raw bits.
    #[inline]
    pub const fn from_raw(bits: u16) -> Self {
        Self(bits)
    }

    /// Create a word holding a signed value.
    #[inline]
    pub const fn from_signed(value: i16) -> Self {
        Self(value as u16)
    }

    /// The raw bit pattern.
    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Address view: the bits as an unsigned index into memory.
    #[inline]
    pub const fn as_address(self) -> u16 {
        self.0
    }

    /// Value view: the bits as a two's-complement integer.
    #[inline]
    pub const fn as_signed(self) -> i16 {
        self.0 as i16
    }

    /// Check if this word is zero.
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Low byte (first character of a packed pair).
    #[inline]
    pub const fn low_byte(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// High byte (second character of a packed pair).
    #[inline]
    pub const fn high_byte(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Pack two bytes into one word, `low` first.
    #[inline]
    pub const fn from_bytes(low: u8, high: u8) -> Self {
        Self(low as u16 | (high as u16) << 8)
    }

    /// Signed addition, wrapping at 16 bits.
    #[inline]
    pub fn wrapping_add(self, rhs: Word) -> Word {
        Word::from_signed(self.as_signed().wrapping_add(rhs.as_signed()))
    }

    /// Signed subtraction, wrapping at 16 bits.
    #[inline]
    pub fn wrapping_sub(self, rhs: Word) -> Word {
        Word::from_signed(self.as_signed().wrapping_sub(rhs.as_signed()))
    }

    /// Signed multiplication, keeping the low 16 bits of the product.
    #[inline]
    pub fn wrapping_mul(self, rhs: Word) -> Word {
        Word::from_signed(self.as_signed().wrapping_mul(rhs.as_signed()))
    }

    /// Signed division truncating toward zero.
    ///
    /// Returns `None` for a zero divisor. `-32768 / -1` wraps to `-32768`.
    #[inline]
    pub fn checked_div(self, rhs: Word) -> Option<Word> {
        if rhs.is_zero() {
            return None;
        }
        Some(Word::from_signed(self.as_signed().wrapping_div(rhs.as_signed())))
    }
}

impl From<u16> for Word {
    fn from(bits: u16) -> Self {
        Word(bits)
    }
}

impl From<i16> for Word {
    fn from(value: i16) -> Self {
        Word::from_signed(value)
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({:#06x} = {})", self.0, self.as_signed())
    }
}

/// Displays the value view.
impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_signed(), f)
    }
}

impl fmt::LowerHex for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dual_views() {
        let w = Word::from_signed(-1);
        assert_eq!(w.as_address(), 65535);
        assert_eq!(w.as_signed(), -1);

        let w = Word::from_raw(0x8000);
        assert_eq!(w.as_address(), 32768);
        assert_eq!(w.as_signed(), -32768);
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let max = Word::from_signed(i16::MAX);
        let one = Word::from_signed(1);
        assert_eq!(max.wrapping_add(one).as_signed(), i16::MIN);
        assert_eq!(Word::from_signed(i16::MIN).wrapping_sub(one).as_signed(), i16::MAX);
        assert_eq!(Word::from_signed(300).wrapping_mul(Word::from_signed(300)).as_signed(), 24464);
    }

    #[test]
    fn test_division() {
        let seven = Word::from_signed(-7);
        assert_eq!(seven.checked_div(Word::from_signed(2)).unwrap().as_signed(), -3);
        assert_eq!(seven.checked_div(Word::ZERO), None);
        assert_eq!(
            Word::from_signed(i16::MIN).checked_div(Word::from_signed(-1)).unwrap().as_signed(),
            i16::MIN
        );
    }

    #[test]
    fn test_byte_packing() {
        let w = Word::from_bytes(b'H', b'e');
        assert_eq!(w.raw(), u16::from(b'H') | u16::from(b'e') << 8);
        assert_eq!(w.low_byte(), b'H');
        assert_eq!(w.high_byte(), b'e');
    }

    #[test]
    fn test_display_uses_signed_view() {
        assert_eq!(format!("{}", Word::from_raw(0xffff)), "-1");
        assert_eq!(format!("{:04x}", Word::from_raw(0xbeef)), "beef");
    }
}
