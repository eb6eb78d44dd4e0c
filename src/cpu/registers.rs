//! Control registers.
//!
//! The machine has three registers:
//! - PC: address of the next word to fetch
//! - SP: address of the top-of-stack word; the stack grows downward
//! - FP: base of the current call frame
//!
//! PC and SP are held wider than a word so they can name one-past-the-end.
//! An SP of [`STACK_EMPTY`] means nothing has been pushed yet; reading the
//! top of stack in that state is a fault, not an access to address 65536.

use crate::cpu::execute::CpuError;
use crate::cpu::memory::MEMORY_WORDS;
use serde::{Serialize, Deserialize};

/// SP value for an empty stack: one past the highest address.
pub const STACK_EMPTY: u32 = MEMORY_WORDS as u32;

/// Convert a computed address to a memory index, or fault.
pub fn checked_address(what: &'static str, address: i64) -> Result<u16, CpuError> {
    u16::try_from(address).map_err(|_| CpuError::AddressOutOfRange { what, address })
}

/// The register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Program counter.
    pub pc: u32,
    /// Stack pointer.
    pub sp: u32,
    /// Frame pointer.
    pub fp: u16,
}

impl Registers {
    /// PC = 0, empty stack, FP = 0.
    pub fn new() -> Self {
        Self {
            pc: 0,
            sp: STACK_EMPTY,
            fp: 0,
        }
    }

    /// Reset all registers to their power-on values.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The address PC currently names.
    pub fn pc_address(&self) -> Result<u16, CpuError> {
        checked_address("PC", i64::from(self.pc))
    }

    /// Increment the program counter by 1.
    /// Returns the old value.
    pub fn advance_pc(&mut self) -> u32 {
        let old = self.pc;
        self.pc += 1;
        old
    }

    /// Set the program counter to an absolute address.
    pub fn jump(&mut self, addr: u16) {
        self.pc = u32::from(addr);
    }

    /// Is the stack empty?
    pub fn stack_is_empty(&self) -> bool {
        self.sp >= STACK_EMPTY
    }

    /// Address of the top-of-stack word.
    pub fn top_of_stack(&self) -> Result<u16, CpuError> {
        if self.stack_is_empty() {
            return Err(CpuError::EmptyStack);
        }
        checked_address("SP", i64::from(self.sp))
    }

    /// Move SP down one word for a push and return the new top address.
    pub fn grow_stack(&mut self) -> Result<u16, CpuError> {
        if self.sp == 0 {
            return Err(CpuError::StackOverflow);
        }
        self.sp -= 1;
        checked_address("SP", i64::from(self.sp))
    }

    /// Move SP up one word after a pop.
    pub fn shrink_stack(&mut self) {
        self.sp += 1;
    }

    /// Compute FP + offset.
    pub fn frame_address(&self, offset: i16) -> Result<u16, CpuError> {
        checked_address("FP+offset", i64::from(self.fp) + i64::from(offset))
    }

    /// Number of words currently on the stack.
    pub fn stack_depth(&self) -> u32 {
        STACK_EMPTY.saturating_sub(self.sp)
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_values() {
        let regs = Registers::new();
        assert_eq!(regs.pc, 0);
        assert_eq!(regs.fp, 0);
        assert!(regs.stack_is_empty());
        assert_eq!(regs.stack_depth(), 0);
    }

    #[test]
    fn test_empty_stack_faults() {
        let regs = Registers::new();
        assert!(matches!(regs.top_of_stack(), Err(CpuError::EmptyStack)));
    }

    #[test]
    fn test_grow_and_shrink() {
        let mut regs = Registers::new();
        assert_eq!(regs.grow_stack().unwrap(), 65535);
        assert_eq!(regs.grow_stack().unwrap(), 65534);
        assert_eq!(regs.top_of_stack().unwrap(), 65534);
        assert_eq!(regs.stack_depth(), 2);

        regs.shrink_stack();
        regs.shrink_stack();
        assert!(regs.stack_is_empty());
    }

    #[test]
    fn test_stack_overflow() {
        let mut regs = Registers::new();
        regs.sp = 0;
        assert!(matches!(regs.grow_stack(), Err(CpuError::StackOverflow)));
    }

    #[test]
    fn test_frame_address() {
        let mut regs = Registers::new();
        regs.fp = 100;
        assert_eq!(regs.frame_address(2).unwrap(), 102);
        assert_eq!(regs.frame_address(-100).unwrap(), 0);
        assert!(matches!(
            regs.frame_address(-101),
            Err(CpuError::AddressOutOfRange { what: "FP+offset", address: -1 })
        ));

        regs.fp = u16::MAX;
        assert!(regs.frame_address(1).is_err());
    }

    #[test]
    fn test_advance_pc() {
        let mut regs = Registers::new();
        regs.pc = 10;

        let old = regs.advance_pc();
        assert_eq!(old, 10);
        assert_eq!(regs.pc, 11);

        regs.pc = 65535;
        regs.advance_pc();
        assert!(matches!(
            regs.pc_address(),
            Err(CpuError::AddressOutOfRange { what: "PC", address: 65536 })
        ));
    }
}
