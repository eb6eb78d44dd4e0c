//! The stack machine.
//!
//! - 65,536 words of main memory behind a 32-line direct-mapped cache
//! - 3 control registers: PC, SP (downward-growing stack), FP
//! - 17 opcodes, each one word plus an optional operand word

pub mod memory;
pub mod cache;
pub mod stats;
pub mod registers;
pub mod decode;
pub mod execute;

pub use memory::{MainMemory, MemoryError, MEMORY_WORDS};
pub use cache::{Cache, CacheLine, CACHE_LINES};
pub use stats::Statistics;
pub use registers::Registers;
pub use decode::{Instruction, Opcode, OperandKind, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, Snapshot};
