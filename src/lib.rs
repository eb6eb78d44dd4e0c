//! # runcool
//!
//! An emulator for a small stack-oriented virtual CPU.
//!
//! The machine has 65,536 sixteen-bit words of main memory fronted by a
//! 32-line direct-mapped write-back cache. Programs are flat memory images
//! run from address 0 until HALT; the word left on top of the stack is the
//! result.

pub mod word;
pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use word::Word;
pub use cpu::{Cache, Cpu, CpuError, CpuState, Instruction, MainMemory, Opcode, Registers, Statistics};
pub use asm::{assemble, disassemble, load_image, save_image, AssemblerError, ImageError};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
