//! Assembler, disassembler and image files.
//!
//! This module provides:
//! - A two-pass assembler (text → memory image)
//! - A disassembler (memory image → readable text)
//! - Raw image loading and saving

pub mod assembler;
pub mod disasm;
pub mod image;

pub use assembler::{assemble, pack_string, AssemblerError};
pub use disasm::disassemble;
pub use image::{load_image, save_image, ImageError};
