//! WebAssembly bindings for the emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use js_sys::Uint16Array;
use wasm_bindgen::prelude::*;
use crate::{Cpu, Word};
use crate::asm::assembler::assemble;
use crate::asm::disasm::{disassemble_instruction, format_instruction};
use crate::asm::image::words_from_bytes;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<Word>,
    output: Vec<u8>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
            output: Vec::new(),
        }
    }

    /// Load a program from assembly source code. Returns its size in words.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let image = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.install(image)
    }

    /// Load a raw image (native-endian 16-bit words).
    #[wasm_bindgen]
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<usize, JsError> {
        let image = words_from_bytes(bytes)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.install(image)
    }

    fn install(&mut self, image: Vec<Word>) -> Result<usize, JsError> {
        let len = image.len();
        self.cpu = Cpu::with_image(&image)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        self.program = image;
        self.output.clear();
        Ok(len)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is not running"));
        }

        let instr = self.cpu.step(&mut self.output)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(format_instruction(&instr))
    }

    /// Run until halt, a fault, or max cycles. Returns total cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u64, JsError> {
        self.cpu.run_limited(u64::from(max_cycles), &mut self.output)
            .map_err(|e| JsError::new(&format!("{}", e)))?;
        Ok(self.cpu.cycles)
    }

    /// The value on top of the stack (the result after HALT).
    #[wasm_bindgen]
    pub fn exit_value(&mut self) -> Result<i16, JsError> {
        self.cpu.exit_value()
            .map(|w| w.as_signed())
            .map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        self.output.clear();
        if !self.program.is_empty() {
            let _ = self.cpu.load_image(&self.program);
        }
    }

    /// Everything printed so far.
    #[wasm_bindgen]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u32 {
        self.cpu.regs.pc
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Coherent memory value at an address, without touching the cache.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u16) -> i16 {
        self.cpu.cache.peek(addr).as_signed()
    }

    /// Up to `count` coherent words starting at `start`, as raw bits.
    #[wasm_bindgen]
    pub fn memory_range(&self, start: u16, count: u16) -> Uint16Array {
        let words: Vec<u16> = self.cpu.cache.peek_range(start, usize::from(count))
            .iter()
            .map(|word| word.raw())
            .collect();
        Uint16Array::from(words.as_slice())
    }

    /// Registers, counters and cache lines as JSON.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.cpu.snapshot())
            .map_err(|e| JsError::new(&format!("{}", e)))
    }

    /// Counters as JSON.
    #[wasm_bindgen]
    pub fn stats_json(&self) -> Result<String, JsError> {
        serde_json::to_string(self.cpu.stats())
            .map_err(|e| JsError::new(&format!("{}", e)))
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the image size in words.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let image = assemble(source)
        .map_err(|e| JsError::new(&format!("{}", e)))?;
    Ok(image.len())
}

/// Disassemble one instruction from an opcode word and an operand word.
#[wasm_bindgen]
pub fn wasm_disassemble(opcode: u16, operand: u16) -> String {
    disassemble_instruction(&[Word::from_raw(opcode), Word::from_raw(operand)]).0
}
