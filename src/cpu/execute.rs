//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! Every instruction fetch and every data access goes through the cache.

use crate::cpu::cache::{Cache, CacheLine, CACHE_LINES};
use crate::cpu::decode::{DecodeError, Instruction, Opcode, OperandKind};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{checked_address, Registers};
use crate::cpu::stats::Statistics;
use crate::word::Word;
use log::{debug, trace};
use serde::{Serialize, Deserialize};
use std::io::Write;
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has fetched a HALT instruction.
    Halted,
    /// CPU hit a machine fault; it will not run again until reset.
    Faulted,
}

/// The stack machine.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// Control registers.
    pub regs: Registers,
    /// Cache and the main memory behind it.
    pub cache: Cache,
    /// Current execution state.
    pub state: CpuState,
    /// Instructions executed, HALT included.
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU with zeroed memory and an empty cache.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            cache: Cache::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Create a CPU with `image` loaded at address 0.
    pub fn with_image(image: &[Word]) -> Result<Self, CpuError> {
        let mut cpu = Self::new();
        cpu.load_image(image)?;
        Ok(cpu)
    }

    /// Reset registers, cache, counters and memory.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Zero memory and load an image at address 0.
    pub fn load_image(&mut self, image: &[Word]) -> Result<(), CpuError> {
        self.cache.load_image(image)?;
        debug!("loaded {} words", image.len());
        Ok(())
    }

    /// Execute a single instruction, writing any program output to `out`.
    ///
    /// Returns the instruction that was executed. A fault moves the CPU to
    /// [`CpuState::Faulted`].
    pub fn step(&mut self, out: &mut dyn Write) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        match self.step_inner(out) {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                Ok(instr)
            }
            Err(e) => {
                debug!("fault after {} cycles: {}", self.cycles, e);
                self.state = CpuState::Faulted;
                Err(e)
            }
        }
    }

    fn step_inner(&mut self, out: &mut dyn Write) -> Result<Instruction, CpuError> {
        let pc = self.regs.pc_address()?;
        let instr = self.fetch_instruction()?;
        self.execute(instr, pc, out)?;
        trace!("{:04x}: {:<16} SP={:05} FP={:05}",
            pc, crate::asm::disasm::format_instruction(&instr), self.regs.sp, self.regs.fp);
        Ok(instr)
    }

    /// Run until HALT or a fault, then return the exit value.
    pub fn run(&mut self, out: &mut dyn Write) -> Result<Word, CpuError> {
        while self.state == CpuState::Running {
            self.step(out)?;
        }
        self.exit_value()
    }

    /// Run for at most `max_cycles` instructions.
    ///
    /// Returns the number of instructions executed.
    pub fn run_limited(&mut self, max_cycles: u64, out: &mut dyn Write) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(out)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// The value on top of the stack, read through the cache.
    ///
    /// After HALT this is the program's result.
    pub fn exit_value(&mut self) -> Result<Word, CpuError> {
        let addr = self.regs.top_of_stack()?;
        Ok(self.cache.read(addr))
    }

    /// Fetch the word at PC and advance PC.
    fn fetch(&mut self) -> Result<Word, CpuError> {
        let addr = self.regs.pc_address()?;
        self.regs.advance_pc();
        Ok(self.cache.read(addr))
    }

    /// Fetch an opcode and, if it takes one, its operand.
    fn fetch_instruction(&mut self) -> Result<Instruction, CpuError> {
        let pc = self.regs.pc_address()?;
        let word = self.fetch()?;
        let opcode = Opcode::try_from(word)
            .map_err(|source| CpuError::IllegalInstruction { pc, source })?;

        // JEQ only reads its target through the cache when the branch is
        // taken; the decoded form records it from a non-counting peek.
        let operand = match opcode.operand_kind() {
            OperandKind::None => Word::ZERO,
            _ if opcode == Opcode::Jeq => self.cache.peek(self.regs.pc_address()?),
            _ => self.fetch()?,
        };

        Ok(Instruction::from_parts(opcode, operand))
    }

    fn push(&mut self, value: Word) -> Result<(), CpuError> {
        let addr = self.regs.grow_stack()?;
        self.cache.write(addr, value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Word, CpuError> {
        let addr = self.regs.top_of_stack()?;
        let value = self.cache.read(addr);
        self.regs.shrink_stack();
        Ok(value)
    }

    /// Pop a, pop b, push `op(b, a)`.
    fn binary_op(&mut self, op: impl FnOnce(Word, Word) -> Option<Word>, pc: u16) -> Result<(), CpuError> {
        let a = self.pop()?;
        let b = self.pop()?;
        let result = op(b, a).ok_or(CpuError::DivisionByZero { pc })?;
        self.push(result)
    }

    /// Execute a decoded instruction fetched from `pc`.
    fn execute(&mut self, instr: Instruction, pc: u16, out: &mut dyn Write) -> Result<(), CpuError> {
        match instr {
            Instruction::Halt => {
                self.state = CpuState::Halted;
                debug!("halted after {} cycles", self.cycles + 1);
            }

            Instruction::Nop => {}

            // ==================== Arithmetic ====================

            Instruction::Add => self.binary_op(|b, a| Some(b.wrapping_add(a)), pc)?,
            Instruction::Sub => self.binary_op(|b, a| Some(b.wrapping_sub(a)), pc)?,
            Instruction::Mult => self.binary_op(|b, a| Some(b.wrapping_mul(a)), pc)?,
            Instruction::Div => self.binary_op(|b, a| b.checked_div(a), pc)?,

            // ==================== Calls ====================

            Instruction::Call { addr } => {
                // PC already points past the operand.
                let return_addr = checked_address("PC", i64::from(self.regs.pc))?;
                self.push(Word::from_raw(return_addr))?;
                self.push(Word::from_raw(self.regs.fp))?;
                self.regs.jump(addr);
                self.regs.fp = self.regs.top_of_stack()?;
            }

            Instruction::Return { offset } => {
                // Frame layout from FP upward: [0] caller FP, [1] return PC.
                let result = self.cache.read(self.regs.top_of_stack()?);
                let saved_pc = self.cache.read(self.regs.frame_address(1)?);
                let saved_fp = self.cache.read(self.regs.frame_address(0)?);

                let dest = self.regs.frame_address(offset)?;
                self.cache.write(dest, result);

                self.regs.sp = u32::from(dest);
                self.regs.fp = saved_fp.as_address();
                self.regs.jump(saved_pc.as_address());
            }

            // ==================== Control Flow ====================

            Instruction::Jmp { addr } => self.regs.jump(addr),

            Instruction::Jeq { .. } => {
                // PC still names the operand word.
                if self.pop()?.is_zero() {
                    let target = self.fetch()?;
                    self.regs.jump(target.as_address());
                } else {
                    self.regs.advance_pc();
                }
            }

            // ==================== Output ====================

            Instruction::PrintI => {
                let value = self.cache.read(self.regs.top_of_stack()?);
                write!(out, "{}", value.as_signed())?;
                self.regs.shrink_stack();
            }

            Instruction::PrintS { addr } => self.print_string(addr, out)?,

            // ==================== Data Transfer ====================

            Instruction::PushC { value } => self.push(value)?,

            Instruction::PushA { addr } => {
                let value = self.cache.read(addr);
                self.push(value)?;
            }

            Instruction::PushR { offset } => {
                let value = self.cache.read(self.regs.frame_address(offset)?);
                self.push(value)?;
            }

            Instruction::PopA { addr } => {
                let value = self.pop()?;
                self.cache.write(addr, value);
            }

            Instruction::PopR { offset } => {
                let value = self.pop()?;
                let dest = self.regs.frame_address(offset)?;
                self.cache.write(dest, value);
            }
        }

        Ok(())
    }

    /// Print a NUL-terminated string packed two bytes per word, low byte first.
    ///
    /// Each word is read twice: once to test for a zero word, once to print.
    fn print_string(&mut self, start: u16, out: &mut dyn Write) -> Result<(), CpuError> {
        let mut addr = i64::from(start);
        let mut bytes = Vec::new();

        loop {
            let at = checked_address("PRINTS", addr)?;
            if self.cache.read(at).is_zero() {
                break;
            }
            let word = self.cache.read(at);
            let (low, high) = (word.low_byte(), word.high_byte());
            if low == 0 {
                break;
            }
            bytes.push(low);
            if high == 0 {
                break;
            }
            bytes.push(high);
            addr += 1;
        }

        out.write_all(&bytes)?;
        Ok(())
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &Statistics {
        self.cache.stats()
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Capture registers, counters and cache lines (not main memory).
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            cycles: self.cycles,
            regs: self.regs.clone(),
            stats: *self.cache.stats(),
            lines: *self.cache.lines(),
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("cache", &self.cache)
            .finish()
    }
}

/// A serializable view of the machine, small enough to dump as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: CpuState,
    pub cycles: u64,
    pub regs: Registers,
    pub stats: Statistics,
    pub lines: [CacheLine; CACHE_LINES],
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("{what} address {address} out of range (0-65535)")]
    AddressOutOfRange { what: &'static str, address: i64 },

    #[error("read from empty stack")]
    EmptyStack,

    #[error("stack overflow below address 0")]
    StackOverflow,

    #[error("illegal instruction at {pc:#06x}: {source}")]
    IllegalInstruction {
        pc: u16,
        #[source]
        source: DecodeError,
    },

    #[error("division by zero at {pc:#06x}")]
    DivisionByZero { pc: u16 },

    #[error("output error: {0}")]
    Output(String),

    #[error("cycle limit of {0} reached")]
    CycleLimit(u64),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

impl From<std::io::Error> for CpuError {
    fn from(e: std::io::Error) -> Self {
        CpuError::Output(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::assemble;

    fn load(source: &str) -> Cpu {
        let image = assemble(source).unwrap();
        Cpu::with_image(&image).unwrap()
    }

    fn run(source: &str) -> (Cpu, Result<Word, CpuError>, String) {
        let mut cpu = load(source);
        let mut out = Vec::new();
        let result = cpu.run(&mut out);
        (cpu, result, String::from_utf8(out).unwrap())
    }

    fn run_ok(source: &str) -> (Cpu, i16, String) {
        let (cpu, result, out) = run(source);
        (cpu, result.unwrap().as_signed(), out)
    }

    #[test]
    fn test_pushc_halt_result_and_counters() {
        let (cpu, result, out) = run_ok("pushc 99\nhalt");

        assert_eq!(result, 99);
        assert!(out.is_empty());
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 2);

        // Three fetches miss, the final top-of-stack read hits the pushed line.
        let stats = cpu.stats();
        assert_eq!(stats.cache_misses, 3);
        assert_eq!(stats.main_memory_reads, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.main_memory_writes, 0);
    }

    #[test]
    fn test_sub_operand_order() {
        let (_, result, _) = run_ok("pushc 7\npushc 3\nsub\nhalt");
        assert_eq!(result, 4);
    }

    #[test]
    fn test_add_mult_div() {
        assert_eq!(run_ok("pushc 20\npushc 22\nadd\nhalt").1, 42);
        assert_eq!(run_ok("pushc -6\npushc 7\nmult\nhalt").1, -42);
        assert_eq!(run_ok("pushc 17\npushc 5\ndiv\nhalt").1, 3);
        assert_eq!(run_ok("pushc -17\npushc 5\ndiv\nhalt").1, -3);
    }

    #[test]
    fn test_arithmetic_wraps() {
        assert_eq!(run_ok("pushc 32767\npushc 1\nadd\nhalt").1, -32768);
        assert_eq!(run_ok("pushc -32768\npushc -1\ndiv\nhalt").1, -32768);
    }

    #[test]
    fn test_arithmetic_leaves_one_slot() {
        let (cpu, _, _) = run_ok("pushc 1\npushc 2\nadd\nhalt");
        assert_eq!(cpu.regs.stack_depth(), 1);
    }

    #[test]
    fn test_division_by_zero_faults() {
        let (cpu, result, _) = run("pushc 1\npushc 0\ndiv\nhalt");
        assert!(matches!(result, Err(CpuError::DivisionByZero { pc: 4 })));
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_faulted_cpu_refuses_to_step() {
        let (mut cpu, _, _) = run("pushc 1\npushc 0\ndiv\nhalt");
        let mut out = Vec::new();
        assert!(matches!(cpu.step(&mut out), Err(CpuError::NotRunning(CpuState::Faulted))));
    }

    #[test]
    fn test_illegal_opcode() {
        let (cpu, result, _) = run("nop\n.word 99");
        match result {
            Err(CpuError::IllegalInstruction { pc, source }) => {
                assert_eq!(pc, 1);
                assert_eq!(source, DecodeError::InvalidOpcode(99));
            }
            other => panic!("expected illegal instruction, got {:?}", other),
        }
        assert_eq!(cpu.state, CpuState::Faulted);
    }

    #[test]
    fn test_halt_on_empty_stack_faults() {
        let (_, result, _) = run("halt");
        assert!(matches!(result, Err(CpuError::EmptyStack)));
    }

    #[test]
    fn test_pop_from_empty_stack_faults() {
        let (_, result, _) = run("add\nhalt");
        assert!(matches!(result, Err(CpuError::EmptyStack)));
    }

    #[test]
    fn test_call_return_round_trip() {
        let source = r#"
                call sub
                halt
            sub:
                pushc 42
                return 0
        "#;
        let (cpu, result, _) = run_ok(source);

        assert_eq!(result, 42);
        assert_eq!(cpu.regs.fp, 0);
        // CALL pushed two words; RETURN 0 collapses onto the saved-FP slot.
        assert_eq!(cpu.regs.sp, 65534);
        assert_eq!(cpu.regs.pc, 3);
    }

    #[test]
    fn test_call_frame_layout() {
        let source = r#"
                call sub
                halt
            sub:
                halt
        "#;
        let (cpu, _, _) = run(&("pushc 5\n".to_owned() + source));
        // pushc(2) + call(2): return address is 4.
        assert_eq!(cpu.regs.fp, 65533);
        assert_eq!(cpu.cache.peek(65534).raw(), 4);
        assert_eq!(cpu.cache.peek(65533).raw(), 0);
    }

    #[test]
    fn test_function_with_argument() {
        // square(9): the argument sits at FP+2, RETURN 2 replaces it with
        // the result and leaves SP pointing there.
        let source = r#"
                pushc 9
                call square
                halt
            square:
                pushr 2
                pushr 2
                mult
                return 2
        "#;
        let (cpu, result, _) = run_ok(source);
        assert_eq!(result, 81);
        assert_eq!(cpu.regs.stack_depth(), 1);
        assert_eq!(cpu.regs.fp, 0);
    }

    #[test]
    fn test_recursive_factorial() {
        let source = r#"
                pushc 6
                call fact
                printi
                pushc 0
                halt
            fact:
                pushr 2
                jeq base
                pushr 2
                pushr 2
                pushc 1
                sub
                call fact
                mult
                return 2
            base:
                pushc 1
                return 2
        "#;
        let (_, result, out) = run_ok(source);
        assert_eq!(out, "720");
        assert_eq!(result, 0);
    }

    #[test]
    fn test_jmp_and_jeq() {
        let source = r#"
                pushc 0
                jeq taken
                pushc 1
                halt
            taken:
                pushc 5
                jeq never
                pushc 2
                jmp done
            never:
                pushc 3
            done:
                halt
        "#;
        assert_eq!(run_ok(source).1, 2);
    }

    #[test]
    fn test_untaken_jeq_skips_operand_read() {
        let source = r#"
                pushc 1
                jeq l
                pushc 0
                halt
            l:
                halt
        "#;
        let (cpu, result, _) = run_ok(source);
        assert_eq!(result, 0);

        // Fetches at 0, 1, 2, 4, 5, 6 miss; the target word at 3 is never read.
        let stats = cpu.stats();
        assert_eq!(stats.cache_misses, 6);
        assert_eq!(stats.main_memory_reads, 6);
        assert_eq!(stats.cache_hits, 2);
        assert!(!cpu.cache.lines()[3].valid);
    }

    #[test]
    fn test_taken_jeq_reads_operand() {
        let source = r#"
                pushc 0
                jeq l
                pushc 1
                halt
            l:
                pushc 2
                halt
        "#;
        let (cpu, result, _) = run_ok(source);
        assert_eq!(result, 2);
        assert!(cpu.cache.lines()[3].holds(3));
        assert_eq!(cpu.last_instruction(), Some(Instruction::Halt));
    }

    #[test]
    fn test_countdown_loop() {
        let source = r#"
                pushc 3
                popa counter
            loop:
                pusha counter
                jeq end
                pusha counter
                printi
                pusha counter
                pushc 1
                sub
                popa counter
                jmp loop
            end:
                pushc 0
                halt
            counter:
                .word 0
        "#;
        let (_, result, out) = run_ok(source);
        assert_eq!(out, "321");
        assert_eq!(result, 0);
    }

    #[test]
    fn test_printi_pops() {
        let (cpu, result, out) = run_ok("pushc 1\npushc -12\nprinti\nhalt");
        assert_eq!(out, "-12");
        assert_eq!(result, 1);
        assert_eq!(cpu.regs.stack_depth(), 1);
    }

    #[test]
    fn test_prints_hello() {
        let source = r#"
                prints msg
                pushc 0
                halt
            msg:
                .word 0x6548
                .word 0x6c6c
                .word 0x006f
        "#;
        let (cpu, _, out) = run_ok(source);
        assert_eq!(out, "Hello");
        // PRINTS leaves the stack alone.
        assert_eq!(cpu.regs.stack_depth(), 1);
    }

    #[test]
    fn test_prints_reads_each_word_twice() {
        let source = r#"
                prints m
                pushc 0
                halt
            m:
                .string "Hello"
        "#;
        let (cpu, _, out) = run_ok(source);
        assert_eq!(out, "Hello");

        // Each string word misses then hits; the final top-of-stack read hits.
        let stats = cpu.stats();
        assert_eq!(stats.cache_hits, 4);
        assert_eq!(stats.cache_misses, 8);
        assert_eq!(stats.main_memory_reads, 8);
    }

    #[test]
    fn test_prints_stops_on_zero_low_byte() {
        let source = r#"
                prints msg
                pushc 0
                halt
            msg:
                .string "ab"
                .string "cd"
        "#;
        let (_, _, out) = run_ok(source);
        assert_eq!(out, "ab");
    }

    #[test]
    fn test_pusha_popa() {
        let source = r#"
                pusha data
                pushc 1
                add
                popa data
                pusha data
                halt
            data:
                .word 41
        "#;
        assert_eq!(run_ok(source).1, 42);
    }

    #[test]
    fn test_popa_value_stays_in_cache() {
        let source = r#"
                pushc 77
                popa 1000
                pushc 0
                halt
        "#;
        let (cpu, _, _) = run_ok(source);
        assert!(cpu.cache.memory().read(1000).is_zero());
        assert_eq!(cpu.cache.peek(1000).as_signed(), 77);
    }

    #[test]
    fn test_popr_pushr() {
        let source = r#"
                pushc 0
                call f
                halt
            f:
                pushc 10
                popr -1
                pushr -1
                return 2
        "#;
        assert_eq!(run_ok(source).1, 10);
    }

    #[test]
    fn test_frame_offset_out_of_range() {
        // FP is 0 outside any call; FP-1 is not an address.
        let (_, result, _) = run("pushr -1\nhalt");
        assert!(matches!(
            result,
            Err(CpuError::AddressOutOfRange { what: "FP+offset", address: -1 })
        ));
    }

    #[test]
    fn test_pc_runs_off_the_end() {
        let mut image = vec![Word::ZERO; 1 << 16];
        image[65535] = Opcode::Nop.to_word();
        let mut cpu = Cpu::with_image(&image).unwrap();
        cpu.regs.jump(u16::MAX);

        let mut out = Vec::new();
        cpu.step(&mut out).unwrap();
        assert!(matches!(
            cpu.step(&mut out),
            Err(CpuError::AddressOutOfRange { what: "PC", address: 65536 })
        ));
    }

    #[test]
    fn test_run_limited() {
        let mut cpu = load("loop:\njmp loop");
        let mut out = Vec::new();
        let executed = cpu.run_limited(100, &mut out).unwrap();
        assert_eq!(executed, 100);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_last_instruction() {
        let (cpu, _, _) = run_ok("pushc 4\nhalt");
        assert_eq!(cpu.last_instruction(), Some(Instruction::Halt));
    }

    #[test]
    fn test_snapshot_json_round_trip() {
        let (cpu, _, _) = run_ok("pushc 4\npopa 40\npushc 5\nhalt");
        let snapshot = cpu.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: crate::cpu::Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.stats.cache_misses, snapshot.stats.cache_misses);
        assert!(back.lines[40 % 32].dirty);
    }
}
