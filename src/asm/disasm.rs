//! Disassembler for stack machine images.
//!
//! Converts memory words back to readable assembly with a linear sweep.

use crate::cpu::decode::{decode, Instruction, DecodeError};
use crate::word::Word;

/// Disassemble the instruction starting at `words[0]`.
///
/// Returns the text and the number of words consumed. Words that do not
/// decode are shown as `.word` data and consume one word.
pub fn disassemble_instruction(words: &[Word]) -> (String, usize) {
    match decode(words) {
        Ok(instr) => (format_instruction(&instr), usize::from(instr.opcode().width())),
        Err(DecodeError::Truncated) if words.is_empty() => (String::new(), 0),
        Err(_) => (format!(".word {:#06x}", words[0]), 1),
    }
}

/// Disassemble a run of words that starts at address `origin`.
pub fn disassemble_range(words: &[Word], origin: u16) -> Vec<(u16, String)> {
    let mut lines = Vec::new();
    let mut idx = 0;

    while idx < words.len() {
        let (text, used) = disassemble_instruction(&words[idx..]);
        let addr = usize::from(origin) + idx;
        if addr > usize::from(u16::MAX) {
            break;
        }
        lines.push((addr as u16, text));
        idx += used.max(1);
    }

    lines
}

/// Disassemble a whole image.
///
/// Trailing zero words (HALTs in an unused tail) are collapsed.
pub fn disassemble(image: &[Word]) -> String {
    let used = image.iter().rposition(|w| !w.is_zero()).map_or(0, |i| i + 1);
    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n\n");

    for (addr, line) in disassemble_range(&image[..used], 0) {
        output.push_str(&format!("{:04x}: {}\n", addr, line));
    }

    if used < image.len() {
        output.push_str(&format!("; {} zero words follow\n", image.len() - used));
    }

    output
}

/// Format a decoded instruction as assembly text.
pub fn format_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Call { addr }
        | Instruction::Jmp { addr }
        | Instruction::Jeq { addr }
        | Instruction::PrintS { addr }
        | Instruction::PushA { addr }
        | Instruction::PopA { addr } => format!("{} {:#06x}", instr.opcode(), addr),
        Instruction::Return { offset }
        | Instruction::PushR { offset }
        | Instruction::PopR { offset } => format!("{} {}", instr.opcode(), offset),
        Instruction::PushC { value } => format!("{} {}", instr.opcode(), value.as_signed()),
        _ => instr.opcode().to_string(),
    }
}
