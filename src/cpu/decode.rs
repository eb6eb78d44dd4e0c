//! Instruction decoder.
//!
//! An instruction is one opcode word, followed by one operand word for the
//! opcodes that take one. The opcode set is closed: any other value in an
//! opcode position is an illegal instruction.

use crate::word::Word;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// The 17 opcodes, numbered as they appear in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Opcode {
    Halt = 0,
    Nop,
    Add,
    Sub,
    Mult,
    Div,
    Call,
    Return,
    Jmp,
    Jeq,
    PrintI,
    PrintS,
    PushC,
    PushA,
    PushR,
    PopA,
    PopR,
}

/// How an opcode interprets its operand word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand word follows.
    None,
    /// An absolute address (address view).
    Address,
    /// A signed offset from FP (value view).
    Offset,
    /// A literal (value view).
    Constant,
}

impl Opcode {
    /// Every opcode, in numeric order.
    pub const ALL: [Opcode; 17] = [
        Opcode::Halt,
        Opcode::Nop,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mult,
        Opcode::Div,
        Opcode::Call,
        Opcode::Return,
        Opcode::Jmp,
        Opcode::Jeq,
        Opcode::PrintI,
        Opcode::PrintS,
        Opcode::PushC,
        Opcode::PushA,
        Opcode::PushR,
        Opcode::PopA,
        Opcode::PopR,
    ];

    /// Assembly mnemonic.
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Halt => "halt",
            Opcode::Nop => "nop",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mult => "mult",
            Opcode::Div => "div",
            Opcode::Call => "call",
            Opcode::Return => "return",
            Opcode::Jmp => "jmp",
            Opcode::Jeq => "jeq",
            Opcode::PrintI => "printi",
            Opcode::PrintS => "prints",
            Opcode::PushC => "pushc",
            Opcode::PushA => "pusha",
            Opcode::PushR => "pushr",
            Opcode::PopA => "popa",
            Opcode::PopR => "popr",
        }
    }

    /// Look up an opcode by mnemonic, ignoring case.
    pub fn from_name(name: &str) -> Option<Opcode> {
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// The operand this opcode expects.
    pub const fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::Halt
            | Opcode::Nop
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mult
            | Opcode::Div
            | Opcode::PrintI => OperandKind::None,
            Opcode::Call
            | Opcode::Jmp
            | Opcode::Jeq
            | Opcode::PrintS
            | Opcode::PushA
            | Opcode::PopA => OperandKind::Address,
            Opcode::Return | Opcode::PushR | Opcode::PopR => OperandKind::Offset,
            Opcode::PushC => OperandKind::Constant,
        }
    }

    /// Number of words the instruction occupies.
    pub const fn width(self) -> u16 {
        match self.operand_kind() {
            OperandKind::None => 1,
            _ => 2,
        }
    }

    /// The opcode's word encoding.
    pub const fn to_word(self) -> Word {
        Word::from_raw(self as u16)
    }
}

impl TryFrom<Word> for Opcode {
    type Error = DecodeError;

    fn try_from(word: Word) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(usize::from(word.raw()))
            .copied()
            .ok_or(DecodeError::InvalidOpcode(word.raw()))
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded instruction with its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Stop the machine.
    Halt,
    /// Do nothing.
    Nop,
    /// Pop a, pop b, push b + a.
    Add,
    /// Pop a, pop b, push b - a.
    Sub,
    /// Pop a, pop b, push b * a.
    Mult,
    /// Pop a, pop b, push b / a.
    Div,
    /// Push return address and FP, then jump; FP := SP.
    Call { addr: u16 },
    /// Collapse the frame to FP + offset, leaving the return value there.
    Return { offset: i16 },
    /// Unconditional jump.
    Jmp { addr: u16 },
    /// Pop; jump if the popped value is zero.
    Jeq { addr: u16 },
    /// Print the top of stack as a signed integer, then pop it.
    PrintI,
    /// Print the packed string starting at `addr`.
    PrintS { addr: u16 },
    /// Push a literal.
    PushC { value: Word },
    /// Push the word at `addr`.
    PushA { addr: u16 },
    /// Push the word at FP + offset.
    PushR { offset: i16 },
    /// Pop into `addr`.
    PopA { addr: u16 },
    /// Pop into FP + offset.
    PopR { offset: i16 },
}

impl Instruction {
    /// Build an instruction from an opcode and its operand word.
    ///
    /// `operand` is ignored for opcodes without one.
    pub fn from_parts(opcode: Opcode, operand: Word) -> Self {
        let addr = operand.as_address();
        let offset = operand.as_signed();
        match opcode {
            Opcode::Halt => Instruction::Halt,
            Opcode::Nop => Instruction::Nop,
            Opcode::Add => Instruction::Add,
            Opcode::Sub => Instruction::Sub,
            Opcode::Mult => Instruction::Mult,
            Opcode::Div => Instruction::Div,
            Opcode::Call => Instruction::Call { addr },
            Opcode::Return => Instruction::Return { offset },
            Opcode::Jmp => Instruction::Jmp { addr },
            Opcode::Jeq => Instruction::Jeq { addr },
            Opcode::PrintI => Instruction::PrintI,
            Opcode::PrintS => Instruction::PrintS { addr },
            Opcode::PushC => Instruction::PushC { value: operand },
            Opcode::PushA => Instruction::PushA { addr },
            Opcode::PushR => Instruction::PushR { offset },
            Opcode::PopA => Instruction::PopA { addr },
            Opcode::PopR => Instruction::PopR { offset },
        }
    }

    /// The instruction's opcode.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Halt => Opcode::Halt,
            Instruction::Nop => Opcode::Nop,
            Instruction::Add => Opcode::Add,
            Instruction::Sub => Opcode::Sub,
            Instruction::Mult => Opcode::Mult,
            Instruction::Div => Opcode::Div,
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Return { .. } => Opcode::Return,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Jeq { .. } => Opcode::Jeq,
            Instruction::PrintI => Opcode::PrintI,
            Instruction::PrintS { .. } => Opcode::PrintS,
            Instruction::PushC { .. } => Opcode::PushC,
            Instruction::PushA { .. } => Opcode::PushA,
            Instruction::PushR { .. } => Opcode::PushR,
            Instruction::PopA { .. } => Opcode::PopA,
            Instruction::PopR { .. } => Opcode::PopR,
        }
    }

    /// The operand word, if this instruction has one.
    pub fn operand(&self) -> Option<Word> {
        match *self {
            Instruction::Call { addr }
            | Instruction::Jmp { addr }
            | Instruction::Jeq { addr }
            | Instruction::PrintS { addr }
            | Instruction::PushA { addr }
            | Instruction::PopA { addr } => Some(Word::from_raw(addr)),
            Instruction::Return { offset }
            | Instruction::PushR { offset }
            | Instruction::PopR { offset } => Some(Word::from_signed(offset)),
            Instruction::PushC { value } => Some(value),
            _ => None,
        }
    }
}

/// Decode an instruction from the words at its address.
///
/// `words[0]` is the opcode; `words[1]` the operand if one is needed.
pub fn decode(words: &[Word]) -> Result<Instruction, DecodeError> {
    let first = words.first().ok_or(DecodeError::Truncated)?;
    let opcode = Opcode::try_from(*first)?;

    let operand = match opcode.operand_kind() {
        OperandKind::None => Word::ZERO,
        _ => *words.get(1).ok_or(DecodeError::Truncated)?,
    };

    Ok(Instruction::from_parts(opcode, operand))
}

/// Encode an instruction to its one or two words.
pub fn encode(instr: &Instruction) -> Vec<Word> {
    let mut words = vec![instr.opcode().to_word()];
    words.extend(instr.operand());
    words
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u16),

    #[error("instruction truncated by end of input")]
    Truncated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_numbering() {
        assert_eq!(Opcode::Halt.to_word().raw(), 0);
        assert_eq!(Opcode::Call.to_word().raw(), 6);
        assert_eq!(Opcode::PushC.to_word().raw(), 12);
        assert_eq!(Opcode::PopR.to_word().raw(), 16);

        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(usize::from(op.to_word().raw()), i);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(
            Opcode::try_from(Word::from_raw(17)),
            Err(DecodeError::InvalidOpcode(17))
        );
        assert!(Opcode::try_from(Word::from_signed(-1)).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(Opcode::from_name("PUSHC"), Some(Opcode::PushC));
        assert_eq!(Opcode::from_name("return"), Some(Opcode::Return));
        assert_eq!(Opcode::from_name("push"), None);
    }

    #[test]
    fn test_decode_with_operands() {
        let words = [Opcode::PushR.to_word(), Word::from_signed(-3)];
        assert_eq!(decode(&words), Ok(Instruction::PushR { offset: -3 }));

        let words = [Opcode::Call.to_word(), Word::from_raw(0xfff0)];
        assert_eq!(decode(&words), Ok(Instruction::Call { addr: 0xfff0 }));

        assert_eq!(decode(&[Opcode::Add.to_word()]), Ok(Instruction::Add));
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode(&[Opcode::Jmp.to_word()]), Err(DecodeError::Truncated));
        assert_eq!(decode(&[]), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_encode_width() {
        for op in Opcode::ALL {
            let instr = Instruction::from_parts(op, Word::from_raw(5));
            assert_eq!(encode(&instr).len(), usize::from(op.width()));
        }
    }
}
