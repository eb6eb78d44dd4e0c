//! Simple assembler for stack machine programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! main:               ; Define a label
//!     pushc 7         ; Push a constant
//!     call square     ; Labels may be used before they are defined
//!     printi
//!     prints msg
//!     pushc 0
//!     halt
//! square:
//!     pushr 2
//!     pushr 2
//!     mult
//!     return 2
//! msg:
//!     .string "\n"    ; NUL-terminated, two characters per word
//!     .word 42, -1    ; Literal words
//!     .org 0x100      ; Pad with zeros up to an address
//! ```
//!
//! Mnemonics and directives are case-insensitive; labels are not.

use crate::cpu::decode::{Instruction, Opcode, OperandKind, encode};
use crate::cpu::memory::MEMORY_WORDS;
use crate::word::Word;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a memory image starting at address 0.
pub fn assemble(source: &str) -> Result<Vec<Word>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// Pack a string two bytes per word, low byte first, NUL-terminated.
///
/// An even-length string gets a whole zero word as its terminator.
pub fn pack_string(text: &str) -> Vec<Word> {
    let bytes = text.as_bytes();
    let mut words: Vec<Word> = bytes
        .chunks(2)
        .map(|pair| Word::from_bytes(pair[0], pair.get(1).copied().unwrap_or(0)))
        .collect();
    if bytes.len() % 2 == 0 {
        words.push(Word::ZERO);
    }
    words
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, u16>,
    /// Words waiting on a label: (output index, label, source line).
    pending: Vec<(usize, String, usize)>,
    /// Output image; its length is the current address.
    output: Vec<Word>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<Word>, AssemblerError> {
        // Pass 1: Collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: Resolve forward references
        self.resolve_references()?;

        Ok(std::mem::take(&mut self.output))
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some((label, rest)) = split_label(line) {
            if self.symbols.contains_key(label) {
                return Err(AssemblerError::DuplicateLabel {
                    line: line_num,
                    label: label.to_string(),
                });
            }
            let addr = self.current_addr(line_num)?;
            self.symbols.insert(label.to_string(), addr);

            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(());
            }
            return self.process_statement(rest, line_num);
        }

        self.process_statement(line, line_num)
    }

    fn process_statement(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (head, operand) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, Some(rest.trim())),
            None => (line, None),
        };
        let operand = operand.filter(|op| !op.is_empty());
        let head = head.to_ascii_lowercase();

        match head.as_str() {
            // Directives
            ".org" => {
                let op = require(operand, ".org requires an address", line_num)?;
                let target = self.parse_number(op, line_num)?;
                let current = self.output.len() as i64;
                if target < current || target > MEMORY_WORDS as i64 {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!(".org {} is behind the current address {}", target, current),
                    });
                }
                self.output.resize(target as usize, Word::ZERO);
            }

            ".word" => {
                let op = require(operand, ".word requires a value", line_num)?;
                for value in op.split(',') {
                    let word = self.parse_operand_value(value, line_num)?;
                    self.emit(word, line_num)?;
                }
            }

            ".string" => {
                let op = require(operand, ".string requires a quoted string", line_num)?;
                let text = parse_string_literal(op).ok_or_else(|| AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid string literal: {}", op),
                })?;
                for word in pack_string(&text) {
                    self.emit(word, line_num)?;
                }
            }

            // Instructions
            mnemonic => {
                let opcode = Opcode::from_name(mnemonic).ok_or_else(|| {
                    AssemblerError::UnknownMnemonic {
                        line: line_num,
                        mnemonic: mnemonic.to_string(),
                    }
                })?;
                self.emit_instruction(opcode, operand, line_num)?;
            }
        }

        Ok(())
    }

    fn emit_instruction(&mut self, opcode: Opcode, operand: Option<&str>, line_num: usize)
        -> Result<(), AssemblerError>
    {
        match (opcode.operand_kind(), operand) {
            (OperandKind::None, None) => {
                let instr = Instruction::from_parts(opcode, Word::ZERO);
                for word in encode(&instr) {
                    self.emit(word, line_num)?;
                }
            }
            (OperandKind::None, Some(op)) => {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("{} takes no operand, found '{}'", opcode, op),
                });
            }
            (_, None) => {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("{} requires an operand", opcode),
                });
            }
            (_, Some(op)) => {
                self.emit(opcode.to_word(), line_num)?;
                let value = self.parse_operand_value(op, line_num)?;
                self.emit(value, line_num)?;
            }
        }
        Ok(())
    }

    /// Parse a literal, or record a label reference for the word about to
    /// be emitted.
    fn parse_operand_value(&mut self, operand: &str, line_num: usize) -> Result<Word, AssemblerError> {
        let operand = operand.trim();

        if is_identifier(operand) {
            // Must be a label reference - store for pass 2
            self.pending.push((self.output.len(), operand.to_string(), line_num));
            return Ok(Word::ZERO);
        }

        let value = self.parse_number(operand, line_num)?;
        if value < i64::from(i16::MIN) || value > i64::from(u16::MAX) {
            return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
        }
        // Negative values take their two's-complement bits.
        Ok(Word::from_raw(value as u16))
    }

    fn parse_number(&self, operand: &str, line_num: usize) -> Result<i64, AssemblerError> {
        let operand = operand.trim();
        let invalid = || AssemblerError::SyntaxError {
            line: line_num,
            message: format!("invalid number: {}", operand),
        };

        // Character literal
        if let Some(inner) = operand.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            let text = unescape(inner).ok_or_else(invalid)?;
            let mut chars = text.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Ok(c as i64),
                _ => Err(invalid()),
            };
        }

        let (negative, digits) = match operand.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, operand),
        };

        let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).map_err(|_| invalid())?
        } else {
            digits.parse::<i64>().map_err(|_| invalid())?
        };

        Ok(if negative { -magnitude } else { magnitude })
    }

    fn current_addr(&self, line_num: usize) -> Result<u16, AssemblerError> {
        u16::try_from(self.output.len()).map_err(|_| AssemblerError::ImageTooLarge { line: line_num })
    }

    fn emit(&mut self, word: Word, line_num: usize) -> Result<(), AssemblerError> {
        if self.output.len() >= MEMORY_WORDS {
            return Err(AssemblerError::ImageTooLarge { line: line_num });
        }
        self.output.push(word);
        Ok(())
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (out_idx, label, line_num) in &self.pending {
            let addr = self.symbols.get(label)
                .ok_or_else(|| AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                })?;
            self.output[*out_idx] = Word::from_raw(*addr);
        }
        Ok(())
    }
}

fn require<'a>(operand: Option<&'a str>, message: &str, line_num: usize) -> Result<&'a str, AssemblerError> {
    operand.ok_or_else(|| AssemblerError::SyntaxError {
        line: line_num,
        message: message.into(),
    })
}

/// Cut a `;` comment, ignoring semicolons inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, ';') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split `label: rest` when the line starts with a label.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let (label, rest) = line.split_once(':')?;
    is_identifier(label.trim()).then(|| (label.trim(), rest))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_string_literal(op: &str) -> Option<String> {
    let inner = op.strip_prefix('"')?.strip_suffix('"')?;
    unescape(inner)
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '"' => '"',
            '\'' => '\'',
            _ => return None,
        });
    }
    Some(out)
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("duplicate label on line {line}: {label}")]
    DuplicateLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("program exceeds 65536 words on line {line}")]
    ImageTooLarge { line: usize },
}
