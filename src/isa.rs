//! Instruction encoding shared by the assembler and the processor.
//!
//! Every instruction is one opcode byte followed by a fixed number of operand bytes. Register
//! operands hold a register index, immediate and address operands hold the value itself.
//!
//! | Mnemonic      | Opcode          | Operands           |
//! |---------------|-----------------|--------------------|
//! | `MOV`         | `0xA0`          | `reg, reg`         |
//! | `PUT`         | `0xA1`          | `reg, imm`         |
//! | `ADD`..`DIV`  | `0xB0`..`0xB3`  | `reg, reg`         |
//! | `OR`..`XOR`   | `0xC0`..`0xC2`  | `reg, reg`         |
//! | `OUT`, `IN`   | `0xD0`, `0xD1`  | `reg`              |
//! | `JMP`         | `0xE0`          | `addr`             |
//! | `JEQ`         | `0xE1`          | `reg, addr`        |
//! | `CMP`         | `0xE2`          | `reg, reg`         |
//! | `NOP`, `HLT`  | `0xFE`, `0xFF`  |                    |

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 8;

/// Amount of addressable memory, in bytes. Programs are loaded at address 0.
pub const MEMORY_SIZE: usize = 256;

/// One-byte instruction identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum Opcode {
    // 0xA? -> Memory
    Mov = 0xA0,
    Put = 0xA1,
    // 0xB? -> Arithmetic
    Add = 0xB0,
    Sub = 0xB1,
    Mul = 0xB2,
    Div = 0xB3,
    // 0xC? -> Bitwise
    Or = 0xC0,
    And = 0xC1,
    Xor = 0xC2,
    // 0xD? -> Input/output
    Out = 0xD0,
    In = 0xD1,
    // 0xE? -> Jumps and comparisons
    Jmp = 0xE0,
    Jeq = 0xE1,
    Cmp = 0xE2,
    // 0xF? -> Misc
    Nop = 0xFE,
    Hlt = 0xFF,
}

/// Kind of byte following an opcode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    /// Register index, written `R0`..`R7`.
    Reg,
    /// Literal value in `0..=255`.
    Imm,
    /// Memory address in `0..=255`.
    Addr,
}

/// Grouping of opcodes by their high nibble. Only used for display.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Category {
    Memory,
    Arithmetic,
    Bitwise,
    Io,
    Jump,
    Nop,
    Halt,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Mov,
        Opcode::Put,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Or,
        Opcode::And,
        Opcode::Xor,
        Opcode::Out,
        Opcode::In,
        Opcode::Jmp,
        Opcode::Jeq,
        Opcode::Cmp,
        Opcode::Nop,
        Opcode::Hlt,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Mov => "MOV",
            Opcode::Put => "PUT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Or => "OR",
            Opcode::And => "AND",
            Opcode::Xor => "XOR",
            Opcode::Out => "OUT",
            Opcode::In => "IN",
            Opcode::Jmp => "JMP",
            Opcode::Jeq => "JEQ",
            Opcode::Cmp => "CMP",
            Opcode::Nop => "NOP",
            Opcode::Hlt => "HLT",
        }
    }

    /// Operand layout following the opcode byte.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Opcode::Mov
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Or
            | Opcode::And
            | Opcode::Xor
            | Opcode::Cmp => &[Reg, Reg],
            Opcode::Put => &[Reg, Imm],
            // The register is encoded but never read
            Opcode::Jeq => &[Reg, Addr],
            Opcode::Out | Opcode::In => &[Reg],
            Opcode::Jmp => &[Addr],
            Opcode::Nop | Opcode::Hlt => &[],
        }
    }

    /// Encoded size of the whole instruction, in bytes.
    pub fn size(self) -> usize {
        1 + self.operands().len()
    }

    pub fn category(self) -> Category {
        match self as u8 {
            0xFE => Category::Nop,
            0xFF => Category::Halt,
            byte => match byte >> 4 {
                0xA => Category::Memory,
                0xB => Category::Arithmetic,
                0xC => Category::Bitwise,
                0xD => Category::Io,
                _ => Category::Jump,
            },
        }
    }
}

impl TryFrom<u8> for Opcode {
    /// The unrecognized byte.
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| *opcode as u8 == byte)
            .ok_or(byte)
    }
}

impl FromStr for Opcode {
    type Err = ();

    /// Mnemonics are matched case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .into_iter()
            .find(|opcode| opcode.mnemonic().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A fully resolved instruction: opcode plus its operand bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instr {
    opcode: Opcode,
    operands: [u8; 2],
}

/// Reasons a byte sequence is not a valid instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum DecodeError {
    /// Nothing left to decode.
    #[error("no bytes to decode")]
    Empty,
    /// Byte is not present in the opcode table.
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    /// Image ended before all operand bytes of the opcode.
    #[error("truncated {0} instruction")]
    Truncated(Opcode),
}

impl Instr {
    /// Operand slice must match the arity of `opcode`.
    pub fn new(opcode: Opcode, operands: &[u8]) -> Self {
        debug_assert_eq!(
            operands.len(),
            opcode.operands().len(),
            "wrong number of operands for {opcode}"
        );
        let mut bytes = [0; 2];
        bytes[..operands.len()].copy_from_slice(operands);
        Instr {
            opcode,
            operands: bytes,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn operands(&self) -> &[u8] {
        &self.operands[..self.opcode.operands().len()]
    }

    pub fn size(&self) -> usize {
        self.opcode.size()
    }

    /// Append the binary encoding to `out`.
    pub fn emit(&self, out: &mut Vec<u8>) {
        out.push(self.opcode as u8);
        out.extend_from_slice(self.operands());
    }

    /// Decode the instruction at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&first, rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let opcode = Opcode::try_from(first).map_err(DecodeError::UnknownOpcode)?;
        let arity = opcode.operands().len();
        if rest.len() < arity {
            return Err(DecodeError::Truncated(opcode));
        }
        Ok(Instr::new(opcode, &rest[..arity]))
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, (kind, value)) in self
            .opcode
            .operands()
            .iter()
            .zip(self.operands())
            .enumerate()
        {
            let sep = if i == 0 { " " } else { ", " };
            match kind {
                OperandKind::Reg => write!(f, "{sep}R{value}")?,
                OperandKind::Imm | OperandKind::Addr => write!(f, "{sep}{value}")?,
            }
        }
        Ok(())
    }
}

/// One entry of a disassembly listing.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Listing<'a> {
    /// Address of the first byte.
    pub addr: usize,
    /// Raw bytes covered by this entry.
    pub bytes: &'a [u8],
    pub instr: Result<Instr, DecodeError>,
}

/// Walk a program image linearly, decoding one instruction after another.
///
/// Unknown bytes are reported one at a time, a truncated final instruction covers the rest of
/// the image.
pub fn disassemble(image: &[u8]) -> impl Iterator<Item = Listing<'_>> + '_ {
    let mut addr = 0;
    std::iter::from_fn(move || {
        let rest = image.get(addr..).filter(|rest| !rest.is_empty())?;
        let instr = Instr::decode(rest);
        let len = match instr {
            Ok(instr) => instr.size(),
            Err(DecodeError::UnknownOpcode(_) | DecodeError::Empty) => 1,
            Err(DecodeError::Truncated(_)) => rest.len(),
        };
        let listing = Listing {
            addr,
            bytes: &rest[..len],
            instr,
        };
        addr += len;
        Some(listing)
    })
}
