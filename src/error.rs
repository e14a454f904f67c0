use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::lexer::TokenKind;

// Assembler errors

/// A single malformed line. The line contributes no bytes to the output.
#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum AsmError {
    #[error("Unknown instruction `{name}`")]
    #[diagnostic(
        code(parse::mnemonic),
        help("valid instructions are NOP, MOV, PUT, ADD, SUB, MUL, DIV, OR, AND, XOR, OUT, IN, JMP, JEQ, CMP and HLT")
    )]
    UnknownMnemonic {
        name: String,
        #[label("unknown instruction")]
        span: SourceSpan,
    },

    #[error("Expected {expected}, found {found}")]
    #[diagnostic(
        code(parse::unexpected_token),
        help("check the operands for this instruction")
    )]
    UnexpectedToken {
        expected: &'static str,
        found: TokenKind,
        #[label("unexpected token")]
        span: SourceSpan,
    },

    #[error("Invalid token `{text}`")]
    #[diagnostic(
        code(lex::invalid),
        help("operands are registers R0 to R7 or decimal literals")
    )]
    InvalidToken {
        text: String,
        #[label("not a register, literal or instruction")]
        span: SourceSpan,
    },

    #[error("Register R{index} does not exist")]
    #[diagnostic(code(parse::register), help("registers range from R0 to R7"))]
    InvalidRegister {
        index: u8,
        #[label("invalid register")]
        span: SourceSpan,
    },

    #[error("Literal {text} does not fit in a byte")]
    #[diagnostic(
        code(parse::bad_lit),
        help("immediates and addresses range from 0 to 255")
    )]
    LiteralOutOfRange {
        text: String,
        #[label("out-of-range literal")]
        span: SourceSpan,
    },

    #[error("Program is {size} bytes long and does not fit in memory")]
    #[diagnostic(
        code(asm::too_large),
        help("the processor can only address 256 bytes")
    )]
    ProgramTooLarge {
        size: usize,
        #[label("memory runs out here")]
        span: SourceSpan,
    },
}

/// Every line error found in one assembly pass.
#[derive(Debug, Error, Diagnostic)]
#[error("Could not assemble program due to {} error(s)", .errors.len())]
#[diagnostic(code(asm::failed), help("no binary was produced"))]
pub struct AssembleError {
    #[source_code]
    pub src: NamedSource<String>,
    #[related]
    pub errors: Vec<AsmError>,
}

// Loader errors

#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum LoadError {
    #[error("Program is {size} bytes long but memory only holds {max} bytes")]
    #[diagnostic(code(load::too_large))]
    TooLarge { size: usize, max: usize },

    #[error("Cannot seed register R{index}, registers range from R0 to R7")]
    #[diagnostic(code(load::register))]
    InvalidRegister { index: usize },
}

// Runtime faults

/// Conditions that stop the processor. `addr` is the address of the faulting instruction.
#[derive(Clone, Debug, PartialEq, Eq, Error, Diagnostic)]
pub enum Fault {
    #[error("Unknown instruction 0x{opcode:02X} at address {addr}")]
    #[diagnostic(code(runtime::opcode))]
    UnknownOpcode { opcode: u8, addr: u16 },

    #[error("Register index {index} out of range at address {addr}")]
    #[diagnostic(code(runtime::register), help("registers range from R0 to R7"))]
    InvalidRegister { index: u8, addr: u16 },

    #[error("Division by zero at address {addr}")]
    #[diagnostic(code(runtime::div_zero))]
    DivisionByZero { addr: u16 },

    #[error("Program counter {pc} is outside of memory (instruction at address {addr})")]
    #[diagnostic(
        code(runtime::pc_bounds),
        help("programs must end with HLT or jump back into memory")
    )]
    PcOutOfBounds { pc: u16, addr: u16 },

    #[error("Step limit of {limit} instructions reached at address {addr}")]
    #[diagnostic(
        code(runtime::step_limit),
        help("the program may be stuck in a loop, raise the limit with --max-steps")
    )]
    StepLimit { limit: u64, addr: u16 },

    #[error("Device failed at address {addr}: {message}")]
    #[diagnostic(code(runtime::io))]
    Io { message: String, addr: u16 },
}

impl Fault {
    /// Address of the instruction that faulted.
    pub fn addr(&self) -> u16 {
        match self {
            Fault::UnknownOpcode { addr, .. }
            | Fault::InvalidRegister { addr, .. }
            | Fault::DivisionByZero { addr }
            | Fault::PcOutOfBounds { addr, .. }
            | Fault::StepLimit { addr, .. }
            | Fault::Io { addr, .. } => *addr,
        }
    }
}
