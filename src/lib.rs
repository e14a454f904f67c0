// Parsing
mod parser;
pub use parser::AsmParser;
mod air;
pub use air::{Air, AsmLine};

// Running
mod runtime;
pub use runtime::{RunState, Snapshot, Step, EOF_BYTE};
mod device;
pub use device::{BufferDevice, Device, StdDevice};
#[macro_use]
pub mod output;

pub mod error;
pub use error::{AsmError, AssembleError, Fault, LoadError};
pub mod isa;
mod lexer;
mod span;

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Assemble source text straight to a memory image.
pub fn assemble(src: &str) -> Result<Vec<u8>, AssembleError> {
    Ok(AsmParser::new(src).parse()?.emit())
}
