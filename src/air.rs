use crate::isa::Instr;
use crate::span::Span;

/// Assembly intermediate representation: resolved instructions in program order.
///
/// Instructions are laid out back to back starting at address 0, so the address of each line
/// is the sum of the sizes of the lines before it.
#[derive(Debug, Default)]
pub struct Air {
    lines: Vec<AsmLine>,
}

/// Single source line that produced an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsmLine {
    pub instr: Instr,
    /// Covers the mnemonic and its operands
    pub span: Span,
    /// 1-based line number in the source file
    pub line: u16,
}

impl Air {
    pub fn new() -> Self {
        Air { lines: Vec::new() }
    }

    pub fn add_line(&mut self, line: AsmLine) {
        self.lines.push(line)
    }

    pub fn get(&self, idx: usize) -> Option<&AsmLine> {
        self.lines.get(idx)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Encoded size of the whole program, in bytes.
    pub fn size(&self) -> usize {
        self.lines.iter().map(|line| line.instr.size()).sum()
    }

    /// Pair every line with the address it is loaded at.
    pub fn addressed(&self) -> impl Iterator<Item = (usize, &AsmLine)> {
        self.lines.iter().scan(0, |addr, line| {
            let this = *addr;
            *addr += line.instr.size();
            Some((this, line))
        })
    }

    /// Flat program image, without header or padding.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        for line in &self.lines {
            line.instr.emit(&mut out);
        }
        out
    }
}
