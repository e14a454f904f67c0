use std::iter::Peekable;
use std::vec::IntoIter;

use miette::NamedSource;

use crate::air::{Air, AsmLine};
use crate::error::{AsmError, AssembleError};
use crate::isa::{Instr, Opcode, OperandKind, MEMORY_SIZE, REGISTER_COUNT};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::span::{Idx, Span};

/// Transforms assembly source into AIR, one line at a time.
///
/// A malformed line is recorded and skipped so that every error in the file is reported at
/// once. If any line failed the whole parse fails and no AIR is returned.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Used when rendering diagnostics
    name: String,
    /// Tokens with whitespace and comments removed. Line breaks are kept.
    toks: Peekable<IntoIter<Token>>,
    /// Assembly intermediate representation
    air: Air,
    errors: Vec<AsmError>,
    /// Tracker for current line
    line: u16,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        let toks: Vec<Token> = tokenize(src)
            .filter(|tok| !matches!(tok.kind, TokenKind::Whitespace | TokenKind::Comment))
            .collect();
        AsmParser {
            src,
            name: String::from("<source>"),
            toks: toks.into_iter().peekable(),
            air: Air::new(),
            errors: Vec::new(),
            line: 1,
        }
    }

    /// Name shown in diagnostics, usually the file path.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn get_span(&self, span: Span) -> &'a str {
        &self.src[span.as_range()]
    }

    /// Create AIR out of token stream
    pub fn parse(mut self) -> Result<Air, AssembleError> {
        while self.toks.peek().is_some() {
            match self.parse_line() {
                Ok(Some(line)) => self.air.add_line(line),
                Ok(None) => (),
                Err(err) => {
                    self.errors.push(err);
                    self.skip_line();
                }
            }
            self.line = self.line.saturating_add(1);
        }

        self.check_size();

        if self.errors.is_empty() {
            Ok(self.air)
        } else {
            Err(AssembleError {
                src: NamedSource::new(self.name, self.src.to_string()),
                errors: self.errors,
            })
        }
    }

    /// Returns `None` for blank and comment-only lines.
    fn parse_line(&mut self) -> Result<Option<AsmLine>, AsmError> {
        let first = self.advance();
        match first.kind {
            TokenKind::Newline => {
                self.toks.next();
                return Ok(None);
            }
            TokenKind::Eof => return Ok(None),
            TokenKind::Ident => (),
            _ => return Err(self.unexpected("instruction", first)),
        }

        let name = self.get_span(first.span);
        let opcode: Opcode = name.parse().map_err(|_| AsmError::UnknownMnemonic {
            name: name.to_string(),
            span: first.span.into(),
        })?;

        let (operands, last) = self.parse_operands(opcode, first.span)?;
        self.expect_end()?;

        Ok(Some(AsmLine {
            instr: Instr::new(opcode, &operands),
            span: first.span.to(last),
            line: self.line,
        }))
    }

    /// Parse operands following `opcode`, returning their bytes and the span of the last one.
    fn parse_operands(
        &mut self,
        opcode: Opcode,
        mut last: Span,
    ) -> Result<(Vec<u8>, Span), AsmError> {
        let kinds = opcode.operands();
        let mut bytes = Vec::with_capacity(kinds.len());

        // `JEQ addr` leaves the unused register as R0
        if opcode == Opcode::Jeq && self.peek_kind() == Some(TokenKind::Lit) {
            let (addr, span) = self.expect_lit()?;
            return Ok((vec![0, addr], span));
        }

        for (i, kind) in kinds.iter().enumerate() {
            // Commas between operands are optional
            if i > 0 {
                self.toks.next_if(|tok| tok.kind == TokenKind::Comma);
            }
            let (byte, span) = match kind {
                OperandKind::Reg => self.expect_reg()?,
                OperandKind::Imm | OperandKind::Addr => self.expect_lit()?,
            };
            bytes.push(byte);
            last = span;
        }
        Ok((bytes, last))
    }

    /// Next token on the current line. At a line break or end of file, a [`TokenKind::Newline`]
    /// or [`TokenKind::Eof`] token is returned without being consumed.
    fn advance(&mut self) -> Token {
        if let Some(tok) = self.toks.next_if(|tok| tok.kind != TokenKind::Newline) {
            return tok;
        }
        match self.toks.peek() {
            Some(newline) => *newline,
            None => Token {
                kind: TokenKind::Eof,
                span: Span::new(Idx(self.src.len() as u32), 0),
            },
        }
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.toks.peek().map(|tok| tok.kind)
    }

    fn expect_reg(&mut self) -> Result<(u8, Span), AsmError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Reg(index) if (index as usize) < REGISTER_COUNT => Ok((index, tok.span)),
            TokenKind::Reg(index) => Err(AsmError::InvalidRegister {
                index,
                span: tok.span.into(),
            }),
            _ => Err(self.unexpected("register", tok)),
        }
    }

    fn expect_lit(&mut self) -> Result<(u8, Span), AsmError> {
        let tok = self.advance();
        if tok.kind != TokenKind::Lit {
            return Err(self.unexpected("numeric literal", tok));
        }
        let text = self.get_span(tok.span);
        match text.parse::<u8>() {
            Ok(val) => Ok((val, tok.span)),
            Err(_) => Err(AsmError::LiteralOutOfRange {
                text: text.to_string(),
                span: tok.span.into(),
            }),
        }
    }

    /// Consume the line break ending an instruction.
    fn expect_end(&mut self) -> Result<(), AsmError> {
        match self.toks.next() {
            None => Ok(()),
            Some(tok) if tok.kind == TokenKind::Newline => Ok(()),
            Some(tok) => Err(self.unexpected("end of line", tok)),
        }
    }

    fn skip_line(&mut self) {
        for tok in self.toks.by_ref() {
            if tok.kind == TokenKind::Newline {
                break;
            }
        }
    }

    fn unexpected(&self, expected: &'static str, found: Token) -> AsmError {
        if found.kind == TokenKind::Unknown {
            return AsmError::InvalidToken {
                text: self.get_span(found.span).to_string(),
                span: found.span.into(),
            };
        }
        AsmError::UnexpectedToken {
            expected,
            found: found.kind,
            span: found.span.into(),
        }
    }

    /// Report the first line that does not fit in memory.
    fn check_size(&mut self) {
        let size = self.air.size();
        if size <= MEMORY_SIZE {
            return;
        }
        let overflowing = self
            .air
            .addressed()
            .find(|(addr, line)| addr + line.instr.size() > MEMORY_SIZE);
        if let Some((_, line)) = overflowing {
            self.errors.push(AsmError::ProgramTooLarge {
                size,
                span: line.span.into(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::disassemble;

    fn assemble(src: &str) -> Result<Vec<u8>, AssembleError> {
        AsmParser::new(src).parse().map(|air| air.emit())
    }

    fn errors(src: &str) -> Vec<AsmError> {
        match AsmParser::new(src).parse() {
            Ok(_) => panic!("expected `{src}` to fail"),
            Err(err) => err.errors,
        }
    }

    #[test]
    fn halt_is_one_byte() {
        assert_eq!(assemble("HLT").unwrap(), [0xFF]);
        assert_eq!(assemble("HLT\n").unwrap(), [0xFF]);
    }

    #[test]
    fn mov_roundtrips_through_disassembly() {
        let bytes = assemble("MOV R1, R2").unwrap();
        assert_eq!(bytes, [0xA0, 0x01, 0x02]);
        let listing: Vec<_> = disassemble(&bytes).collect();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].instr.unwrap().to_string(), "MOV R1, R2");
    }

    #[test]
    fn every_instruction() {
        let src = "\
; all instructions, in table order
NOP
MOV R1, R2
PUT R0, 65
ADD R1, R2
SUB R3, R4
MUL R5, R6
DIV R7, R0
OR R1, R2
AND R1, R2
XOR R1, R2
OUT R0
IN R3
JMP 200
JEQ R0, 12
CMP R1, R2
HLT
";
        #[rustfmt::skip]
        let expected = [
            0xFE,
            0xA0, 1, 2,
            0xA1, 0, 65,
            0xB0, 1, 2,
            0xB1, 3, 4,
            0xB2, 5, 6,
            0xB3, 7, 0,
            0xC0, 1, 2,
            0xC1, 1, 2,
            0xC2, 1, 2,
            0xD0, 0,
            0xD1, 3,
            0xE0, 200,
            0xE1, 0, 12,
            0xE2, 1, 2,
            0xFF,
        ];
        assert_eq!(assemble(src).unwrap(), expected);
    }

    #[test]
    fn comments_blank_lines_and_case() {
        let src = "; header\n\n   put r0, 65   ; trailing\n\tout R0\n\nhlt";
        assert_eq!(assemble(src).unwrap(), [0xA1, 0, 65, 0xD0, 0, 0xFF]);
    }

    #[test]
    fn optional_commas() {
        assert_eq!(assemble("ADD R1 R2").unwrap(), [0xB0, 1, 2]);
    }

    #[test]
    fn jeq_shorthand_encodes_unused_register() {
        assert_eq!(assemble("JEQ 9").unwrap(), [0xE1, 0, 9]);
        assert_eq!(assemble("JEQ R5, 9").unwrap(), [0xE1, 5, 9]);
    }

    #[test]
    fn line_numbers_and_spans() {
        let src = "; comment\nPUT R0, 1\n\nHLT";
        let air = AsmParser::new(src).parse().unwrap();
        assert_eq!(air.len(), 2);
        let put = air.get(0).unwrap();
        assert_eq!(put.line, 2);
        assert_eq!(&src[put.span.as_range()], "PUT R0, 1");
        assert_eq!(air.get(1).unwrap().line, 4);
    }

    #[test]
    fn unknown_mnemonic() {
        let errs = errors("FOO R1, R2");
        assert_eq!(errs.len(), 1);
        assert!(matches!(&errs[0], AsmError::UnknownMnemonic { name, .. } if name == "FOO"));
    }

    #[test]
    fn register_out_of_range() {
        let errs = errors("MOV R8, R1");
        assert!(matches!(errs[0], AsmError::InvalidRegister { index: 8, .. }));
    }

    #[test]
    fn literal_out_of_range() {
        let errs = errors("PUT R0, 256");
        assert!(matches!(&errs[0], AsmError::LiteralOutOfRange { text, .. } if text == "256"));
    }

    #[test]
    fn oversized_mnemonic_is_reported_whole() {
        let name = "X".repeat(70_000);
        let errs = errors(&name);
        assert!(matches!(&errs[0], AsmError::UnknownMnemonic { name: found, span }
            if *found == name && span.len() == 70_000));
    }

    #[test]
    fn invalid_token() {
        let errs = errors("PUT R0, -1\nPUT R0, 0x41");
        assert_eq!(errs.len(), 2);
        assert!(matches!(&errs[0], AsmError::InvalidToken { text, .. } if text == "-"));
        assert!(matches!(&errs[1], AsmError::InvalidToken { text, .. } if text == "0x41"));
    }

    #[test]
    fn missing_and_extra_operands() {
        let errs = errors("MOV R1\nOUT R0, R1\nJMP R1");
        assert_eq!(errs.len(), 3);
        assert!(matches!(
            errs[0],
            AsmError::UnexpectedToken { expected: "register", found: TokenKind::Newline, .. }
        ));
        assert!(matches!(
            errs[1],
            AsmError::UnexpectedToken { expected: "end of line", found: TokenKind::Comma, .. }
        ));
        assert!(matches!(
            errs[2],
            AsmError::UnexpectedToken { expected: "numeric literal", found: TokenKind::Reg(1), .. }
        ));
    }

    #[test]
    fn missing_operand_at_end_of_file() {
        let errs = errors("OUT");
        assert!(matches!(
            errs[0],
            AsmError::UnexpectedToken { found: TokenKind::Eof, .. }
        ));
    }

    #[test]
    fn line_must_start_with_instruction() {
        let errs = errors("R1, R2");
        assert!(matches!(
            errs[0],
            AsmError::UnexpectedToken { expected: "instruction", found: TokenKind::Reg(1), .. }
        ));
    }

    #[test]
    fn collects_every_error_and_emits_nothing() {
        let src = "PUT R0, 65\nBAD\nOUT R9\nHLT\nMOV R1, 300";
        let errs = errors(src);
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn error_after_missing_operand_does_not_swallow_next_line() {
        // The second line is fine, the third is not
        let errs = errors("OUT\nHLT\nNOPE");
        assert_eq!(errs.len(), 2);
        assert!(matches!(&errs[1], AsmError::UnknownMnemonic { name, .. } if name == "NOPE"));
    }

    #[test]
    fn program_must_fit_in_memory() {
        // 86 * 3 = 258 bytes
        let src = "PUT R0, 1\n".repeat(86);
        let errs = errors(&src);
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], AsmError::ProgramTooLarge { size: 258, .. }));

        // 85 * 3 + 1 = 256 bytes fits exactly
        let src = "PUT R0, 1\n".repeat(85) + "HLT";
        assert_eq!(assemble(&src).unwrap().len(), 256);
    }

    #[test]
    fn diagnostic_carries_source_name() {
        let err = AsmParser::new("BAD").with_name("prog.asm").parse().unwrap_err();
        assert_eq!(err.src.name(), "prog.asm");
        assert_eq!(err.to_string(), "Could not assemble program due to 1 error(s)");
    }
}
