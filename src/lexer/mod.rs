use crate::lexer::cursor::Cursor;
use crate::span::{Idx, Span};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonic, or any other word that is not a register
    Ident,
    /// `R` followed by a single digit. Index is not range checked here.
    Reg(u8),
    /// Unsigned decimal literal, value is parsed from the span
    Lit,
    Comma,
    /// From `;` to end of line
    Comment,
    /// Excludes line breaks
    Whitespace,
    Newline,
    Unknown,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Ident => "identifier",
            TokenKind::Reg(_) => "register",
            TokenKind::Lit => "literal",
            TokenKind::Comma => "comma",
            TokenKind::Comment => "comment",
            TokenKind::Whitespace => "whitespace",
            TokenKind::Newline => "end of line",
            TokenKind::Unknown => "unknown token",
            TokenKind::Eof => "end of file",
        };
        f.write_str(name)
    }
}

/// Lex the whole input, without the trailing [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(input);
    std::iter::from_fn(move || {
        let token = cursor.advance_token();
        if token.kind != TokenKind::Eof {
            Some(token)
        } else {
            None
        }
    })
}

/// Test if a character is considered to be whitespace on a single line.
pub(crate) fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

/// Test if a character can appear in a word (mnemonic, register or literal).
pub(crate) fn is_id(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

/// Registers are written as exactly two characters, eg. `R3`.
fn as_register(word: &str) -> Option<u8> {
    match word.as_bytes() {
        [b'R' | b'r', digit @ b'0'..=b'9'] => Some(digit - b'0'),
        _ => None,
    }
}

impl Cursor<'_> {
    pub fn advance_token(&mut self) -> Token {
        let start = self.token_start();
        let first_char = match self.bump() {
            Some(c) => c,
            None => {
                return Token {
                    kind: TokenKind::Eof,
                    span: Span::new(Idx(start as u32), 0),
                }
            }
        };
        let kind = match first_char {
            ';' => {
                self.take_while(|c| c != '\n');
                TokenKind::Comment
            }
            '\n' => TokenKind::Newline,
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            ',' => TokenKind::Comma,
            // Decimal literal, digits glued to letters are not a number
            c if c.is_ascii_digit() => {
                self.take_while(is_id);
                if self.token_text().bytes().all(|b| b.is_ascii_digit()) {
                    TokenKind::Lit
                } else {
                    TokenKind::Unknown
                }
            }
            c if is_id(c) => {
                self.take_while(is_id);
                match as_register(self.token_text()) {
                    Some(idx) => TokenKind::Reg(idx),
                    None => TokenKind::Ident,
                }
            }
            _ => TokenKind::Unknown,
        };
        let span = Span::new(Idx(start as u32), self.pos_in_token());
        self.reset_pos();
        Token { kind, span }
    }
}
