// Heavily inspired by `rustc_lexer` and adapted to suit the project.
// See https://doc.rust-lang.org/beta/nightly-rustc/src/rustc_lexer/cursor.rs.html

use std::str::Chars;

/// Returned by [`Cursor::first`] once the input is exhausted.
pub const EOF_CHAR: char = '\0';

/// Peekable iterator over a char sequence.
pub struct Cursor<'a> {
    /// Length of the input remaining when the current token started
    len_remaining: usize,
    /// Whole input, used to recover token text
    src: &'a str,
    /// Iterator over chars in a &str
    chars: Chars<'a>,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Cursor<'a> {
        Cursor {
            len_remaining: input.len(),
            src: input,
            chars: input.chars(),
        }
    }

    /// Peek the next char without consuming it.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or(EOF_CHAR)
    }

    /// File is finished parsing
    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Move to the next char
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Eat chars while predicate holds or until EOF.
    pub fn take_while(&mut self, mut predicate: impl FnMut(char) -> bool) {
        while predicate(self.first()) && !self.is_eof() {
            self.bump();
        }
    }

    /// Offset from the start of the source to the start of the current token
    pub fn token_start(&self) -> usize {
        self.src.len() - self.len_remaining
    }

    /// Length of the current token so far
    pub fn pos_in_token(&self) -> u32 {
        (self.len_remaining - self.chars.as_str().len()) as u32
    }

    /// Text of the current token so far
    pub fn token_text(&self) -> &'a str {
        let start = self.token_start();
        &self.src[start..start + self.pos_in_token() as usize]
    }

    /// Start a new token at the current position
    pub fn reset_pos(&mut self) {
        self.len_remaining = self.chars.as_str().len();
    }
}
