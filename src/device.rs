use std::collections::VecDeque;
use std::io::{self, stdin, stdout, IsTerminal, Read, Write};

use console::Term;

use crate::output::Output;

/// Byte-at-a-time I/O used by the `IN` and `OUT` instructions.
pub trait Device {
    /// Block until one byte is available. Returns `None` at end of input.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;
}

/// Process standard streams.
#[derive(Debug, Default)]
pub struct StdDevice;

/// Ctrl-D, as returned by an unbuffered terminal read.
const END_OF_TRANSMISSION: char = '\x04';

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum InputMode {
    /// Unbuffered keypresses through `console`
    Terminal,
    /// Plain reads from stdin
    Stream,
}

// `console` reads keys through the stdout terminal, so both ends must be a tty
fn input_mode(stdin_is_tty: bool, stdout_is_tty: bool) -> InputMode {
    if stdin_is_tty && stdout_is_tty {
        InputMode::Terminal
    } else {
        InputMode::Stream
    }
}

fn terminal_byte(ch: char) -> Option<u8> {
    if ch == END_OF_TRANSMISSION {
        return None;
    }
    let mut buf = [0; 4];
    // Only the first byte of a multi-byte character fits in a register
    ch.encode_utf8(&mut buf).bytes().next()
}

impl Device for StdDevice {
    // Read one byte from stdin or unbuffered terminal
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        match input_mode(stdin().is_terminal(), stdout().is_terminal()) {
            InputMode::Terminal => Ok(terminal_byte(Term::stdout().read_char()?)),
            InputMode::Stream => {
                let mut buf = [0; 1];
                match stdin().read(&mut buf)? {
                    0 => Ok(None),
                    _ => Ok(Some(buf[0])),
                }
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let mut out = stdout().lock();
        out.write_all(&[byte])?;
        out.flush()?;
        Output::set_line_start(byte == b'\n');
        Ok(())
    }
}

/// In-memory device, for tests and embedding.
#[derive(Debug, Default)]
pub struct BufferDevice {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

impl BufferDevice {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        let input: Vec<u8> = input.into();
        BufferDevice {
            input: VecDeque::from(input),
            output: Vec::new(),
        }
    }

    /// Everything written by the program so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn into_output(self) -> Vec<u8> {
        self.output
    }
}

impl Device for BufferDevice {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.pop_front())
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.output.push(byte);
        Ok(())
    }
}
