use std::cell::RefCell;
use std::str::Chars;

use colored::Colorize;

use crate::isa::{Category, Listing, Opcode};
use crate::runtime::Snapshot;

/// Print a line of diagnostics to stderr.
#[macro_export]
macro_rules! dprintln {
    ( $fmt:literal $($tt:tt)* ) => {{
        let s = format!(
            concat!($fmt, "\n")
            $($tt)*
        );
        $crate::output::Output::Diagnostic.print_str(&s);
    }};
}

/// Where toolchain output goes. Program output is written by the device, not through here.
#[derive(Clone, Copy, Debug)]
pub enum Output {
    /// Stdout, for the product of a command (dumps, listings)
    Normal,
    /// Stderr, for everything printed around a running program
    Diagnostic,
}

/// Inner width of the register box.
const BOX_WIDTH: usize = 30;

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_LINE_START: RefCell<bool> = const { RefCell::new(true) };
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_line_start(new_value: bool) -> bool {
        Self::IS_LINE_START.with(|value| value.replace(new_value))
    }
    /// Private. Use [`Output::start_new_line`].
    fn is_line_start() -> bool {
        Self::IS_LINE_START.with(|value| *value.borrow())
    }
    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }
    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    fn set_line_start_from_str(string: &str) {
        if let Some(ch) = Decolored::new(string).last() {
            Output::set_line_start(ch == '\n');
        }
    }

    pub fn print_str(&self, string: &str) {
        // Always remove color if `--minimal`
        let owned;
        let string = if Self::is_minimal() {
            owned = Decolored::new(string).collect::<String>();
            owned.as_str()
        } else {
            string
        };
        match self {
            Self::Normal => print!("{}", string),
            Self::Diagnostic => eprint!("{}", string),
        }
        Self::set_line_start_from_str(string);
    }

    /// Make sure the next diagnostic does not continue a line of program output.
    pub fn start_new_line(&self) {
        if !Self::is_line_start() {
            self.print_str("\n");
        }
    }

    pub fn print_registers(&self, state: &Snapshot) {
        if Self::is_minimal() {
            for (i, value) in state.registers.iter().enumerate() {
                self.print_str(&format!("R{} {}\n", i, value));
            }
            self.print_str(&format!("PC {}\n", state.pc));
            self.print_str(&format!("EQ {}\n", state.equal_flag as u8));
            self.print_str(&format!("HALTED {}\n", state.halted as u8));
            return;
        }

        let border = "─".repeat(BOX_WIDTH);
        self.print_str(&format!("\x1b[2m┌{border}┐\x1b[0m\n"));
        self.boxed_row(&format!(
            " {:<3}  {:>4}  {:>4}  {:>4}  {:<3}",
            "", "hex", "uint", "int", "chr"
        ));
        for (i, &value) in state.registers.iter().enumerate() {
            self.boxed_row(&format!(
                " R{:<2}  0x{:02x}  {:>4}  {:>4}  {:<3}",
                i,
                value,
                value,
                value as i8,
                char_display(value)
            ));
        }
        self.print_str(&format!("\x1b[2m├{border}┤\x1b[0m\n"));
        self.boxed_row(&format!(
            " PC 0x{:02x}  EQ {}  HALT {}  DLY {}",
            state.pc, state.equal_flag as u8, state.halted as u8, state.flag_clear_delay
        ));
        self.print_str(&format!("\x1b[2m└{border}┘\x1b[0m\n"));
    }

    fn boxed_row(&self, content: &str) {
        self.print_str(&format!(
            "\x1b[2m│\x1b[0m{:<width$}\x1b[2m│\x1b[0m\n",
            content,
            width = BOX_WIDTH
        ));
    }

    /// Whole memory image, 16 bytes per row. Opcode bytes are colored by category.
    pub fn print_memory(&self, mem: &[u8]) {
        let mut header = String::from("    ");
        for col in 0..16 {
            header.push_str(&format!(" {:02x}", col));
        }
        self.print_str(&format!("\x1b[2m{header}\x1b[0m\n"));

        for (row, chunk) in mem.chunks(16).enumerate() {
            let mut line = format!("\x1b[2m{:02x}:\x1b[0m ", row * 16);
            for &byte in chunk {
                line.push(' ');
                line.push_str(&color_byte(byte));
            }
            line.push('\n');
            self.print_str(&line);
        }
    }

    /// One line of a disassembly listing.
    pub fn print_listing(&self, entry: &Listing) {
        let bytes = entry
            .bytes
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        let text = match entry.instr {
            Ok(instr) => instr.to_string().bold().to_string(),
            Err(err) => {
                let data = entry
                    .bytes
                    .iter()
                    .map(|byte| format!("0x{byte:02x}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(".byte {data}  {}", format!("; {err}").dimmed())
            }
        };
        self.print_str(&format!("{:>3}:  {:<9} {}\n", entry.addr, bytes, text));
    }
}

fn color_byte(byte: u8) -> String {
    let hex = format!("{byte:02x}");
    let Ok(opcode) = Opcode::try_from(byte) else {
        return hex;
    };
    match opcode.category() {
        Category::Memory => hex.black().on_green(),
        Category::Arithmetic => hex.black().on_yellow(),
        Category::Bitwise => hex.black().on_magenta(),
        Category::Io => hex.black().on_cyan(),
        Category::Jump => hex.white().on_blue(),
        Category::Nop => hex.dimmed(),
        Category::Halt => hex.white().on_red(),
    }
    .to_string()
}

/// At most 3 characters.
fn char_display(value: u8) -> String {
    match value {
        // ASCII control characters which are arbitrarily considered significant
        0x00 => "NUL".into(),
        0x08 => "BS".into(),
        0x09 => "HT".into(),
        0x0a => "LF".into(),
        0x0d => "CR".into(),
        0x1b => "ESC".into(),
        0x7f => "DEL".into(),
        // Space
        0x20 => "[_]".into(),
        // Printable ASCII characters
        0x21..=0x7e => (value as char).to_string(),
        _ => "---".into(),
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl Iterator for Decolored<'_> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}
