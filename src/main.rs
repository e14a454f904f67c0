use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use dumb8::isa::{disassemble, MEMORY_SIZE, REGISTER_COUNT};
use dumb8::output::Output;
use dumb8::{Air, AsmParser, LoadError, RunState, StdDevice};

/// dumb8 assembles and runs programs for a tiny 8-bit processor.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` or `.bin` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.asm` or binary `.bin` file directly and output to terminal
    Run {
        /// `.asm` or `.bin` file to run
        name: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Create binary `.bin` file to run later
    Compile {
        /// `.asm` file to compile
        name: PathBuf,
        /// Destination to output .bin file
        dest: Option<PathBuf>,
    },
    /// Check a `.asm` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Print the memory image of a program without running it
    Dump {
        /// `.asm` or `.bin` file to load
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Print a listing of the instructions in a program
    Disasm {
        /// `.asm` or `.bin` file to list
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
    },
    /// Place a watch on a `.asm` file to receive constant assembler updates
    Watch {
        /// `.asm` file to watch
        name: PathBuf,
    },
}

#[derive(clap::Args, Default)]
struct RunOptions {
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
    /// Stop with an error after this many instructions
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,
    /// Seed a register before running, eg. `--reg R1=20`
    #[arg(short, long = "reg", value_name = "RK=V", value_parser = parse_reg)]
    regs: Vec<(usize, u8)>,
    /// Print memory before running and registers after halting
    #[arg(short, long)]
    dump: bool,
    /// Print every executed instruction
    #[arg(short, long)]
    trace: bool,
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    dumb8::env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(dumb8::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run { name, options } => run(&name, options),
            Command::Compile { name, dest } => {
                file_message(Green, "Assembling", &name);
                let air = assemble(&name)?;

                let out_file_name = match dest {
                    Some(dest) => dest,
                    None => name.with_extension("bin"),
                };
                fs::write(&out_file_name, air.emit()).into_diagnostic()?;

                message(Green, "Finished", &format!("emit {} bytes", air.size()));
                file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let _ = assemble(&name)?;
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Dump { name, minimal } => {
                Output::set_minimal(minimal);
                let program = RunState::from_raw(&load(&name)?)?;
                Output::Normal.print_memory(program.mem());
                Ok(())
            }
            Command::Disasm { name, minimal } => {
                Output::set_minimal(minimal);
                let image = load(&name)?;
                if image.len() > MEMORY_SIZE {
                    return Err(LoadError::TooLarge {
                        size: image.len(),
                        max: MEMORY_SIZE,
                    }
                    .into());
                }
                for entry in disassemble(&image) {
                    Output::Normal.print_listing(&entry);
                }
                Ok(())
            }
            Command::Watch { name } => watch(name),
        }
    } else if let Some(path) = args.path {
        run(&path, RunOptions::default())
    } else {
        println!("\n~ dumb8 v{VERSION} ~");
        println!("{}", LOGO.truecolor(255, 183, 197).bold());
        println!("{SHORT_INFO}");
        Ok(())
    }
}

/// Re-assemble `name` whenever anything in its directory changes. Runs until interrupted.
fn watch(name: PathBuf) -> Result<()> {
    if !name.exists() {
        bail!("File does not exist. Exiting...")
    }
    // Editors that swap files on save lose a watch on the file itself
    let dir = name
        .parent()
        .filter(|dir| dir.is_dir())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut watcher =
        Hotwatch::new_with_custom_delay(Duration::from_millis(500)).into_diagnostic()?;
    recheck(&name, false);

    watcher
        .watch(dir, move |event: Event| {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Remove(_)) {
                recheck(&name, true);
            }
            Flow::Continue
        })
        .into_diagnostic()?;
    watcher.run();
    Ok(())
}

fn recheck(name: &Path, changed: bool) {
    use MsgColor::*;
    // Clear screen and move cursor to top left
    print!("\x1B[2J\x1B[2;1H");
    Output::set_line_start(true);
    file_message(Green, "Watching", name);
    if changed {
        message(Green, "Re-checking", "file change detected");
        // Otherwise a rerun looks identical to the last one
        sleep(Duration::from_millis(50));
    }
    message(Cyan, "Help", "press CTRL+C to exit");

    match assemble(name) {
        Ok(air) => message(
            Green,
            "Success",
            &format!("no errors found, {} bytes", air.size()),
        ),
        Err(report) => println!("\n{:?}", report),
    }
}

enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

/// Status line. Silent in minimal mode so stdout only carries program output.
fn message(color: MsgColor, left: &str, right: &str) {
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    Output::Normal.start_new_line();
    Output::Normal.print_str(&format!("{left:>12} {right}\n"));
}

fn run(name: &Path, options: RunOptions) -> Result<()> {
    Output::set_minimal(options.minimal);

    file_message(MsgColor::Green, "Loading", name);
    let mut program = RunState::from_raw(&load(name)?)?;
    for (index, value) in options.regs {
        program.set_reg(index, value)?;
    }
    program.set_max_steps(options.max_steps.or_else(dumb8::env::max_steps));
    program.set_trace(options.trace || dumb8::env::trace_enabled());

    if options.dump {
        Output::Diagnostic.print_memory(program.mem());
    }

    message(MsgColor::Green, "Running", "emitted binary");
    let result = program.run(&mut StdDevice);
    Output::Diagnostic.start_new_line();

    match result {
        Ok(()) => {
            if options.dump {
                Output::Diagnostic.print_registers(&program.snapshot());
            }
            file_message(MsgColor::Green, "Completed", name);
            Ok(())
        }
        Err(fault) => {
            message(
                MsgColor::Red,
                "Faulted",
                &format!("at address {}", fault.addr()),
            );
            Output::Diagnostic.print_registers(&program.snapshot());
            Err(fault.into())
        }
    }
}

/// Memory image of a `.asm` or `.bin` file.
fn load(name: &Path) -> Result<Vec<u8>> {
    match name.extension().and_then(OsStr::to_str) {
        Some("bin") => fs::read(name).into_diagnostic(),
        Some("asm") => Ok(assemble(name)?.emit()),
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    }
}

/// Return assembly intermediate representation of source file for further processing
fn assemble(name: &Path) -> Result<Air> {
    let contents = fs::read_to_string(name).into_diagnostic()?;
    let air = AsmParser::new(&contents)
        .with_name(name.display().to_string())
        .parse()?;
    Ok(air)
}

/// `R1=20` to `(1, 20)`.
fn parse_reg(arg: &str) -> std::result::Result<(usize, u8), String> {
    let (reg, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected `RK=V`, found `{arg}`"))?;
    let index = reg
        .strip_prefix(['R', 'r'])
        .and_then(|index| index.parse::<usize>().ok())
        .filter(|&index| index < REGISTER_COUNT)
        .ok_or_else(|| format!("`{reg}` is not a register, expected R0 to R7"))?;
    let value = value
        .parse::<u8>()
        .map_err(|_| format!("`{value}` is not a value from 0 to 255"))?;
    Ok((index, value))
}

const LOGO: &str = r#"
     _                 _     ___
  __| |_   _ _ __ ___ | |__ ( _ )
 / _` | | | | '_ ` _ \| '_ \/ _ \
| (_| | |_| | | | | | | |_) | (_) |
 \__,_|\__,_|_| |_| |_|_.__/ \___/"#;

const SHORT_INFO: &str = r"
Welcome to dumb8, an assembler and emulator for a tiny 8-bit processor
with 8 registers and 256 bytes of memory.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
