//! `seq` — REPL, file runner, and bytecode sanity check for the Seq VM.
//!
//! `seq` starts a REPL; `seq <file>` compiles and runs a source file; `seq
//! --test` runs a hand-assembled `Chunk` through the VM directly, bypassing
//! the compiler entirely, as a standalone sanity check of the runtime.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use seq_core::object::{Heap, Obj, ObjFunction, ObjKind};
use seq_core::{Chunk, OpCode, Value};
use seq_runtime::{RuntimeError, VmConfig};

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

#[derive(Parser)]
#[command(name = "seq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Seq: a bytecode-compiled scripting language", long_about = None)]
struct Cli {
    /// Source file to run. Omit to start the REPL.
    file: Option<PathBuf>,

    /// Run a hand-built bytecode sanity check instead of compiling anything.
    #[arg(long)]
    test: bool,

    /// Call-frame depth before "Stack overflow."
    #[arg(long)]
    max_frames: Option<usize>,

    /// Initial value-stack capacity.
    #[arg(long)]
    stack_capacity: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut config = VmConfig::default();
    if let Some(max_frames) = cli.max_frames {
        config.max_frames = max_frames;
    }
    if let Some(capacity) = cli.stack_capacity {
        config.initial_stack_capacity = capacity;
    }

    if cli.test {
        return run_sanity_check(config);
    }

    match cli.file {
        Some(path) => run_file(&path, config),
        None => run_repl(config),
    }
}

fn run_file(path: &Path, config: VmConfig) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("seq: could not read {}: {e}", path.display());
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, config);
    match vm.interpret(&source, Some(path)) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => report_error(&e, path),
    }
}

/// Exits 65 for a compile error, 70 for a runtime error. `interpret` folds
/// both into the same `RuntimeError` type; a compile error's trace is
/// always empty, a runtime error's never is unless it unwound from the
/// top-level frame directly.
fn report_error(err: &RuntimeError, path: &Path) -> ExitCode {
    eprint!("{err}");
    if err.trace.is_empty() {
        eprintln!("seq: error compiling {}", path.display());
        ExitCode::from(EXIT_COMPILE_ERROR)
    } else {
        ExitCode::from(EXIT_RUNTIME_ERROR)
    }
}

fn run_repl(config: VmConfig) -> ExitCode {
    let heap = Heap::new();
    let mut vm = seq_runtime::new_vm(&heap, config);
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("seq: could not start line editor: {e}");
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    println!("seq {}", env!("CARGO_PKG_VERSION"));
    loop {
        match editor.readline("seq> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                editor.add_history_entry(line.as_str()).ok();
                if let Err(e) = vm.interpret(&line, None) {
                    eprint!("{e}");
                }
                std::io::stdout().flush().ok();
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("seq: readline error: {e}");
                break;
            }
        }
    }
    ExitCode::from(EXIT_OK)
}

/// Builds `1 + 2`, prints it, and returns — entirely by hand, through raw
/// `OpCode` bytes and a `Chunk` assembled without the compiler crate. Exists
/// to exercise the VM's dispatch loop in isolation when diagnosing whether a
/// bug lives in the compiler or the runtime.
fn run_sanity_check(config: VmConfig) -> ExitCode {
    let heap = Heap::new();
    let function = build_sanity_function(&heap);

    let mut vm = seq_runtime::new_vm(&heap, config);
    match vm.run_function(function) {
        Ok(()) => {
            println!("sanity check ok");
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            eprint!("{e}");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

fn build_sanity_function(heap: &Heap) -> *mut Obj {
    let mut chunk = Chunk::new();
    let one = chunk.add_constant(Value::Int(1));
    let two = chunk.add_constant(Value::Int(2));

    chunk.write(OpCode::Constant as u8, 1);
    chunk.write(one, 1);
    chunk.write(OpCode::Constant as u8, 1);
    chunk.write(two, 1);
    chunk.write(OpCode::Add as u8, 1);
    chunk.write(OpCode::Print as u8, 1);
    chunk.write(OpCode::Nil as u8, 1);
    chunk.write(OpCode::Return as u8, 1);

    let mut function = ObjFunction::new(None);
    function.chunk = chunk;
    heap.alloc(ObjKind::Function(function))
}
