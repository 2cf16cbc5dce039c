//! A just-in-time compiler for brainfuck, built on Cranelift.
//!
//! There is no AST and no bytecode in between: the language is simple enough
//! that source bytes lower straight to Cranelift IR in one pass.
//!
//!  - [parsing] streams [Opcode]s off any byte source, skipping everything
//!    that isn't one of the eight program characters.
//!  - `codegen` lowers the opcode stream into one IR function per program,
//!    through the thin typed facade in `ir`. This is where bracket
//!    balancing, the bounds checks, and the callback plumbing live.
//!  - `jit` owns the Cranelift context, links the function, and hands back a
//!    callable [CompiledProgram].
//!  - [program] is the runtime contract: [RunResult] codes, the callback
//!    signatures, and the stock stdin/stdout thunks.

pub mod errors;
pub mod parsing;
pub mod program;

mod codegen;
mod ir;
mod jit;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use structopt::StructOpt;

pub use crate::errors::CompileError;
pub use crate::jit::{CompileContext, JitCompiler};
pub use crate::parsing::{Opcode, OpcodeSource, SourceReader};
pub use crate::program::{CompiledProgram, MainFn, ReadChar, RunResult, WriteChar};

/// Command-line options for the `brainlift` binary.
#[derive(Debug, StructOpt)]
#[structopt(name = "brainlift", about = "A just-in-time compiler for brainfuck")]
pub struct Opt {
    /// The path to a file containing brainfuck sources
    #[structopt(parse(from_os_str))]
    pub file: PathBuf,

    /// The size of heap, in bytes, available to the program
    #[structopt(long = "heap-size", default_value = "1048576")]
    pub heap_size: usize,
}

/// Compiles and runs the given file, with the program's I/O wired to this
/// process's stdin and stdout. Returns the program's own exit status; the
/// caller decides how to surface it.
pub fn run(opt: &Opt) -> Result<RunResult, CompileError> {
    let source = File::open(&opt.file)?;
    let mut reader = SourceReader::new(BufReader::new(source));

    let mut compiler = JitCompiler::new()?;
    let compiled = compiler.compile(CompileContext {
        write_char: program::write_stdout,
        read_char: program::read_stdin,
        reader: &mut reader,
    })?;

    let mut tape = vec![0u8; opt.heap_size];
    Ok(compiled.run(&mut tape))
}
