//! Compiles real programs and runs the generated native code against
//! scripted I/O.
//!
//! The runtime ABI gives callbacks no user-data argument (their addresses
//! are baked into the generated code), so the harness scripts input and
//! captures output through thread-locals. Each test thread gets its own.

use std::cell::RefCell;

use brainlift::{
    CompileContext, CompileError, JitCompiler, ReadChar, RunResult, SourceReader, WriteChar,
};

/// The classic 106-byte hello-world program.
const HELLO_WORLD: &[u8] =
    b"++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";

thread_local! {
    static INPUT: RefCell<Vec<u8>> = RefCell::new(Vec::new());
    static OUTPUT: RefCell<Vec<u8>> = RefCell::new(Vec::new());
}

extern "C" fn write_capture(value: i64) -> i64 {
    OUTPUT.with(|output| output.borrow_mut().push(value as u8));
    RunResult::Success as i64
}

/// Pops scripted input; clean end-of-input reads as 0, like the stock stdin
/// thunk.
extern "C" fn read_scripted(target: *mut u8) -> i64 {
    let byte = INPUT.with(|input| {
        let mut input = input.borrow_mut();
        if input.is_empty() {
            0
        } else {
            input.remove(0)
        }
    });
    unsafe { *target = byte };
    RunResult::Success as i64
}

extern "C" fn write_failing(_value: i64) -> i64 {
    RunResult::WriteError as i64
}

extern "C" fn read_failing(_target: *mut u8) -> i64 {
    RunResult::ReadError as i64
}

fn run_with_io(
    source: &[u8],
    heap_size: usize,
    input: &[u8],
    write_char: WriteChar,
    read_char: ReadChar,
) -> (RunResult, Vec<u8>) {
    INPUT.with(|scripted| *scripted.borrow_mut() = input.to_vec());
    OUTPUT.with(|captured| captured.borrow_mut().clear());

    let mut reader = SourceReader::new(source);
    let mut compiler = JitCompiler::new().expect("code generator should initialize");
    let program = compiler
        .compile(CompileContext {
            write_char,
            read_char,
            reader: &mut reader,
        })
        .expect("program should compile");

    let mut tape = vec![0u8; heap_size];
    let result = program.run(&mut tape);
    let output = OUTPUT.with(|captured| captured.borrow().clone());
    (result, output)
}

fn run_program(source: &[u8], heap_size: usize, input: &[u8]) -> (RunResult, Vec<u8>) {
    run_with_io(source, heap_size, input, write_capture, read_scripted)
}

fn compile_error(source: &[u8]) -> CompileError {
    let mut reader = SourceReader::new(source);
    let mut compiler = JitCompiler::new().expect("code generator should initialize");
    compiler
        .compile(CompileContext {
            write_char: write_capture,
            read_char: read_scripted,
            reader: &mut reader,
        })
        .err()
        .expect("program should fail to compile")
}

#[test]
fn hello_world() {
    let (result, output) = run_program(HELLO_WORLD, 30_000, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, b"Hello World!\n");
}

#[test]
fn echo_until_eof() {
    let (result, output) = run_program(b",[.,]", 1, b"abc");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, b"abc");
}

#[test]
fn adds_two_single_digits() {
    let (result, output) = run_program(b",>,<[->+<]>.", 2, &[2, 3]);
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[5]);
}

#[test]
fn moving_left_of_the_tape_underruns() {
    let (result, output) = run_program(b"<", 1, b"");
    assert_eq!(result, RunResult::MemoryUnderrun);
    assert_eq!(result.exit_code(), 3);
    assert!(output.is_empty());
}

#[test]
fn moving_past_the_tape_overruns() {
    let (result, output) = run_program(b">>", 2, b"");
    assert_eq!(result, RunResult::OutOfMemory);
    assert_eq!(result.exit_code(), 4);
    assert!(output.is_empty());
}

#[test]
fn as_many_moves_as_cells_overruns() {
    let (result, _) = run_program(b">", 1, b"");
    assert_eq!(result, RunResult::OutOfMemory);
}

#[test]
fn empty_program_succeeds_immediately() {
    let (result, output) = run_program(b"", 1, b"");
    assert_eq!(result, RunResult::Success);
    assert!(output.is_empty());
}

#[test]
fn comments_are_skipped() {
    let (result, output) = run_program(b"read one , and echo it back .", 1, b"x");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, b"x");
}

#[test]
fn cells_wrap_modulo_256() {
    let mut source = vec![b'+'; 256];
    source.push(b'.');
    let (result, output) = run_program(&source, 1, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[0]);
}

#[test]
fn increment_then_decrement_is_a_no_op() {
    let (result, output) = run_program(b"+-.", 1, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[0]);
}

#[test]
fn right_then_left_is_a_no_op_away_from_the_edges() {
    let (result, output) = run_program(b"+><.", 3, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[1]);
}

#[test]
fn loops_run_to_completion() {
    // 3 * 4 into the second cell, printed once.
    let (result, output) = run_program(b"+++[>++++<-]>.", 2, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[12]);
}

#[test]
fn nested_loops_run_to_completion() {
    // 2 * 2 * 2 into the third cell.
    let (result, output) = run_program(b"++[>++[>++<-]<-]>>.", 3, b"");
    assert_eq!(result, RunResult::Success);
    assert_eq!(output, &[8]);
}

#[test]
fn unmatched_open_bracket_fails_to_compile() {
    assert!(matches!(compile_error(b"[+"), CompileError::UnbalancedOpen));
}

#[test]
fn unmatched_close_bracket_fails_to_compile() {
    assert!(matches!(compile_error(b"]"), CompileError::UnbalancedClose));
    assert!(matches!(compile_error(b"[]]"), CompileError::UnbalancedClose));
}

#[test]
fn write_errors_short_circuit_the_program() {
    let (result, _) = run_with_io(b"+.+.", 1, b"", write_failing, read_scripted);
    assert_eq!(result, RunResult::WriteError);
}

#[test]
fn read_errors_short_circuit_the_program() {
    let (result, output) = run_with_io(b",.", 1, b"", write_capture, read_failing);
    assert_eq!(result, RunResult::ReadError);
    assert!(output.is_empty());
}

#[test]
fn identical_runs_are_deterministic() {
    let first = run_program(b",[.,]", 4, b"determinism");
    let second = run_program(b",[.,]", 4, b"determinism");
    assert_eq!(first, second);
}

#[test]
fn an_empty_tape_has_no_addressable_cell() {
    let (result, _) = run_program(b"+", 0, b"");
    assert_eq!(result, RunResult::OutOfMemory);
}
