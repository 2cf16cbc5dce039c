//! The contract between generated code and the host process.
//!
//! A compiled program is one native function, `main(begin, end)`, invoked on
//! a caller-supplied tape. It talks back to the host through exactly two
//! callbacks whose addresses were baked in at compile time, and it reports
//! how the run ended with a [RunResult] code in the return register. All
//! three signatures use the C calling convention of the host.

use std::io::{self, Read, Write};
use std::marker::PhantomData;

/// How a run of a compiled program ended.
///
/// The numeric values are part of the runtime ABI and must not change:
/// generated code stores them straight into the return register, host
/// callbacks report failures with them, and the CLI surfaces them as the
/// process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum RunResult {
    Success = 0,
    WriteError = 1,
    ReadError = 2,
    MemoryUnderrun = 3,
    OutOfMemory = 4,
}

impl RunResult {
    pub(crate) fn from_code(code: i64) -> RunResult {
        match code {
            0 => RunResult::Success,
            1 => RunResult::WriteError,
            2 => RunResult::ReadError,
            3 => RunResult::MemoryUnderrun,
            4 => RunResult::OutOfMemory,
            other => unreachable!("generated code returned unknown result code {}", other),
        }
    }

    /// The value the process should exit with after this run.
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

/// Writes the low 8 bits of the argument to the host's output.
/// Returns [RunResult::Success] or [RunResult::WriteError]. Must not unwind.
pub type WriteChar = extern "C" fn(i64) -> i64;

/// Reads one byte from the host's input through the pointer. Returns a
/// [RunResult] code; on a non-`Success` return the pointee is unspecified.
/// Must not unwind.
pub type ReadChar = extern "C" fn(*mut u8) -> i64;

/// The generated entry point: `main(begin, end) -> RunResult`. Both pointers
/// address the same contiguous byte buffer, `begin <= end`.
pub type MainFn = unsafe extern "C" fn(*mut u8, *mut u8) -> i64;

/// Stock [WriteChar] over the process's stdout.
///
/// Flushes every byte: the generated program may exit the process without
/// ever returning through Rust's buffered-stdout cleanup.
pub extern "C" fn write_stdout(value: i64) -> i64 {
    let mut stdout = io::stdout();
    match stdout.write_all(&[value as u8]).and_then(|_| stdout.flush()) {
        Ok(()) => RunResult::Success as i64,
        Err(_) => RunResult::WriteError as i64,
    }
}

/// Stock [ReadChar] over the process's stdin.
///
/// Clean end-of-input reads as a 0 byte with [RunResult::Success]; only a
/// genuine stream failure reads as [RunResult::ReadError].
pub extern "C" fn read_stdin(target: *mut u8) -> i64 {
    let mut byte = [0u8; 1];
    loop {
        return match io::stdin().read(&mut byte) {
            Ok(0) => {
                unsafe { *target = 0 };
                RunResult::Success as i64
            }
            Ok(_) => {
                unsafe { *target = byte[0] };
                RunResult::Success as i64
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => RunResult::ReadError as i64,
        };
    }
}

/// A program compiled to native code, ready to run.
///
/// The borrow of the [JitCompiler](crate::jit::JitCompiler) that produced it
/// keeps the code mapped for as long as the program is alive; the compiler
/// cannot be dropped out from under a live entry point.
#[derive(Debug)]
pub struct CompiledProgram<'jit> {
    entry: MainFn,
    _code: PhantomData<&'jit ()>,
}

impl<'jit> CompiledProgram<'jit> {
    pub(crate) fn new(entry: MainFn) -> Self {
        CompiledProgram {
            entry,
            _code: PhantomData,
        }
    }

    /// The raw native entry point.
    pub fn entry(&self) -> MainFn {
        self.entry
    }

    /// Runs the program over `tape`, which the caller must have
    /// zero-initialized. The program never touches memory outside the tape,
    /// and the tape is handed back exactly as the program left it.
    pub fn run(&self, tape: &mut [u8]) -> RunResult {
        if tape.is_empty() {
            // No addressable cell: the first dereference would escape the window.
            return RunResult::OutOfMemory;
        }

        let window = tape.as_mut_ptr_range();
        let code = unsafe { (self.entry)(window.start, window.end) };
        RunResult::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_codes_are_abi_stable() {
        assert_eq!(RunResult::Success as i64, 0);
        assert_eq!(RunResult::WriteError as i64, 1);
        assert_eq!(RunResult::ReadError as i64, 2);
        assert_eq!(RunResult::MemoryUnderrun as i64, 3);
        assert_eq!(RunResult::OutOfMemory as i64, 4);
    }

    #[test]
    fn round_trips_through_the_return_register() {
        for code in 0..=4 {
            assert_eq!(RunResult::from_code(code) as i64, code);
        }
    }

    #[test]
    fn exit_codes_match_the_numeric_values() {
        assert_eq!(RunResult::Success.exit_code(), 0);
        assert_eq!(RunResult::OutOfMemory.exit_code(), 4);
    }
}
