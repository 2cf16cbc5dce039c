//! Lowering from the opcode stream to IR: the heart of the compiler.
//!
//! One [CompilationUnit] builds one function that embodies the entire
//! program. The tape window arrives as the function's two arguments:
//!
//! ```text
//! main(begin: i64, end: i64) -> i64   // RunResult in the return register
//! ```
//!
//! `current`, the data pointer, starts at `begin` and is kept strictly
//! inside the half-open window `[begin, end)`, so every opcode is free to
//! dereference it. All arithmetic happens in 64-bit scratch registers; the
//! tape itself is only ever touched through 8-bit loads and stores at
//! `[current]`, which is what makes cell arithmetic wrap modulo 256.
//!
//! The two error tails (`memory underrun`, `out of memory`) are shared: each
//! bounds check across the whole program branches to the same label, and the
//! tails are laid down after the happy-path return so the generator can
//! place them cold.

use crate::errors::CompileError;
use crate::ir::{IrBuilder, Label, Proto, Reg};
use crate::parsing::{Opcode, OpcodeSource};
use crate::program::{ReadChar, RunResult, WriteChar};

/// The two branch targets belonging to one matched `[`/`]` pair.
struct LoopLabels {
    open: Label,
    close: Label,
}

/// Transient state for compiling exactly one program. None of its labels,
/// registers, or prototypes survives the compilation.
pub(crate) struct CompilationUnit<'a, 'b> {
    ir: IrBuilder<'b>,
    reader: &'a mut dyn OpcodeSource,
    write_char: WriteChar,
    read_char: ReadChar,

    /// One entry per `[` still waiting for its `]`. Depth of this stack is
    /// always the net open-bracket depth of the source consumed so far.
    loop_labels: Vec<LoopLabels>,

    begin: Reg,
    end: Reg,
    current: Reg,

    underrun: Label,
    oom: Label,

    write_proto: Proto,
    read_proto: Proto,
}

impl<'a, 'b> CompilationUnit<'a, 'b> {
    /// Lays down the function prologue: callback prototypes, argument
    /// registers, `current = begin`, and the two error-tail labels. The
    /// tails stay unplaced until [translate](Self::translate) finishes so
    /// that successful control flow never crosses them.
    pub(crate) fn new(
        mut ir: IrBuilder<'b>,
        reader: &'a mut dyn OpcodeSource,
        write_char: WriteChar,
        read_char: ReadChar,
    ) -> Self {
        let int = ir.int_type();
        let ptr = ir.ptr_type();
        let read_proto = ir.declare_proto(&[ptr], &[int]);
        let write_proto = ir.declare_proto(&[int], &[int]);

        let begin = ir.arg(0);
        let end = ir.arg(1);
        let current = ir.new_reg();
        ir.mov(current, begin);

        let underrun = ir.new_label();
        let oom = ir.new_label();

        CompilationUnit {
            ir,
            reader,
            write_char,
            read_char,
            loop_labels: Vec::new(),
            begin,
            end,
            current,
            underrun,
            oom,
            write_proto,
            read_proto,
        }
    }

    /// Drains the reader, emitting IR for every opcode, then closes the
    /// function with the shared error tails.
    pub(crate) fn translate(mut self) -> Result<(), CompileError> {
        loop {
            match self.reader.next()? {
                Opcode::Inc => self.emit_inc(),
                Opcode::Dec => self.emit_dec(),
                Opcode::Next => self.emit_next(),
                Opcode::Prev => self.emit_prev(),
                Opcode::Jz => self.emit_jz(),
                Opcode::Jnz => self.emit_jnz()?,
                Opcode::Write => self.emit_write(),
                Opcode::Read => self.emit_read(),
                Opcode::End => break,
            }
        }

        self.finish()
    }

    fn emit_inc(&mut self) {
        let value = self.load_cell();
        self.ir.add_imm(value, value, 1);
        self.ir.store_byte(self.current, value);
    }

    fn emit_dec(&mut self) {
        let value = self.load_cell();
        self.ir.sub_imm(value, value, 1);
        self.ir.store_byte(self.current, value);
    }

    fn emit_next(&mut self) {
        // Compare after the move: `current` never rests on `end`.
        self.ir.add_imm(self.current, self.current, 1);
        self.ir.branch_if_equal(self.current, self.end, self.oom);
    }

    fn emit_prev(&mut self) {
        self.ir.branch_if_equal(self.current, self.begin, self.underrun);
        self.ir.sub_imm(self.current, self.current, 1);
    }

    fn emit_jz(&mut self) {
        let open = self.ir.new_label();
        let close = self.ir.new_label();
        self.loop_labels.push(LoopLabels { open, close });

        let value = self.load_cell();
        self.ir.branch_if_equal_imm(value, 0, close);
        self.ir.place_label(open);
    }

    fn emit_jnz(&mut self) -> Result<(), CompileError> {
        let LoopLabels { open, close } = self
            .loop_labels
            .pop()
            .ok_or(CompileError::UnbalancedClose)?;

        let value = self.load_cell();
        self.ir.branch_if_not_equal_imm(value, 0, open);
        self.ir.place_label(close);
        Ok(())
    }

    fn emit_write(&mut self) {
        let value = self.load_cell();
        let status = self.ir.new_reg();
        self.ir
            .call(self.write_proto, self.write_char as usize, status, &[value]);
        self.check_status(status);
    }

    fn emit_read(&mut self) {
        // The callback writes straight through the tape pointer.
        let status = self.ir.new_reg();
        self.ir.call(
            self.read_proto,
            self.read_char as usize,
            status,
            &[self.current],
        );
        self.check_status(status);
    }

    /// Callback errors propagate out of `main` unchanged: anything but
    /// `Success` returns immediately, without unwinding loops.
    fn check_status(&mut self, status: Reg) {
        let ok = self.ir.new_label();
        self.ir
            .branch_if_equal_imm(status, RunResult::Success as i64, ok);
        self.ir.ret_reg(status);
        self.ir.place_label(ok);
    }

    fn finish(mut self) -> Result<(), CompileError> {
        if !self.loop_labels.is_empty() {
            return Err(CompileError::UnbalancedOpen);
        }

        self.ir.ret_imm(RunResult::Success as i64);
        self.ir.place_label(self.underrun);
        self.ir.ret_imm(RunResult::MemoryUnderrun as i64);
        self.ir.place_label(self.oom);
        self.ir.ret_imm(RunResult::OutOfMemory as i64);
        self.ir.finish();
        Ok(())
    }

    fn load_cell(&mut self) -> Reg {
        let value = self.ir.new_reg();
        self.ir.load_byte(value, self.current);
        value
    }
}
