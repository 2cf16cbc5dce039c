//! A thin, typed layer over Cranelift's IR construction primitives.
//!
//! [codegen](crate::codegen) decides *what* to emit; this module only knows
//! how to phrase it: registers become SSA variables (construction and
//! use-range cleanup stay Cranelift's problem), labels become blocks, and
//! fallthrough into a label becomes an explicit jump, since Cranelift blocks
//! must be explicitly terminated. Every assert-grade precondition on IR
//! construction (a label is placed exactly once, nothing is emitted after
//! the function is finished) lives here and nowhere else.

use std::collections::HashSet;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block, InstBuilder, MemFlags, SigRef, Signature, Type, Value,
};
use cranelift_frontend::{FunctionBuilder, Variable};

/// A branch target. Created detached, then placed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Label(Block);

/// A 64-bit virtual register. Fresh ones are numbered `temp_0`, `temp_1`, …
/// in order of creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reg(Variable);

/// A declared callee signature, usable in calls through an address immediate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Proto(SigRef);

/// Builds the body of one function, then is consumed by [IrBuilder::finish].
pub(crate) struct IrBuilder<'b> {
    builder: FunctionBuilder<'b>,
    ptr_type: Type,
    entry: Block,
    next_reg: u32,
    labels_created: usize,
    labels_placed: HashSet<Block>,
    terminated: bool,
}

impl<'b> IrBuilder<'b> {
    /// Opens the function: creates the entry block and binds its parameters.
    pub(crate) fn new(mut builder: FunctionBuilder<'b>, ptr_type: Type) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        IrBuilder {
            builder,
            ptr_type,
            entry,
            next_reg: 0,
            labels_created: 0,
            labels_placed: HashSet::new(),
            terminated: false,
        }
    }

    pub(crate) fn int_type(&self) -> Type {
        types::I64
    }

    pub(crate) fn ptr_type(&self) -> Type {
        self.ptr_type
    }

    /// Binds the function argument at `index` into a fresh register.
    pub(crate) fn arg(&mut self, index: usize) -> Reg {
        let value = self.builder.block_params(self.entry)[index];
        let reg = self.new_reg();
        self.builder.def_var(reg.0, value);
        reg
    }

    /// A fresh 64-bit scratch register.
    pub(crate) fn new_reg(&mut self) -> Reg {
        let var = Variable::from_u32(self.next_reg);
        self.next_reg += 1;
        self.builder.declare_var(var, types::I64);
        Reg(var)
    }

    /// A fresh, not-yet-placed label.
    pub(crate) fn new_label(&mut self) -> Label {
        self.labels_created += 1;
        Label(self.builder.create_block())
    }

    /// Places `label` at the current instruction cursor. If the preceding
    /// instruction falls through, control continues at the label.
    pub(crate) fn place_label(&mut self, label: Label) {
        assert!(
            self.labels_placed.insert(label.0),
            "label {} placed twice",
            label.0
        );

        if !self.terminated {
            self.builder.ins().jump(label.0, &[]);
        }
        self.builder.switch_to_block(label.0);
        self.terminated = false;
    }

    /// Declares a callee signature with the given argument and return types.
    pub(crate) fn declare_proto(&mut self, params: &[Type], returns: &[Type]) -> Proto {
        let mut signature = Signature::new(self.builder.func.signature.call_conv);
        for &param in params {
            signature.params.push(AbiParam::new(param));
        }
        for &ret in returns {
            signature.returns.push(AbiParam::new(ret));
        }
        Proto(self.builder.import_signature(signature))
    }

    /// `dst = src`.
    pub(crate) fn mov(&mut self, dst: Reg, src: Reg) {
        let value = self.builder.use_var(src.0);
        self.builder.def_var(dst.0, value);
    }

    /// `dst = zero_extend(*(u8*)addr)`.
    pub(crate) fn load_byte(&mut self, dst: Reg, addr: Reg) {
        let addr = self.builder.use_var(addr.0);
        let byte = self
            .builder
            .ins()
            .load(types::I8, MemFlags::trusted(), addr, 0);
        let wide = self.builder.ins().uextend(types::I64, byte);
        self.builder.def_var(dst.0, wide);
    }

    /// `*(u8*)addr = low_byte(src)`.
    pub(crate) fn store_byte(&mut self, addr: Reg, src: Reg) {
        let value = self.builder.use_var(src.0);
        let byte = self.builder.ins().ireduce(types::I8, value);
        let addr = self.builder.use_var(addr.0);
        self.builder.ins().store(MemFlags::trusted(), byte, addr, 0);
    }

    /// `dst = src + imm`.
    pub(crate) fn add_imm(&mut self, dst: Reg, src: Reg, imm: i64) {
        let value = self.builder.use_var(src.0);
        let sum = self.builder.ins().iadd_imm(value, imm);
        self.builder.def_var(dst.0, sum);
    }

    /// `dst = src - imm`.
    pub(crate) fn sub_imm(&mut self, dst: Reg, src: Reg, imm: i64) {
        let value = self.builder.use_var(src.0);
        let rhs = self.builder.ins().iconst(types::I64, imm);
        let difference = self.builder.ins().isub(value, rhs);
        self.builder.def_var(dst.0, difference);
    }

    /// Branches to `target` if `a == b`; otherwise falls through.
    pub(crate) fn branch_if_equal(&mut self, a: Reg, b: Reg, target: Label) {
        let a = self.builder.use_var(a.0);
        let b = self.builder.use_var(b.0);
        let condition = self.builder.ins().icmp(IntCC::Equal, a, b);
        self.branch_if(condition, target);
    }

    /// Branches to `target` if `a == imm`; otherwise falls through.
    pub(crate) fn branch_if_equal_imm(&mut self, a: Reg, imm: i64, target: Label) {
        let a = self.builder.use_var(a.0);
        let condition = self.builder.ins().icmp_imm(IntCC::Equal, a, imm);
        self.branch_if(condition, target);
    }

    /// Branches to `target` if `a != imm`; otherwise falls through.
    pub(crate) fn branch_if_not_equal_imm(&mut self, a: Reg, imm: i64, target: Label) {
        let a = self.builder.use_var(a.0);
        let condition = self.builder.ins().icmp_imm(IntCC::NotEqual, a, imm);
        self.branch_if(condition, target);
    }

    fn branch_if(&mut self, condition: Value, target: Label) {
        let fallthrough = self.builder.create_block();
        self.builder
            .ins()
            .brif(condition, target.0, &[], fallthrough, &[]);
        self.builder.switch_to_block(fallthrough);
    }

    /// `return imm`.
    pub(crate) fn ret_imm(&mut self, code: i64) {
        let value = self.builder.ins().iconst(types::I64, code);
        self.builder.ins().return_(&[value]);
        self.terminated = true;
    }

    /// `return src`.
    pub(crate) fn ret_reg(&mut self, src: Reg) {
        let value = self.builder.use_var(src.0);
        self.builder.ins().return_(&[value]);
        self.terminated = true;
    }

    /// `dst = (*callee_addr)(args…)` through the declared prototype. The
    /// callee address is embedded as an integer immediate.
    pub(crate) fn call(&mut self, proto: Proto, callee_addr: usize, dst: Reg, args: &[Reg]) {
        let callee = self
            .builder
            .ins()
            .iconst(self.ptr_type, callee_addr as i64);
        let args: Vec<_> = args.iter().map(|arg| self.builder.use_var(arg.0)).collect();
        let call = self.builder.ins().call_indirect(proto.0, callee, &args);
        let result = self.builder.inst_results(call)[0];
        self.builder.def_var(dst.0, result);
    }

    /// Closes the function. Every label must have been placed and control
    /// must not be able to fall off the end.
    pub(crate) fn finish(mut self) {
        assert!(self.terminated, "function body must end in a return");
        assert_eq!(
            self.labels_created,
            self.labels_placed.len(),
            "every created label must be placed"
        );

        self.builder.seal_all_blocks();
        self.builder.finalize();
    }
}
