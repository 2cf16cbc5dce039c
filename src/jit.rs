//! The compiler driver: owns the Cranelift JIT state and turns finished IR
//! into a callable native entry point.

use std::mem;

use cranelift_codegen::ir::{types, AbiParam, UserFuncName};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::Module;

use crate::codegen::CompilationUnit;
use crate::errors::CompileError;
use crate::ir::IrBuilder;
use crate::parsing::OpcodeSource;
use crate::program::{CompiledProgram, MainFn, ReadChar, WriteChar};

/// Everything one compilation needs from the outside world: the two host
/// callbacks whose addresses get baked into the generated code, and the
/// opcode stream to compile.
pub struct CompileContext<'a> {
    pub write_char: WriteChar,
    pub read_char: ReadChar,
    pub reader: &'a mut dyn OpcodeSource,
}

/// The long-lived compiler. One driver owns one Cranelift JIT module; many
/// programs can be compiled into it over its lifetime, one at a time.
/// Dropping the driver unmaps every program it produced.
pub struct JitCompiler {
    module: Option<JITModule>,
    ctx: Context,
}

impl JitCompiler {
    /// Configures Cranelift for the host machine. Failure here is fatal for
    /// the driver; no IR can be built without a code generator.
    pub fn new() -> Result<Self, CompileError> {
        let mut flags = settings::builder();
        flags
            .set("opt_level", "speed")
            .map_err(|error| CompileError::Init(error.to_string()))?;
        flags
            .set("is_pic", "false")
            .map_err(|error| CompileError::Init(error.to_string()))?;

        let isa = cranelift_native::builder()
            .map_err(|message| CompileError::Init(message.to_string()))?
            .finish(settings::Flags::new(flags))
            .map_err(|error| CompileError::Init(error.to_string()))?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

        Ok(JitCompiler {
            module: Some(JITModule::new(builder)),
            ctx: Context::new(),
        })
    }

    /// Compiles one program to native code and hands back its entry point.
    ///
    /// On any error the half-built function is discarded; no partial
    /// artifact is ever returned or left linked into the module.
    pub fn compile<'jit>(
        &'jit mut self,
        context: CompileContext<'_>,
    ) -> Result<CompiledProgram<'jit>, CompileError> {
        let module = self.module.as_mut().expect("module lives until drop");
        module.clear_context(&mut self.ctx);

        let ptr_type = module.target_config().pointer_type();
        let mut signature = module.make_signature();
        signature.params.push(AbiParam::new(types::I64));
        signature.params.push(AbiParam::new(types::I64));
        signature.returns.push(AbiParam::new(types::I64));

        let func_id = module
            .declare_anonymous_function(&signature)
            .map_err(|error| CompileError::Codegen(error.to_string()))?;

        self.ctx.func.signature = signature;
        self.ctx.func.name = UserFuncName::user(0, func_id.as_u32());

        let mut builder_ctx = FunctionBuilderContext::new();
        let built = {
            let builder = FunctionBuilder::new(&mut self.ctx.func, &mut builder_ctx);
            let ir = IrBuilder::new(builder, ptr_type);
            CompilationUnit::new(ir, context.reader, context.write_char, context.read_char)
                .translate()
        };
        if let Err(error) = built {
            module.clear_context(&mut self.ctx);
            return Err(error);
        }

        module
            .define_function(func_id, &mut self.ctx)
            .map_err(|error| CompileError::Codegen(error.to_string()))?;
        module.clear_context(&mut self.ctx);
        module
            .finalize_definitions()
            .map_err(|error| CompileError::Codegen(error.to_string()))?;

        let entry = module.get_finalized_function(func_id);
        // SAFETY: the function was declared with exactly the MainFn signature.
        let entry = unsafe { mem::transmute::<*const u8, MainFn>(entry) };
        Ok(CompiledProgram::new(entry))
    }
}

impl Drop for JitCompiler {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: every CompiledProgram borrows this driver, so no entry
            // point can outlive the mapping freed here.
            unsafe { module.free_memory() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::SourceReader;
    use crate::program::RunResult;

    extern "C" fn write_discard(_value: i64) -> i64 {
        RunResult::Success as i64
    }

    extern "C" fn read_zero(target: *mut u8) -> i64 {
        unsafe { *target = 0 };
        RunResult::Success as i64
    }

    fn context<'a>(reader: &'a mut SourceReader<&'static [u8]>) -> CompileContext<'a> {
        CompileContext {
            write_char: write_discard,
            read_char: read_zero,
            reader,
        }
    }

    #[test]
    fn compiles_the_empty_program() {
        let mut compiler = JitCompiler::new().unwrap();
        let mut reader = SourceReader::new(&b""[..]);
        let program = compiler.compile(context(&mut reader)).unwrap();

        let mut tape = [0u8; 1];
        assert_eq!(program.run(&mut tape), RunResult::Success);
    }

    #[test]
    fn one_driver_compiles_many_programs() {
        let mut compiler = JitCompiler::new().unwrap();

        {
            let mut reader = SourceReader::new(&b"+++"[..]);
            let program = compiler.compile(context(&mut reader)).unwrap();
            let mut tape = [0u8; 1];
            assert_eq!(program.run(&mut tape), RunResult::Success);
            assert_eq!(tape[0], 3);
        }

        {
            let mut reader = SourceReader::new(&b"--"[..]);
            let program = compiler.compile(context(&mut reader)).unwrap();
            let mut tape = [0u8; 1];
            assert_eq!(program.run(&mut tape), RunResult::Success);
            assert_eq!(tape[0], 254);
        }
    }

    #[test]
    fn a_failed_compile_does_not_poison_the_driver() {
        let mut compiler = JitCompiler::new().unwrap();

        {
            let mut reader = SourceReader::new(&b"[+"[..]);
            let error = compiler.compile(context(&mut reader)).unwrap_err();
            assert!(matches!(error, CompileError::UnbalancedOpen));
        }

        let mut reader = SourceReader::new(&b"+"[..]);
        let program = compiler.compile(context(&mut reader)).unwrap();
        let mut tape = [0u8; 1];
        assert_eq!(program.run(&mut tape), RunResult::Success);
        assert_eq!(tape[0], 1);
    }
}
