//! Execution engine facade.
//!
//! Two structurally different engine implementations exist, one per
//! generation of the LLVM JIT toolchain:
//! - [`orc`] drives a single ORC LLJIT session (current toolchains),
//! - [`mcjit`] drives an MCJIT execution engine (older toolchains).
//!
//! The choice is a build-time configuration decision made through the `orc`
//! and `mcjit` cargo features; call sites depend only on [`TensorExprJit`],
//! which owns exactly one implementation and forwards every operation
//! unchanged, so no behavioral difference is observable through it.
//!
//! Both implementations resolve names through the same fixed search order,
//! established at construction and never changed afterwards: symbols defined
//! by compiled modules first, then the intrinsic table (including the
//! mandatory parallel-dispatch entry), then symbols already present in the
//! running process. Module addition and removal mutate shared internal
//! tables and therefore take `&mut self`; lookups are read-only.

#[cfg(all(feature = "orc", feature = "mcjit"))]
compile_error!(
    "the `orc` and `mcjit` JIT backends are mutually exclusive; enable exactly one of them"
);

#[cfg(not(any(feature = "orc", feature = "mcjit")))]
compile_error!(
    "no JIT backend selected; enable the `orc` feature (current LLVM toolchains) or `mcjit` (legacy toolchains)"
);

#[cfg(feature = "mcjit")]
mod mcjit;
#[cfg(feature = "orc")]
mod orc;

#[cfg(all(feature = "mcjit", not(feature = "orc")))]
use mcjit::JitEngine;
#[cfg(all(feature = "orc", not(feature = "mcjit")))]
use orc::JitEngine;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::TargetMachine;

use crate::error::{JitError, JitResult};
use crate::target::TargetSpec;
use crate::JitTargetAddress;

/// Opaque identifier for a module submitted to the engine.
///
/// The MCJIT backend accepts handles back through
/// [`TensorExprJit::remove_module`]; the ORC backend compiles into a single
/// session-owned library and never unlinks, so there handles only identify
/// submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub(crate) u64);

/// The execution engine behind a version-stable interface.
///
/// Owns the compiled-module store, the symbol-resolution search order and
/// the target machine. Compiled code lives exactly as long as the facade;
/// dropping it releases everything.
///
/// Every fallible operation returns a [`JitResult`], and every error it can
/// produce is unrecoverable by contract: a malformed module or unresolved
/// symbol indicates a frontend bug, not a runtime condition to retry.
pub struct TensorExprJit<'ctx> {
    engine: JitEngine<'ctx>,
}

impl<'ctx> TensorExprJit<'ctx> {
    /// Construct an engine for the host machine.
    ///
    /// Builds the target description, the target machine and the symbol
    /// search order, and links the intrinsic table plus the mandatory
    /// parallel-dispatch entry. The caller keeps ownership of `context` and
    /// must outlive the engine; modules submitted later must come from the
    /// same context.
    pub fn new(context: &'ctx Context) -> JitResult<Self> {
        Ok(Self {
            engine: JitEngine::new(context)?,
        })
    }

    /// Compile `module` and add its code and defined symbols to the store.
    ///
    /// Ownership of the module transfers to the engine. A module that fails
    /// verification or compilation is rejected with the surfaced toolchain
    /// message; treat that as fatal.
    pub fn add_module(&mut self, module: Module<'ctx>) -> JitResult<ModuleHandle> {
        self.engine.add_module(module)
    }

    /// Resolve `name` to a callable address using the fixed search order.
    ///
    /// Repeated lookups on unchanged engine state return the identical
    /// address.
    pub fn find_symbol(&self, name: &str) -> JitResult<JitTargetAddress> {
        self.engine.find_symbol(name)
    }

    /// Whether `name` is a known runtime intrinsic.
    ///
    /// Consults the intrinsic-name set only, never compiled modules or the
    /// process symbol table.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.engine.has_symbol(name)
    }

    /// The target description the engine generates code for.
    pub fn target_spec(&self) -> &TargetSpec {
        self.engine.target_spec()
    }

    /// The engine-owned target machine.
    pub fn target_machine(&self) -> &TargetMachine {
        self.engine.target_machine()
    }

    /// The data layout string IR generation must honor.
    pub fn data_layout(&self) -> String {
        self.engine.data_layout()
    }

    /// Unlink a previously added module's code and symbols.
    ///
    /// Only the MCJIT backend tracks modules for removal; the ORC backend
    /// deliberately omits this operation.
    #[cfg(feature = "mcjit")]
    pub fn remove_module(&mut self, handle: ModuleHandle) -> JitResult<()> {
        self.engine.remove_module(handle)
    }
}

/// Reject modules that fail IR verification before they reach the toolchain.
pub(crate) fn verify_module(module: &Module) -> JitResult<()> {
    module.verify().map_err(|err| JitError::InvalidModule {
        module: module_name(module),
        reason: err.to_string(),
    })
}

pub(crate) fn module_name(module: &Module) -> String {
    module.get_name().to_string_lossy().into_owned()
}
