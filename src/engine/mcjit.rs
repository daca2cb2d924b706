// This module drives the MCJIT generation of the LLVM toolchain through inkwell's
// safe ExecutionEngine wrapper. Where the ORC backend hands resolution to a chain
// of definition generators, MCJIT expresses the same search order sequentially in
// find_symbol: compiled modules first, then the engine-local intrinsic address map,
// then the running process image. Intrinsics are additionally published through
// LLVMAddSymbol so RuntimeDyld can link calls emitted by generated code, and the
// process image is opened with LLVMLoadLibraryPermanently at construction. Every
// submitted module is tracked under an allocated handle, which is what makes
// remove_module possible in this backend; compilation itself is the toolchain's
// one-shot MCJIT compiler rather than a multi-stage pipeline.

//! MCJIT execution engine.

use std::ffi::{c_void, CString};
use std::ptr;

use hashbrown::{HashMap, HashSet};
use inkwell::context::Context;
use inkwell::execution_engine::{ExecutionEngine, FunctionLookupError};
use inkwell::module::Module;
use inkwell::targets::TargetMachine;
use llvm_sys::support::{LLVMAddSymbol, LLVMLoadLibraryPermanently, LLVMSearchForAddressOfSymbol};

use crate::engine::{module_name, verify_module, ModuleHandle};
use crate::error::{JitError, JitResult};
use crate::intrinsics;
use crate::target::TargetSpec;
use crate::JitTargetAddress;

/// Execution engine backed by MCJIT.
pub(crate) struct JitEngine<'ctx> {
    spec: TargetSpec,
    machine: TargetMachine,
    engine: ExecutionEngine<'ctx>,
    /// Empty module the engine was created from; owns no symbols.
    _root: Module<'ctx>,
    intrinsics: HashSet<String>,
    addresses: HashMap<String, JitTargetAddress>,
    modules: HashMap<ModuleHandle, Module<'ctx>>,
    submissions: u64,
}

impl<'ctx> JitEngine<'ctx> {
    pub(crate) fn new(context: &'ctx Context) -> JitResult<Self> {
        let spec = TargetSpec::detect_host()?;
        let machine = spec.create_target_machine()?;

        let root = context.create_module("tejit.root");
        let engine = root
            .create_jit_execution_engine(spec.opt_level)
            .map_err(|err| JitError::EngineCreation {
                reason: err.to_string(),
            })?;

        // Open the process image so already-loaded runtime functions resolve
        // without being registered explicitly.
        unsafe { LLVMLoadLibraryPermanently(ptr::null()) };

        let entries = intrinsics::linkable_entries();
        let mut names = HashSet::with_capacity(entries.len());
        let mut addresses = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let Ok(symbol) = CString::new(entry.name) else {
                continue;
            };
            // RuntimeDyld consults the explicit symbol table when linking
            // calls out of generated code.
            unsafe { LLVMAddSymbol(symbol.as_ptr(), entry.address as *mut c_void) };
            names.insert(entry.name.to_string());
            addresses.insert(entry.name.to_string(), entry.address);
        }

        log::info!(
            "MCJIT engine ready for {} ({} intrinsics linked)",
            spec.triple,
            names.len()
        );

        Ok(Self {
            spec,
            machine,
            engine,
            _root: root,
            intrinsics: names,
            addresses,
            modules: HashMap::new(),
            submissions: 0,
        })
    }

    pub(crate) fn add_module(&mut self, module: Module<'ctx>) -> JitResult<ModuleHandle> {
        verify_module(&module)?;
        let name = module_name(&module);

        self.engine
            .add_module(&module)
            .map_err(|()| JitError::Toolchain {
                context: "failed to add module to the execution engine",
                message: format!("module `{name}` was rejected"),
            })?;

        self.submissions += 1;
        let handle = ModuleHandle(self.submissions);
        self.modules.insert(handle, module);
        log::debug!("added module `{}` as {:?}", name, handle);
        Ok(handle)
    }

    /// The resolution callback of this backend, expressed sequentially:
    /// compiled modules, then the intrinsic table, then the process image.
    pub(crate) fn find_symbol(&self, name: &str) -> JitResult<JitTargetAddress> {
        match self.engine.get_function_address(name) {
            Ok(address) => return Ok(address as JitTargetAddress),
            Err(FunctionLookupError::FunctionNotFound) => {}
            Err(err) => {
                return Err(JitError::UnresolvedSymbol {
                    name: name.to_string(),
                    message: format!("{err:?}"),
                });
            }
        }

        if let Some(address) = self.addresses.get(name) {
            return Ok(*address);
        }

        let symbol = CString::new(name).map_err(|_| JitError::UnresolvedSymbol {
            name: name.to_string(),
            message: "symbol name contains an interior NUL byte".to_string(),
        })?;
        let address = unsafe { LLVMSearchForAddressOfSymbol(symbol.as_ptr()) };
        if !address.is_null() {
            return Ok(address as usize as JitTargetAddress);
        }

        log::error!("symbol `{name}` did not resolve");
        Err(JitError::UnresolvedSymbol {
            name: name.to_string(),
            message: "no definition in any compiled module, the intrinsic table or the running process"
                .to_string(),
        })
    }

    pub(crate) fn has_symbol(&self, name: &str) -> bool {
        self.intrinsics.contains(name)
    }

    pub(crate) fn target_spec(&self) -> &TargetSpec {
        &self.spec
    }

    pub(crate) fn target_machine(&self) -> &TargetMachine {
        &self.machine
    }

    pub(crate) fn data_layout(&self) -> String {
        self.machine
            .get_target_data()
            .get_data_layout()
            .as_str()
            .to_string_lossy()
            .into_owned()
    }

    pub(crate) fn remove_module(&mut self, handle: ModuleHandle) -> JitResult<()> {
        let Some(module) = self.modules.remove(&handle) else {
            return Err(JitError::InvalidHandle { handle });
        };
        let name = module_name(&module);

        self.engine
            .remove_module(&module)
            .map_err(|err| JitError::Toolchain {
                context: "failed to unlink module from the execution engine",
                message: format!("{err:?}"),
            })?;

        log::debug!("removed module `{}` ({:?})", name, handle);
        Ok(())
    }
}
