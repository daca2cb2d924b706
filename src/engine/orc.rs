// This module drives the ORC LLJIT generation of the LLVM toolchain through the
// llvm-sys C API. One LLJIT session owns a single library of definitions; symbol
// resolution inside it consults the library's own (module-defined) symbols first,
// then two definition generators installed at construction: a custom generator
// serving the engine's intrinsic table by absolute address, then LLVM's
// dynamic-library search generator over the running process image. Because the
// generators only run for names the library does not define, module definitions
// always shadow intrinsics of the same name. Modules arrive as inkwell modules
// owned by the caller's context and are moved into the session through a bitcode
// round-trip into a session-owned thread-safe context, which is how the C API
// transfers a module across context boundaries. The session supports no
// unlinking; compiled code lives until the engine is dropped.

//! ORC LLJIT execution engine.

use std::ffi::{c_char, c_void, CStr, CString};
use std::marker::PhantomData;
use std::ptr;

use hashbrown::HashSet;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::TargetMachine;
use llvm_sys::bit_reader::LLVMParseBitcodeInContext2;
use llvm_sys::core::LLVMCreateMemoryBufferWithMemoryRangeCopy;
use llvm_sys::error::{LLVMDisposeErrorMessage, LLVMErrorRef, LLVMGetErrorMessage};
use llvm_sys::orc2::lljit::{
    LLVMOrcCreateLLJIT, LLVMOrcCreateLLJITBuilder, LLVMOrcDisposeLLJIT,
    LLVMOrcLLJITAddLLVMIRModule, LLVMOrcLLJITBuilderSetJITTargetMachineBuilder,
    LLVMOrcLLJITGetDataLayoutStr, LLVMOrcLLJITGetGlobalPrefix, LLVMOrcLLJITGetMainJITDylib,
    LLVMOrcLLJITLookup, LLVMOrcLLJITRef,
};
use llvm_sys::orc2::{
    LLVMJITEvaluatedSymbol, LLVMJITSymbolFlags, LLVMJITSymbolGenericFlags,
    LLVMOrcAbsoluteSymbols, LLVMOrcCLookupSet, LLVMOrcCSymbolMapPair,
    LLVMOrcCreateCustomCAPIDefinitionGenerator,
    LLVMOrcCreateDynamicLibrarySearchGeneratorForProcess, LLVMOrcCreateNewThreadSafeContext,
    LLVMOrcCreateNewThreadSafeModule, LLVMOrcDefinitionGeneratorRef,
    LLVMOrcDisposeThreadSafeContext, LLVMOrcExecutorAddress, LLVMOrcJITDylibAddGenerator,
    LLVMOrcJITDylibDefine, LLVMOrcJITDylibLookupFlags, LLVMOrcJITDylibRef,
    LLVMOrcJITTargetMachineBuilderDetectHost, LLVMOrcJITTargetMachineBuilderRef,
    LLVMOrcLookupKind, LLVMOrcLookupStateRef, LLVMOrcRetainSymbolStringPoolEntry,
    LLVMOrcSymbolStringPoolEntryStr, LLVMOrcThreadSafeContextGetContext,
};
use llvm_sys::prelude::LLVMModuleRef;

use crate::engine::{module_name, verify_module, ModuleHandle};
use crate::error::{JitError, JitResult};
use crate::intrinsics;
use crate::target::TargetSpec;
use crate::JitTargetAddress;

/// Consume an LLVM error, surfacing its message. `None` means success.
fn consume_error(err: LLVMErrorRef) -> Option<String> {
    if err.is_null() {
        return None;
    }
    unsafe {
        let raw = LLVMGetErrorMessage(err);
        let message = CStr::from_ptr(raw).to_string_lossy().into_owned();
        LLVMDisposeErrorMessage(raw);
        Some(message)
    }
}

/// Wrap a toolchain error with the context it occurred in.
fn check(err: LLVMErrorRef, context: &'static str) -> JitResult<()> {
    match consume_error(err) {
        None => Ok(()),
        Some(message) => Err(JitError::Toolchain { context, message }),
    }
}

/// Intrinsic table served by the custom definition generator.
///
/// Owned by the generator itself: the boxed table travels as the generator
/// context and is reclaimed by the dispose callback when the session tears
/// the generator down.
struct GeneratorTable {
    /// Linker global prefix of the target (`_` on Mach-O, empty elsewhere).
    prefix: u8,
    entries: Vec<(CString, JitTargetAddress)>,
}

impl GeneratorTable {
    fn new(prefix: u8, entries: &[intrinsics::IntrinsicEntry]) -> Self {
        let entries = entries
            .iter()
            .filter_map(|entry| CString::new(entry.name).ok().map(|name| (name, entry.address)))
            .collect();
        Self { prefix, entries }
    }

    fn lookup(&self, mangled: &[u8]) -> Option<JitTargetAddress> {
        let name = match self.prefix {
            0 => mangled,
            prefix => mangled.strip_prefix(&[prefix]).unwrap_or(mangled),
        };
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.as_bytes() == name)
            .map(|(_, address)| *address)
    }
}

/// Definition generator callback serving intrinsics by absolute address.
///
/// Runs only for names the library does not already define, which is what
/// gives compiled modules priority over same-named intrinsics. Names we do
/// not recognize are left for the next generator in the chain.
extern "C" fn intrinsics_generator(
    _generator: LLVMOrcDefinitionGeneratorRef,
    ctx: *mut c_void,
    _lookup_state: *mut LLVMOrcLookupStateRef,
    _kind: LLVMOrcLookupKind,
    dylib: LLVMOrcJITDylibRef,
    _dylib_lookup_flags: LLVMOrcJITDylibLookupFlags,
    lookup_set: LLVMOrcCLookupSet,
    lookup_set_size: usize,
) -> LLVMErrorRef {
    let table = unsafe { &*(ctx as *const GeneratorTable) };
    let requests = if lookup_set_size == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(lookup_set, lookup_set_size) }
    };

    let mut definitions: Vec<LLVMOrcCSymbolMapPair> = Vec::new();
    for request in requests {
        let raw = unsafe { LLVMOrcSymbolStringPoolEntryStr(request.Name) };
        if raw.is_null() {
            continue;
        }
        let mangled = unsafe { CStr::from_ptr(raw) };
        let Some(address) = table.lookup(mangled.to_bytes()) else {
            continue;
        };

        // The symbol map takes ownership of each name ref; the lookup set
        // only lends them to us.
        unsafe { LLVMOrcRetainSymbolStringPoolEntry(request.Name) };
        definitions.push(LLVMOrcCSymbolMapPair {
            Name: request.Name,
            Sym: LLVMJITEvaluatedSymbol {
                Address: address,
                Flags: LLVMJITSymbolFlags {
                    GenericFlags: LLVMJITSymbolGenericFlags::LLVMJITSymbolGenericFlagsExported
                        as u8
                        | LLVMJITSymbolGenericFlags::LLVMJITSymbolGenericFlagsCallable as u8,
                    TargetFlags: 0,
                },
            },
        });
    }

    if definitions.is_empty() {
        return ptr::null_mut();
    }
    unsafe {
        let unit = LLVMOrcAbsoluteSymbols(definitions.as_mut_ptr(), definitions.len());
        LLVMOrcJITDylibDefine(dylib, unit)
    }
}

extern "C" fn dispose_generator_table(ctx: *mut c_void) {
    drop(unsafe { Box::from_raw(ctx as *mut GeneratorTable) });
}

/// Execution engine backed by one ORC LLJIT session.
pub(crate) struct JitEngine<'ctx> {
    spec: TargetSpec,
    machine: TargetMachine,
    jit: LLVMOrcLLJITRef,
    intrinsics: HashSet<String>,
    submissions: u64,
    _context: PhantomData<&'ctx Context>,
}

impl<'ctx> JitEngine<'ctx> {
    pub(crate) fn new(_context: &'ctx Context) -> JitResult<Self> {
        let spec = TargetSpec::detect_host()?;
        let machine = spec.create_target_machine()?;

        let mut jtmb: LLVMOrcJITTargetMachineBuilderRef = ptr::null_mut();
        check(
            unsafe { LLVMOrcJITTargetMachineBuilderDetectHost(&mut jtmb) },
            "failed to detect the host machine for the JIT session",
        )?;

        let mut jit: LLVMOrcLLJITRef = ptr::null_mut();
        let err = unsafe {
            let builder = LLVMOrcCreateLLJITBuilder();
            LLVMOrcLLJITBuilderSetJITTargetMachineBuilder(builder, jtmb);
            LLVMOrcCreateLLJIT(&mut jit, builder)
        };
        check(err, "failed to create the JIT session")?;

        let entries = intrinsics::linkable_entries();
        let mut names = HashSet::with_capacity(entries.len());
        for entry in &entries {
            names.insert(entry.name.to_string());
        }

        unsafe {
            let dylib = LLVMOrcLLJITGetMainJITDylib(jit);
            let prefix = LLVMOrcLLJITGetGlobalPrefix(jit) as u8;

            let table = Box::new(GeneratorTable::new(prefix, &entries));
            let generator = LLVMOrcCreateCustomCAPIDefinitionGenerator(
                intrinsics_generator,
                Box::into_raw(table) as *mut c_void,
                dispose_generator_table,
            );
            LLVMOrcJITDylibAddGenerator(dylib, generator);

            let mut process: LLVMOrcDefinitionGeneratorRef = ptr::null_mut();
            let err = LLVMOrcCreateDynamicLibrarySearchGeneratorForProcess(
                &mut process,
                prefix as c_char,
                None,
                ptr::null_mut(),
            );
            if let Some(message) = consume_error(err) {
                let _ = consume_error(LLVMOrcDisposeLLJIT(jit));
                return Err(JitError::Toolchain {
                    context: "failed to attach the process symbol generator",
                    message,
                });
            }
            LLVMOrcJITDylibAddGenerator(dylib, process);
        }

        log::info!(
            "JIT session ready for {} ({} intrinsics linked)",
            spec.triple,
            names.len()
        );

        Ok(Self {
            spec,
            machine,
            jit,
            intrinsics: names,
            submissions: 0,
            _context: PhantomData,
        })
    }

    pub(crate) fn add_module(&mut self, module: Module<'ctx>) -> JitResult<ModuleHandle> {
        verify_module(&module)?;
        let name = module_name(&module);

        // The C API cannot wrap a foreign context into a thread-safe one, so
        // the module crosses into the session via its bitcode.
        let bitcode = module.write_bitcode_to_memory();
        let bytes = bitcode.as_slice();
        let label = CString::new(name.clone()).unwrap_or_default();

        unsafe {
            let buffer = LLVMCreateMemoryBufferWithMemoryRangeCopy(
                bytes.as_ptr() as *const c_char,
                bytes.len(),
                label.as_ptr(),
            );

            let tsctx = LLVMOrcCreateNewThreadSafeContext();
            let session_context = LLVMOrcThreadSafeContextGetContext(tsctx);
            let mut rehydrated: LLVMModuleRef = ptr::null_mut();
            if LLVMParseBitcodeInContext2(session_context, buffer, &mut rehydrated) != 0 {
                LLVMOrcDisposeThreadSafeContext(tsctx);
                return Err(JitError::Toolchain {
                    context: "failed to move module into the JIT session",
                    message: format!("bitcode for module `{name}` did not parse"),
                });
            }

            let tsm = LLVMOrcCreateNewThreadSafeModule(rehydrated, tsctx);
            LLVMOrcDisposeThreadSafeContext(tsctx);
            check(
                LLVMOrcLLJITAddLLVMIRModule(self.jit, LLVMOrcLLJITGetMainJITDylib(self.jit), tsm),
                "failed to add module to the JIT session",
            )?;
        }

        self.submissions += 1;
        log::debug!("added module `{}` to the JIT session", name);
        Ok(ModuleHandle(self.submissions))
    }

    pub(crate) fn find_symbol(&self, name: &str) -> JitResult<JitTargetAddress> {
        let symbol = CString::new(name).map_err(|_| JitError::UnresolvedSymbol {
            name: name.to_string(),
            message: "symbol name contains an interior NUL byte".to_string(),
        })?;

        let mut address: LLVMOrcExecutorAddress = 0;
        let err = unsafe { LLVMOrcLLJITLookup(self.jit, &mut address, symbol.as_ptr()) };
        if let Some(message) = consume_error(err) {
            log::error!("symbol `{name}` did not resolve: {message}");
            return Err(JitError::UnresolvedSymbol {
                name: name.to_string(),
                message,
            });
        }
        Ok(address)
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
        unsafe { CStr::from_ptr(LLVMOrcLLJITGetDataLayoutStr(self.jit)) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for JitEngine<'_> {
    fn drop(&mut self) {
        if let Some(message) = consume_error(unsafe { LLVMOrcDisposeLLJIT(self.jit) }) {
            log::error!("failed to tear down the JIT session cleanly: {message}");
        }
    }
}
