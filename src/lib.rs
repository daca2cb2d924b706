//! tejit - Runtime native code generation for tensor-expression kernels.
//!
//! tejit accepts LLVM IR modules built by an upstream tensor-expression
//! frontend and turns them into directly callable native machine code,
//! resolving at link time both a fixed table of runtime intrinsics and
//! symbols already present in the running process.
//!
//! # Primary Usage
//!
//! ```ignore
//! use inkwell::context::Context;
//! use tejit::TensorExprJit;
//!
//! let context = Context::create();
//! let mut jit = TensorExprJit::new(&context)?;
//!
//! // Lower a frontend-built module and call into it.
//! jit.add_module(module)?;
//! let address = jit.find_symbol("kernel_main")?;
//! ```
//!
//! # Architecture
//!
//! - [`engine`] - The execution engine and its version-stable facade
//! - [`target`] - Host target introspection and the target descriptor
//! - [`intrinsics`] - Runtime support functions generated code may call
//! - [`error`] - Error types; every failure here is fatal by contract

pub mod engine;
pub mod error;
pub mod intrinsics;
pub mod target;

// Re-export the caller-facing surface.
pub use engine::{ModuleHandle, TensorExprJit};
pub use error::{JitError, JitResult};
pub use intrinsics::{IntrinsicEntry, KernelFn, DISPATCH_PARALLEL};
pub use target::{FpFusion, TargetSpec};

/// An address in the running process, as produced by symbol resolution.
pub type JitTargetAddress = u64;
