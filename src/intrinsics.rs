// This module defines the runtime support functions generated kernels may call by
// name. The table enumerates C-ABI math wrappers (exp/log/erf/sigmoid and friends
// over f32 plus a core f64 subset) backed by std float methods and the libm crate.
// Entries are plain (name, absolute address) pairs collected into an owned Vec that
// the engine consumes exactly once at construction; every name in it is also copied
// into the engine's intrinsic query set. Independent of the table, the engine always
// links tejit_dispatch_parallel, the parallel-dispatch entry point that fans a kernel
// body out over an index range on the rayon worker pool with a caller-owned packed
// argument buffer.

//! Runtime intrinsics linked into every engine instance.
//!
//! Generated code refers to these by symbol name; the engine resolves them to
//! the absolute addresses recorded here.

use rayon::prelude::*;

use crate::JitTargetAddress;

/// Symbol name of the parallel-dispatch entry point.
///
/// This entry is linked into every engine regardless of what the table
/// enumerates; kernels may always assume it resolves.
pub const DISPATCH_PARALLEL: &str = "tejit_dispatch_parallel";

/// A runtime function made linkable for generated code.
#[derive(Debug, Clone, Copy)]
pub struct IntrinsicEntry {
    /// Symbol name the kernel calls.
    pub name: &'static str,

    /// Absolute address of the implementation in this process.
    pub address: JitTargetAddress,
}

type UnaryF32 = extern "C" fn(f32) -> f32;
type BinaryF32 = extern "C" fn(f32, f32) -> f32;
type UnaryF64 = extern "C" fn(f64) -> f64;
type BinaryF64 = extern "C" fn(f64, f64) -> f64;

fn unary_f32(name: &'static str, f: UnaryF32) -> IntrinsicEntry {
    IntrinsicEntry {
        name,
        address: f as usize as JitTargetAddress,
    }
}

fn binary_f32(name: &'static str, f: BinaryF32) -> IntrinsicEntry {
    IntrinsicEntry {
        name,
        address: f as usize as JitTargetAddress,
    }
}

fn unary_f64(name: &'static str, f: UnaryF64) -> IntrinsicEntry {
    IntrinsicEntry {
        name,
        address: f as usize as JitTargetAddress,
    }
}

fn binary_f64(name: &'static str, f: BinaryF64) -> IntrinsicEntry {
    IntrinsicEntry {
        name,
        address: f as usize as JitTargetAddress,
    }
}

/// The intrinsic symbol table, enumerated once per engine construction.
pub fn table() -> Vec<IntrinsicEntry> {
    vec![
        unary_f32("tejit_expf", tejit_expf),
        unary_f32("tejit_logf", tejit_logf),
        unary_f32("tejit_log2f", tejit_log2f),
        unary_f32("tejit_log10f", tejit_log10f),
        unary_f32("tejit_sqrtf", tejit_sqrtf),
        unary_f32("tejit_sinf", tejit_sinf),
        unary_f32("tejit_cosf", tejit_cosf),
        unary_f32("tejit_tanf", tejit_tanf),
        unary_f32("tejit_tanhf", tejit_tanhf),
        unary_f32("tejit_sigmoidf", tejit_sigmoidf),
        unary_f32("tejit_erff", tejit_erff),
        unary_f32("tejit_lgammaf", tejit_lgammaf),
        binary_f32("tejit_powf", tejit_powf),
        binary_f32("tejit_fmodf", tejit_fmodf),
        binary_f32("tejit_atan2f", tejit_atan2f),
        unary_f64("tejit_exp", tejit_exp),
        unary_f64("tejit_log", tejit_log),
        unary_f64("tejit_sqrt", tejit_sqrt),
        unary_f64("tejit_tanh", tejit_tanh),
        unary_f64("tejit_sigmoid", tejit_sigmoid),
        unary_f64("tejit_erf", tejit_erf),
        binary_f64("tejit_pow", tejit_pow),
    ]
}

/// The full set of entries an engine links: the table plus the mandatory
/// parallel-dispatch entry point.
pub(crate) fn linkable_entries() -> Vec<IntrinsicEntry> {
    let mut entries = table();
    let dispatch: extern "C" fn(KernelFn, i64, i64, *mut u8) = tejit_dispatch_parallel;
    entries.push(IntrinsicEntry {
        name: DISPATCH_PARALLEL,
        address: dispatch as usize as JitTargetAddress,
    });
    entries
}

/// Kernel body signature expected by [`tejit_dispatch_parallel`].
pub type KernelFn = extern "C" fn(index: i64, packed: *mut u8);

// Per-index invocations are independent by the kernel contract: each index
// touches a disjoint region of the packed buffer.
#[derive(Clone, Copy)]
struct DispatchCall {
    kernel: KernelFn,
    packed: *mut u8,
}

unsafe impl Send for DispatchCall {}
unsafe impl Sync for DispatchCall {}

/// Run `kernel(index, packed)` for every index in `[start, stop)`, with
/// iterations distributed over the rayon worker pool.
pub extern "C" fn tejit_dispatch_parallel(kernel: KernelFn, start: i64, stop: i64, packed: *mut u8) {
    if stop <= start {
        return;
    }
    if stop - start == 1 {
        kernel(start, packed);
        return;
    }

    let call = DispatchCall { kernel, packed };
    (start..stop)
        .into_par_iter()
        .for_each(move |index| (call.kernel)(index, call.packed));
}

pub extern "C" fn tejit_expf(x: f32) -> f32 {
    x.exp()
}

pub extern "C" fn tejit_logf(x: f32) -> f32 {
    x.ln()
}

pub extern "C" fn tejit_log2f(x: f32) -> f32 {
    x.log2()
}

pub extern "C" fn tejit_log10f(x: f32) -> f32 {
    x.log10()
}

pub extern "C" fn tejit_sqrtf(x: f32) -> f32 {
    x.sqrt()
}

pub extern "C" fn tejit_sinf(x: f32) -> f32 {
    x.sin()
}

pub extern "C" fn tejit_cosf(x: f32) -> f32 {
    x.cos()
}

pub extern "C" fn tejit_tanf(x: f32) -> f32 {
    x.tan()
}

pub extern "C" fn tejit_tanhf(x: f32) -> f32 {
    x.tanh()
}

pub extern "C" fn tejit_sigmoidf(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub extern "C" fn tejit_erff(x: f32) -> f32 {
    libm::erff(x)
}

pub extern "C" fn tejit_lgammaf(x: f32) -> f32 {
    libm::lgammaf(x)
}

pub extern "C" fn tejit_powf(x: f32, y: f32) -> f32 {
    x.powf(y)
}

pub extern "C" fn tejit_fmodf(x: f32, y: f32) -> f32 {
    x % y
}

pub extern "C" fn tejit_atan2f(y: f32, x: f32) -> f32 {
    y.atan2(x)
}

pub extern "C" fn tejit_exp(x: f64) -> f64 {
    x.exp()
}

pub extern "C" fn tejit_log(x: f64) -> f64 {
    x.ln()
}

pub extern "C" fn tejit_sqrt(x: f64) -> f64 {
    x.sqrt()
}

pub extern "C" fn tejit_tanh(x: f64) -> f64 {
    x.tanh()
}

pub extern "C" fn tejit_sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub extern "C" fn tejit_erf(x: f64) -> f64 {
    libm::erf(x)
}

pub extern "C" fn tejit_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}
