//! End-to-end tests for the JIT execution engine.
//!
//! Each test builds a small IR module with inkwell, submits it to the
//! engine and exercises the resolved native code directly.

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::TargetMachine;
use inkwell::AddressSpace;
use tejit::{intrinsics, FpFusion, JitError, TensorExprJit, DISPATCH_PARALLEL};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a module with a trivial constant function.
fn create_answer_module(context: &Context) -> Module<'_> {
    // i64 the_answer() { return 42; }
    let module = context.create_module("answer");
    let i64_type = context.i64_type();
    let fn_type = i64_type.fn_type(&[], false);
    let function = module.add_function("the_answer", fn_type, None);

    let entry = context.append_basic_block(function, "entry");
    let builder = context.create_builder();
    builder.position_at_end(entry);
    builder
        .build_return(Some(&i64_type.const_int(42, false)))
        .unwrap();

    module
}

/// Create a module whose kernel calls the exp intrinsic by name.
fn create_exp_kernel_module(context: &Context) -> Module<'_> {
    // float call_exp(float x) { return tejit_expf(x); }
    let module = context.create_module("exp_kernel");
    let f32_type = context.f32_type();
    let unary = f32_type.fn_type(&[f32_type.into()], false);
    let intrinsic = module.add_function("tejit_expf", unary, None);
    let function = module.add_function("call_exp", unary, None);

    let entry = context.append_basic_block(function, "entry");
    let builder = context.create_builder();
    builder.position_at_end(entry);
    let x = function.get_nth_param(0).unwrap().into_float_value();
    let result = builder
        .build_call(intrinsic, &[x.into()], "exp")
        .unwrap()
        .try_as_basic_value()
        .left()
        .unwrap();
    builder.build_return(Some(&result)).unwrap();

    module
}

/// Create a module that defines a function with an intrinsic's name.
fn create_shadowing_module(context: &Context) -> Module<'_> {
    // float tejit_expf(float x) { return x + 1.0f; }  // deliberately not exp
    let module = context.create_module("shadow");
    let f32_type = context.f32_type();
    let unary = f32_type.fn_type(&[f32_type.into()], false);
    let function = module.add_function("tejit_expf", unary, None);

    let entry = context.append_basic_block(function, "entry");
    let builder = context.create_builder();
    builder.position_at_end(entry);
    let x = function.get_nth_param(0).unwrap().into_float_value();
    let shifted = builder
        .build_float_add(x, f32_type.const_float(1.0), "shifted")
        .unwrap();
    builder.build_return(Some(&shifted)).unwrap();

    module
}

/// Create a module that drives the parallel-dispatch entry point.
fn create_dispatch_module(context: &Context) -> Module<'_> {
    // void fill_slot(i64 i, i64* data) { data[i] = i * 3; }
    // void run_fill(i64 n, i64* data) {
    //     tejit_dispatch_parallel(&fill_slot, 0, n, data);
    // }
    let module = context.create_module("dispatch");
    let i64_type = context.i64_type();
    let ptr_type = context.ptr_type(AddressSpace::default());
    let builder = context.create_builder();

    let body_type = context
        .void_type()
        .fn_type(&[i64_type.into(), ptr_type.into()], false);
    let body = module.add_function("fill_slot", body_type, None);
    let entry = context.append_basic_block(body, "entry");
    builder.position_at_end(entry);
    let index = body.get_nth_param(0).unwrap().into_int_value();
    let data = body.get_nth_param(1).unwrap().into_pointer_value();
    let slot = unsafe {
        builder
            .build_in_bounds_gep(i64_type, data, &[index], "slot")
            .unwrap()
    };
    let value = builder
        .build_int_mul(index, i64_type.const_int(3, false), "value")
        .unwrap();
    builder.build_store(slot, value).unwrap();
    builder.build_return(None).unwrap();

    let dispatch_type = context.void_type().fn_type(
        &[
            ptr_type.into(),
            i64_type.into(),
            i64_type.into(),
            ptr_type.into(),
        ],
        false,
    );
    let dispatch = module.add_function(DISPATCH_PARALLEL, dispatch_type, None);

    let driver_type = context
        .void_type()
        .fn_type(&[i64_type.into(), ptr_type.into()], false);
    let driver = module.add_function("run_fill", driver_type, None);
    let entry = context.append_basic_block(driver, "entry");
    builder.position_at_end(entry);
    let n = driver.get_nth_param(0).unwrap().into_int_value();
    let data = driver.get_nth_param(1).unwrap().into_pointer_value();
    let body_ptr = body.as_global_value().as_pointer_value();
    builder
        .build_call(
            dispatch,
            &[
                body_ptr.into(),
                i64_type.const_int(0, false).into(),
                n.into(),
                data.into(),
            ],
            "",
        )
        .unwrap();
    builder.build_return(None).unwrap();

    module
}

#[test]
fn construct_reports_host_target() {
    init_logging();
    let context = Context::create();
    let jit = TensorExprJit::new(&context).unwrap();

    let spec = jit.target_spec();
    assert_eq!(spec.cpu, TargetMachine::get_host_cpu_name().to_string());
    assert_eq!(spec.fp_fusion, FpFusion::Fast);
    assert!(!jit.data_layout().is_empty());
    assert_eq!(jit.target_machine().get_cpu().to_string(), spec.cpu);
}

#[test]
fn intrinsic_names_are_queryable() {
    init_logging();
    let context = Context::create();
    let jit = TensorExprJit::new(&context).unwrap();

    for entry in intrinsics::table() {
        assert!(jit.has_symbol(entry.name), "{} missing", entry.name);
    }
    assert!(jit.has_symbol(DISPATCH_PARALLEL));
    assert!(!jit.has_symbol("definitely_unknown_symbol_xyz"));
}

#[test]
fn compiles_and_runs_module() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    jit.add_module(create_answer_module(&context)).unwrap();
    let address = jit.find_symbol("the_answer").unwrap();
    assert_ne!(address, 0);

    let the_answer: extern "C" fn() -> i64 = unsafe { std::mem::transmute(address as usize) };
    assert_eq!(the_answer(), 42);

    // Module definitions never become intrinsics.
    assert!(!jit.has_symbol("the_answer"));
    println!("✅ the_answer() == 42");
}

#[test]
fn resolution_is_idempotent() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    jit.add_module(create_answer_module(&context)).unwrap();
    let first = jit.find_symbol("the_answer").unwrap();
    let second = jit.find_symbol("the_answer").unwrap();
    let third = jit.find_symbol("the_answer").unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn unknown_symbol_is_an_error() {
    init_logging();
    let context = Context::create();
    let jit = TensorExprJit::new(&context).unwrap();

    let err = jit.find_symbol("definitely_unknown_symbol_xyz").unwrap_err();
    assert!(matches!(err, JitError::UnresolvedSymbol { .. }), "{err}");
}

#[test]
fn kernel_calls_intrinsic_through_engine() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    jit.add_module(create_exp_kernel_module(&context)).unwrap();
    let address = jit.find_symbol("call_exp").unwrap();
    let call_exp: extern "C" fn(f32) -> f32 = unsafe { std::mem::transmute(address as usize) };

    assert!((call_exp(1.0) - std::f32::consts::E).abs() < 1e-4);
    assert!((call_exp(0.0) - 1.0).abs() < 1e-6);
}

#[test]
fn module_definition_shadows_intrinsic() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    jit.add_module(create_shadowing_module(&context)).unwrap();
    let address = jit.find_symbol("tejit_expf").unwrap();
    let shadowed: extern "C" fn(f32) -> f32 = unsafe { std::mem::transmute(address as usize) };

    // The module's definition wins over the intrinsic: x + 1, not e^x.
    assert!((shadowed(1.0) - 2.0).abs() < 1e-6);
}

#[test]
fn dispatch_parallel_links_end_to_end() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    jit.add_module(create_dispatch_module(&context)).unwrap();
    let address = jit.find_symbol("run_fill").unwrap();
    let run_fill: extern "C" fn(i64, *mut i64) = unsafe { std::mem::transmute(address as usize) };

    let mut slots = vec![0i64; 32];
    run_fill(slots.len() as i64, slots.as_mut_ptr());
    for (index, value) in slots.iter().enumerate() {
        assert_eq!(*value, index as i64 * 3);
    }
    println!("✅ parallel dispatch filled {} slots", slots.len());
}

#[test]
fn rejects_module_that_fails_verification() {
    init_logging();
    let context = Context::create();
    let mut jit = TensorExprJit::new(&context).unwrap();

    // A function with a body but no terminator fails verification.
    let module = context.create_module("broken");
    let fn_type = context.i64_type().fn_type(&[], false);
    let function = module.add_function("broken_fn", fn_type, None);
    context.append_basic_block(function, "entry");

    let err = jit.add_module(module).unwrap_err();
    assert!(matches!(err, JitError::InvalidModule { .. }), "{err}");
}
