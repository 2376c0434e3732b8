use crate::back::codegen::generate;
use crate::front::{lower, parse};

fn compile_and_run(src: &str) -> super::vm::Vm {
    let ast = parse(src).expect("parse should succeed");
    let ir = lower(ast);
    let mut vm = generate(&ir).expect("codegen should succeed");
    vm.run().expect("run should succeed");
    vm
}

#[test]
fn s1_arithmetic_and_print() {
    let vm = compile_and_run("print(2 + 3 * 4);");
    assert_eq!(vm.output, vec!["14"]);
}

#[test]
fn s2_while_loop() {
    let vm = compile_and_run("i := 0; while (i < 3) { print(i); i := i + 1; }");
    assert_eq!(vm.output, vec!["0", "1", "2"]);
}

#[test]
fn s3_if_else() {
    let vm = compile_and_run("x := 5; if (x < 3) { print(1); } else { print(2); }");
    assert_eq!(vm.output, vec!["2"]);
}

#[test]
fn s4_division_by_zero_halts_with_runtime_error() {
    let ast = parse("print(10 / 0);").unwrap();
    let ir = lower(ast);
    let mut vm = generate(&ir).unwrap();
    let err = vm.run().expect_err("division by zero should fail at runtime");
    assert!(err.to_string().contains("Division by zero") || err.to_string().to_lowercase().contains("division by zero"));
    assert!(vm.output.is_empty());
}

#[test]
fn s5_function_call_with_return() {
    let vm = compile_and_run("func add(a, b) { return a + b; } print(add(7, 8));");
    assert_eq!(vm.output, vec!["15"]);
}

#[test]
fn s6_gc_reclaims_unreachable_objects() {
    let mut vm = super::vm::Vm::new();
    for _ in 0..1000 {
        vm.alloc_heap(64).expect("allocation should succeed");
    }
    vm.gc_collect();
    // Every allocation above is unreachable (nothing on the stack/globals
    // points at any of them), so the sweep reclaims everything.
    assert_eq!(vm.alloc_heap(0).map(|_| ()), Ok(()));
}

#[test]
fn s6_gc_keeps_rooted_values_and_sweeps_the_rest() {
    // `arr` stays bound to its heap handle on the operand stack (top-level
    // locals address it directly), so it's still reachable after the
    // program halts.
    let mut vm = compile_and_run("arr := [4];");
    for _ in 0..50 {
        vm.alloc_heap(8).expect("allocation should succeed");
    }
    assert_eq!(vm.heap_live_count(), 51);
    vm.gc_collect();
    assert_eq!(vm.heap_live_count(), 1);
}

#[test]
fn array_declaration_and_access() {
    let vm = compile_and_run("arr := [5]; print(arr[2]); print(arr[10]);");
    // Freshly allocated arrays are zeroed; index 10 is out of range for a
    // 5-element array and reads back 0 rather than erroring, matching
    // `kotha_array_get`'s bounds-checked behavior.
    assert_eq!(vm.output, vec!["0", "0"]);
}

#[test]
fn recursive_function_does_not_alias_locals_across_frames() {
    let vm = compile_and_run(
        "func fact(n) { if (n < 2) { return 1; } else { return n * fact(n - 1); } } print(fact(5));",
    );
    assert_eq!(vm.output, vec!["120"]);
}

#[test]
fn every_jump_target_is_in_range() {
    let ast = parse("x := 1; while (x < 5) { x := x + 1; } print(x);").unwrap();
    let ir = lower(ast);
    let vm = generate(&ir).unwrap();
    for instr in &vm.code {
        use crate::back::bytecode::OpCode::*;
        if matches!(instr.op, Jmp | JmpFalse | JmpTrue | Try) {
            assert!((instr.arg as usize) < vm.code.len());
        }
    }
}

#[test]
fn string_interning_is_idempotent() {
    let mut vm = super::vm::Vm::new();
    let a = vm.intern_string("hello");
    let b = vm.intern_string("hello");
    assert_eq!(a, b);
}

#[test]
fn function_table_upsert_preserves_id() {
    use crate::common::Id;
    let mut vm = super::vm::Vm::new();
    let name = Id::new("f".to_string());
    let id1 = vm.add_function(name, 10, 2);
    let id2 = vm.add_function(name, 20, 3);
    assert_eq!(id1, id2);
    assert_eq!(vm.functions[id1 as usize].address, 20);
    assert_eq!(vm.functions[id1 as usize].num_params, 3);
}

#[test]
fn empty_program_halts_with_no_output() {
    let vm = compile_and_run("");
    assert!(vm.output.is_empty());
}
