//! End-to-end scenarios: source text in, observable VM state out. Each
//! test compiles with `ember_compile::compile` and runs with `Vm::run`,
//! then inspects globals directly rather than capturing `print`'s stdout.

use ember_vm::{InterpretResult, Value, Vm};

fn run(source: &str) -> Vm {
    let mut vm = Vm::new();
    let function = ember_compile::compile(&mut vm, source).expect("compile error");
    match vm.run(function) {
        InterpretResult::Ok => vm,
        other => panic!("expected InterpretResult::Ok, got {other:?}"),
    }
}

fn global(vm: &mut Vm, name: &str) -> Value {
    let key = vm.alloc_string(name.as_bytes(), &[]);
    vm.globals.get(key).unwrap_or_else(|| panic!("global '{name}' not defined"))
}

#[test]
fn arithmetic_precedence() {
    let mut vm = run("var result = 1 + 2 * 3;");
    assert_eq!(global(&mut vm, "result").as_number(), Some(7.0));
}

#[test]
fn string_interning_makes_equal_literals_identical() {
    let mut vm = run("var a = \"hi\"; var b = \"hi\"; var eq = a == b;");
    assert_eq!(global(&mut vm, "eq"), Value::boolean(true));
    let a = global(&mut vm, "a").as_obj().unwrap();
    let b = global(&mut vm, "b").as_obj().unwrap();
    assert_eq!(a, b, "identical string literals must intern to the same object");
}

#[test]
fn closures_share_mutable_captured_state() {
    let mut vm = run(
        "fun mk() { var i = 0; fun inc() { i = i + 1; return i; } return inc; } \
         var f = mk(); \
         var r1 = f(); var r2 = f(); var r3 = f();",
    );
    assert_eq!(global(&mut vm, "r1").as_number(), Some(1.0));
    assert_eq!(global(&mut vm, "r2").as_number(), Some(2.0));
    assert_eq!(global(&mut vm, "r3").as_number(), Some(3.0));
}

#[test]
fn array_index_assignment() {
    let mut vm = run("var xs = [1, 2, 3]; xs[1] = 9;");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements: Vec<f64> = array.elements.borrow().iter().map(|v| v.as_number().unwrap()).collect();
    assert_eq!(elements, vec![1.0, 9.0, 3.0]);
}

#[test]
fn method_reads_instance_field_via_this() {
    let mut vm = run(
        "class A { greet() { return \"hi \" + this.name; } } \
         var a = A(); a.name = \"x\"; var r = a.greet();",
    );
    let r = global(&mut vm, "r").as_obj().unwrap();
    assert_eq!(r.as_string().unwrap().as_str_lossy(), "hi x");
}

#[test]
fn inheritance_syntax_and_instantiation() {
    // `class C < B {}` is the accepted inheritance form; `f()()` calls `f`
    // (returning the class `C`) and then calls the result (instantiating).
    let mut vm = run("class B {} class C < B {} fun f() { return C; } var r = f()();");
    let r = global(&mut vm, "r").as_obj().unwrap();
    let instance = r.as_instance().unwrap();
    let class_name = instance.class.as_class().unwrap().name;
    assert_eq!(class_name.as_string().unwrap().as_str_lossy(), "C");
}

#[test]
fn inherited_method_is_callable_on_subclass_instance() {
    let mut vm = run(
        "class Animal { speak() { return \"...\"; } } \
         class Dog < Animal {} \
         var d = Dog(); var r = d.speak();",
    );
    let r = global(&mut vm, "r").as_obj().unwrap();
    assert_eq!(r.as_string().unwrap().as_str_lossy(), "...");
}

#[test]
fn super_call_reaches_base_method() {
    let mut vm = run(
        "class Animal { speak() { return \"generic\"; } } \
         class Dog < Animal { speak() { return \"dog and \" + super.speak(); } } \
         var r = Dog().speak();",
    );
    let r = global(&mut vm, "r").as_obj().unwrap();
    assert_eq!(r.as_string().unwrap().as_str_lossy(), "dog and generic");
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let mut vm = Vm::new();
    let function = ember_compile::compile(&mut vm, "var x = 1 / 0;").unwrap();
    assert!(matches!(vm.run(function), InterpretResult::RuntimeError(_)));
}

#[test]
fn calling_undefined_global_is_a_runtime_error() {
    let mut vm = Vm::new();
    let function = ember_compile::compile(&mut vm, "undefined_fn();").unwrap();
    assert!(matches!(vm.run(function), InterpretResult::RuntimeError(_)));
}

#[test]
fn stack_balances_across_scope_exit() {
    // A block that declares and drops several locals must leave the VM
    // stack exactly as it found it; the next top-level statement runs
    // against slot 0 the same as if the block had never executed.
    let mut vm = run("{ var a = 1; var b = 2; var c = a + b; } var after = 42;");
    assert_eq!(global(&mut vm, "after").as_number(), Some(42.0));
}

#[test]
fn gc_stress_produces_identical_output_to_normal_run() {
    let source = "fun mk() { var i = 0; fun inc() { i = i + 1; return i; } return inc; } \
                  var f = mk(); \
                  var xs = [f(), f(), f()]; \
                  class A { greet() { return \"hi \" + this.name; } } \
                  var a = A(); a.name = \"x\"; var g = a.greet();";

    let mut normal = run(source);
    let mut stressed_vm = Vm::new();
    stressed_vm.gc_stress = true;
    let function = ember_compile::compile(&mut stressed_vm, source).expect("compile error");
    assert!(matches!(stressed_vm.run(function), InterpretResult::Ok));

    let normal_xs = global(&mut normal, "xs").as_obj().unwrap();
    let stressed_xs = global(&mut stressed_vm, "xs").as_obj().unwrap();
    let normal_elements: Vec<f64> =
        normal_xs.as_array().unwrap().elements.borrow().iter().map(|v| v.as_number().unwrap()).collect();
    let stressed_elements: Vec<f64> =
        stressed_xs.as_array().unwrap().elements.borrow().iter().map(|v| v.as_number().unwrap()).collect();
    assert_eq!(normal_elements, stressed_elements);

    let normal_g = global(&mut normal, "g").as_obj().unwrap();
    let stressed_g = global(&mut stressed_vm, "g").as_obj().unwrap();
    assert_eq!(normal_g.as_string().unwrap().as_str_lossy(), stressed_g.as_string().unwrap().as_str_lossy());
}

#[test]
fn native_clock_and_len_are_callable() {
    let mut vm = run("var t = clock(); var n = len(\"abcd\"); var m = len([1, 2, 3]);");
    assert!(global(&mut vm, "t").as_number().unwrap() >= 0.0);
    assert_eq!(global(&mut vm, "n").as_number(), Some(4.0));
    assert_eq!(global(&mut vm, "m").as_number(), Some(3.0));
}

#[test]
fn sqrt_rejects_non_number_argument() {
    let mut vm = Vm::new();
    let function = ember_compile::compile(&mut vm, "sqrt(\"nope\");").unwrap();
    assert!(matches!(vm.run(function), InterpretResult::RuntimeError(_)));
}

#[test]
fn print_statement_runs_without_error() {
    // `print` writes straight to stdout; this only confirms the opcode
    // executes cleanly end-to-end, not the captured text.
    let mut vm = Vm::new();
    let function = ember_compile::compile(&mut vm, "print \"hello\"; print 1 + 2;").unwrap();
    assert!(matches!(vm.run(function), InterpretResult::Ok));
}

#[test]
fn array_plus_string_appends_rather_than_stringifying() {
    let mut vm = run("var xs = [1, 2] + \"x\";");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements = array.elements.borrow();
    assert_eq!(elements.len(), 3, "the array must survive, gaining one element");
    assert_eq!(elements[0].as_number(), Some(1.0));
    assert_eq!(elements[1].as_number(), Some(2.0));
    assert_eq!(elements[2].as_obj().unwrap().as_string().unwrap().as_str_lossy(), "x");
}

#[test]
fn array_plus_number_appends_the_number() {
    let mut vm = run("var xs = [1] + 2;");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements = array.elements.borrow();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[1].as_number(), Some(2.0));
}

#[test]
fn array_plus_bool_appends_the_bool() {
    let mut vm = run("var xs = [1] + true;");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements = array.elements.borrow();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[1].as_bool(), Some(true));
}

#[test]
fn array_plus_nil_appends_nil() {
    let mut vm = run("var xs = [1] + nil;");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements = array.elements.borrow();
    assert_eq!(elements.len(), 2);
    assert!(elements[1].is_nil());
}

#[test]
fn non_array_plus_array_prepends_into_the_array() {
    let mut vm = run("var xs = 1 + [2, 3];");
    let xs = global(&mut vm, "xs").as_obj().unwrap();
    let array = xs.as_array().unwrap();
    let elements = array.elements.borrow();
    assert_eq!(elements.len(), 3);
    assert_eq!(elements[0].as_number(), Some(1.0));
    assert_eq!(elements[1].as_number(), Some(2.0));
    assert_eq!(elements[2].as_number(), Some(3.0));
}
