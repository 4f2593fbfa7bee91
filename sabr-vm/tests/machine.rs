use std::io::Cursor;

use indoc::indoc;
use sabr_bytecode::{Bytecode, Op, Opcode};
use sabr_compiler::Compiler;
use sabr_foundation::{source::Sources, value::Value};
use sabr_preprocessor::Preprocessor;
use sabr_vm::{RuntimeError, Vm};

const POOL: usize = 4096;

fn compile(source: &str) -> Bytecode {
    let mut sources = Sources::new();
    let file = sources.add("test.sabr", source);
    let tokens = Preprocessor::new(&mut sources)
        .preprocess_file(file)
        .expect("preprocessing should succeed");
    Compiler::new()
        .compile(&tokens)
        .expect("compilation should succeed")
}

fn run_with_input(source: &str, input: &str) -> (Vec<u64>, String) {
    let bytecode = compile(source);
    let mut captured = Vec::new();
    let stack = {
        let mut vm = Vm::with_io(
            POOL,
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(&mut captured),
        );
        vm.run(&bytecode).expect("program should run");
        vm.data_stack().iter().map(|v| v.as_u64()).collect()
    };
    (stack, String::from_utf8(captured).expect("output is UTF-8"))
}

fn run(source: &str) -> (Vec<u64>, String) {
    run_with_input(source, "")
}

fn run_err(source: &str) -> RuntimeError {
    let bytecode = compile(source);
    let mut sink = Vec::new();
    let mut vm = Vm::with_io(POOL, Box::new(Cursor::new(vec![])), Box::new(&mut sink));
    vm.run(&bytecode).expect_err("program should fail")
}

#[test]
fn arithmetic_and_output() {
    assert_eq!(run("1 2 + puti").1, "3");
    assert_eq!(run("10 3 % puti").1, "1");
    assert_eq!(run("-1 putu").1, "18446744073709551615");
    assert_eq!(run("2.5 0.5 f* putf").1, "1.25");
    assert_eq!(run("7 neg puti").1, "-7");
}

#[test]
fn balanced_programs_leave_an_empty_stack() {
    let (stack, output) = run("1 2 + 3 * puti");
    assert_eq!(output, "9");
    assert_eq!(stack, [0u64; 0]);
}

#[test]
fn if_chooses_the_branch_at_runtime() {
    assert_eq!(run("1 if 10 else 20 end puti").1, "10");
    assert_eq!(run("0 if 10 else 20 end puti").1, "20");
    assert_eq!(run("0 if 10 end 5 puti").1, "5");
}

#[test]
fn loops_run_until_the_condition_fails() {
    // Count down from 5, printing each value.
    let (stack, output) = run("5 loop dup 0 > while dup puti 1- end drop");
    assert_eq!(output, "54321");
    assert_eq!(stack, [0u64; 0]);
}

#[test]
fn loop_break_and_continue() {
    let source = indoc! {"
        0 loop 1+ dup 9 < while
            dup 2 % if continue end
            dup puti
            dup 6 = if break end
        end drop
    "};
    // Odd values skip the print; 6 breaks out.
    assert_eq!(run(source).1, "246");
}

#[test]
fn for_loops_push_their_counter() {
    assert_eq!(run("for 5 to puti end").1, "01234");
    assert_eq!(run("for 3 from 8 to 2 step puti end").1, "357");
    assert_eq!(run("for 3 from 0 to -1 step puti end").1, "321");
    assert_eq!(run("ffor 2.0 to putf end").1, "0.01.0");
    assert_eq!(run("ufor 3 to putu end").1, "012");
}

#[test]
fn for_break_and_continue() {
    assert_eq!(run("for 10 to dup 3 > if drop break end puti end").1, "0123");
    assert_eq!(run("for 5 to dup 2 = if drop continue end puti end").1, "0134");
}

#[test]
fn infinite_for_exits_via_break() {
    assert_eq!(run("for dup 3 = if drop break end puti end").1, "012");
}

#[test]
fn switch_selects_one_group() {
    let source = |subject: &str| {
        format!("{subject} switch 1 case '1' putc pass 2 case '2' putc pass '?' putc end")
    };
    assert_eq!(run(&source("1")).1, "1");
    assert_eq!(run(&source("2")).1, "2");
    assert_eq!(run(&source("9")).1, "?");
}

#[test]
fn switch_fall_through_chain_shares_a_body() {
    let source = |subject: &str| {
        format!("{subject} switch 1 case 2 case 3 case 'y' putc pass 'n' putc end")
    };
    assert_eq!(run(&source("1")).1, "y");
    assert_eq!(run(&source("2")).1, "y");
    assert_eq!(run(&source("3")).1, "y");
    assert_eq!(run(&source("7")).1, "n");
}

#[test]
fn functions_call_and_return() {
    assert_eq!(run("$sq func dup * end 3 sq puti").1, "9");
    assert_eq!(run("$sq func dup * end 2 sq sq puti").1, "16");
}

#[test]
fn early_return_skips_the_rest_of_the_body() {
    let source = indoc! {"
        $classify func
            dup 0 < if 'n' putc drop return end
            'p' putc drop
        end
        -5 classify
        5 classify
    "};
    assert_eq!(run(source).1, "np");
}

#[test]
fn deferred_code_runs_on_every_exit_path() {
    let normal = "$f func defer { 'd' putc } 'x' putc end f";
    assert_eq!(run(normal).1, "xd");

    let early = indoc! {"
        $f func
            defer { 'd' putc }
            1 if 'x' putc return end
            'y' putc
        end
        f
    "};
    assert_eq!(run(early).1, "xd");
}

#[test]
fn macros_share_the_caller_scope() {
    // The macro sets `x` in the caller's (top-level) scope.
    let source = "$remember macro $x set end 7 remember x puti";
    assert_eq!(run(source).1, "7");
}

#[test]
fn func_locals_do_not_leak() {
    let source = indoc! {"
        9 $x set
        $f func 1 $x set x puti end
        f
        x puti
    "};
    assert_eq!(run(source).1, "19");
}

#[test]
fn lambdas_are_first_class() {
    assert_eq!(run("lambda { dup * } $sq define 4 sq puti").1, "16");
    assert_eq!(run("lambda { 1+ } 5 swap exec puti").1, "6");
}

#[test]
fn variables_and_memory() {
    assert_eq!(run("5 $x set x puti").1, "5");
    assert_eq!(run("1 alloc dup 42 swap ! @ puti").1, "42");
    assert_eq!(run("1 alloc $p ref 42 $p addr ! p puti").1, "42");
}

#[test]
fn allot_is_released_on_return() {
    // Each call allots the same cell again; the pool would run dry after a
    // few thousand calls if returns leaked.
    let source = indoc! {"
        $f func 1 allot drop end
        for 5000 to drop f end
    "};
    let (stack, _) = run(source);
    assert_eq!(stack, [0u64; 0]);
}

#[test]
fn structs_allocate_instances() {
    let source = indoc! {"
        $point struct $x member $y member end
        $point new $p set
        10 $p addr 0 + !
        20 $p addr 1 + !
        $p addr 0 + @ $p addr 1 + @ + puti
    "};
    assert_eq!(run(source).1, "30");
}

#[test]
fn strings_and_characters() {
    assert_eq!(run(r#""hello" puts"#).1, "hello");
    assert_eq!(run("'hi' putc putc").1, "hi");
    assert_eq!(run(r#""안녕" puts"#).1, "안녕");
    assert_eq!(run(r#"'\n' putc"#).1, "\n");
}

#[test]
fn console_input() {
    assert_eq!(run_with_input("getc putc", "A").1, "A");
    assert_eq!(run_with_input("geti 2 * puti", "21\n").1, "42");
    assert_eq!(run_with_input("getf putf", "2.5\n").1, "2.5");
    assert_eq!(run_with_input("gets puts", "echo\n").1, "echo");
    // EOF reads as -1.
    assert_eq!(run_with_input("getc puti", "").1, "-1");
}

#[test]
fn show_renders_the_whole_stack() {
    let (stack, output) = run("1 2 3 show 2drop drop");
    assert_eq!(output, "[1 2 3]\n");
    assert_eq!(stack, [0u64; 0]);
}

#[test]
fn exit_stops_execution() {
    assert_eq!(run("'a' putc exit 'b' putc").1, "a");
}

#[test]
fn preprocessed_programs_run_end_to_end() {
    let source = indoc! {"
        #def SIZE { 3 }
        $sum func
            0 for SIZE to + end
        end
        sum puti
    "};
    assert_eq!(run(source).1, "3");
}

mod failures {
    use super::*;

    #[test]
    fn stack_underflow() {
        assert!(matches!(run_err("drop"), RuntimeError::DataStackUnderflow));
        assert!(matches!(run_err("1 +"), RuntimeError::DataStackUnderflow));
    }

    #[test]
    fn division_by_zero() {
        assert!(matches!(run_err("1 0 /"), RuntimeError::DivisionByZero));
        assert!(matches!(run_err("1 0 u%"), RuntimeError::DivisionByZero));
    }

    #[test]
    fn undefined_words_fail_at_call_time() {
        assert!(matches!(
            run_err("ghost"),
            RuntimeError::UndefinedWord { id: 1 }
        ));
    }

    #[test]
    fn pool_exhaustion() {
        assert!(matches!(
            run_err("99999999 alloc drop"),
            RuntimeError::MemoryPoolExhausted
        ));
    }

    #[test]
    fn out_of_range_addresses() {
        assert!(matches!(
            run_err("1 99999999 !"),
            RuntimeError::AddressOutOfRange { .. }
        ));
    }
}

#[test]
fn bifs_dispatch_through_the_registration_table() {
    fn double(vm: &mut Vm<'_>) -> Result<(), RuntimeError> {
        let value = vm.pop()?;
        vm.push(Value::from_i64(value.as_i64().wrapping_mul(2)));
        Ok(())
    }

    let mut bytecode = Bytecode::new();
    bytecode.push(Op::with_operand(Opcode::Value, Value::from_i64(21)));
    bytecode.push(Op::with_operand(Opcode::Value, Value::from_u64(1)));
    bytecode.push(Op::with_operand(Opcode::Value, Value::from_u64(7)));
    bytecode.push(Op::new(Opcode::CallBif));

    let mut sink = Vec::new();
    let mut vm = Vm::with_io(POOL, Box::new(Cursor::new(vec![])), Box::new(&mut sink));
    vm.register_bif(1, 7, double);
    vm.run(&bytecode).unwrap();
    assert_eq!(vm.data_stack().last().map(|v| v.as_i64()), Some(42));

    let mut sink = Vec::new();
    let mut vm = Vm::with_io(POOL, Box::new(Cursor::new(vec![])), Box::new(&mut sink));
    let error = vm.run(&bytecode).expect_err("nothing registered");
    assert!(matches!(error, RuntimeError::UnknownBif { module: 1, func: 7 }));
}
