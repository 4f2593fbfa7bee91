use indoc::indoc;
use sabr_bytecode::{Bytecode, Opcode};
use sabr_compiler::{CompileError, Compiler};
use sabr_foundation::source::Sources;
use sabr_preprocessor::Preprocessor;

fn compile(source: &str) -> Bytecode {
    try_compile(source).unwrap()
}

fn try_compile(source: &str) -> Result<Bytecode, CompileError> {
    let mut sources = Sources::new();
    let file = sources.add("test.sabr", source);
    let tokens = Preprocessor::new(&mut sources)
        .preprocess_file(file)
        .expect("preprocessing should succeed");
    Compiler::new().compile(&tokens)
}

fn opcodes(bytecode: &Bytecode) -> Vec<Opcode> {
    bytecode.ops().iter().map(|op| op.opcode).collect()
}

#[test]
fn integer_literals_in_every_base() {
    let bytecode = compile("0x2A 0o52 0b101010 42");
    assert_eq!(opcodes(&bytecode), [Opcode::Value; 4]);
    for op in bytecode.ops() {
        assert_eq!(op.operand.as_i64(), 42);
    }
}

#[test]
fn negative_one_is_all_bits_set() {
    let bytecode = compile("-1");
    let op = bytecode.op(0);
    assert_eq!(op.opcode, Opcode::Value);
    assert_eq!(op.operand.as_i64(), -1);
    assert_eq!(op.operand.as_u64(), 0xFFFFFFFFFFFFFFFF);
}

#[test]
fn if_else_back_patching() {
    let bytecode = compile("1 if 10 else 20 end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Value,
            Opcode::If,
            Opcode::Value,
            Opcode::Jump,
            Opcode::Value,
        ]
    );
    // The if jumps to the else branch, the else's jump past the end.
    assert_eq!(bytecode.op(1).operand.as_u64(), bytecode.position_of(4));
    assert_eq!(bytecode.op(3).operand.as_u64(), bytecode.current_pos());
}

#[test]
fn if_without_else_jumps_past_end() {
    let bytecode = compile("0 if 10 end drop");
    assert_eq!(bytecode.op(1).operand.as_u64(), bytecode.position_of(3));
}

#[test]
fn switch_fall_through_chains_use_neq() {
    let bytecode = compile(r#"3 switch 1 case 2 case 3 case pass "hit" puts end"#);

    // The two chained cases compare with neq, the final one with equ.
    assert_eq!(bytecode.op(4).opcode, Opcode::Neq);
    assert_eq!(bytecode.op(8).opcode, Opcode::Neq);
    assert_eq!(bytecode.op(12).opcode, Opcode::Equ);

    // A chained match jumps into the shared body; the final case skips to
    // the next group on mismatch; pass exits through switch_end.
    let body_pos = bytecode.position_of(14);
    let pass_jump = bytecode.op(14);
    assert_eq!(pass_jump.opcode, Opcode::Jump);
    assert_eq!(bytecode.op(5).operand.as_u64(), body_pos);
    assert_eq!(bytecode.op(9).operand.as_u64(), body_pos);
    assert_eq!(bytecode.op(13).operand.as_u64(), body_pos + 9);

    let end_index = bytecode.ops().len() - 1;
    assert_eq!(bytecode.ops()[end_index].opcode, Opcode::SwitchEnd);
    assert_eq!(pass_jump.operand.as_u64(), bytecode.position_of(end_index));
}

#[test]
fn preprocessor_macro_compiles_to_its_expansion() {
    let bytecode = compile("#def sq { dup * } 3 sq");
    assert_eq!(
        opcodes(&bytecode),
        [Opcode::Value, Opcode::Dup, Opcode::Mul]
    );
    assert_eq!(bytecode.op(0).operand.as_i64(), 3);
}

#[test]
fn character_strings_emit_reversed_values() {
    let bytecode = compile("'abc'");
    let points: Vec<u64> = bytecode.ops().iter().map(|op| op.operand.as_u64()).collect();
    assert_eq!(points, [0x63, 0x62, 0x61]);
}

#[test]
fn array_strings_emit_commas_and_end() {
    let bytecode = compile(r#""hi""#);
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Array,
            Opcode::Value,
            Opcode::ArrayComma,
            Opcode::Value,
            Opcode::ArrayComma,
            Opcode::ArrayEnd,
        ]
    );
    assert_eq!(bytecode.op(1).operand.as_u64(), 'h' as u64);
    assert_eq!(bytecode.op(3).operand.as_u64(), 'i' as u64);
}

#[test]
fn identifier_literals_intern_in_order() {
    let bytecode = compile("$a $b $a");
    let ids: Vec<u64> = bytecode.ops().iter().map(|op| op.operand.as_u64()).collect();
    assert_eq!(ids, [1, 2, 1]);
}

#[test]
fn calling_a_word_emits_exec() {
    let bytecode = compile("$x drop x");
    let call = bytecode.op(2);
    assert_eq!(call.opcode, Opcode::Exec);
    assert_eq!(call.operand.as_u64(), 1);
}

#[test]
fn loop_while_jumps_back_to_the_top() {
    let bytecode = compile("loop 1 while 2 end");
    assert_eq!(
        opcodes(&bytecode),
        [Opcode::Value, Opcode::If, Opcode::Value, Opcode::Jump]
    );
    let back_jump = bytecode.op(3);
    assert_eq!(back_jump.operand.as_u64(), 0);
    // Failing the while condition jumps past the back jump.
    assert_eq!(bytecode.op(1).operand.as_u64(), bytecode.current_pos());
}

#[test]
fn for_loop_places_one_check_after_the_last_clause() {
    let bytecode = compile("for 10 to puti end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::For,
            Opcode::Jump,     // unused placeholder after `for`
            Opcode::Value,
            Opcode::ForTo,
            Opcode::ForCheck, // placeholder after `to`, rewritten
            Opcode::Puti,
            Opcode::ForNext,
            Opcode::ForEnd,
        ]
    );
    // The stale placeholder falls through to the next op.
    assert_eq!(bytecode.op(1).operand.as_u64(), bytecode.position_of(2));
    // The check exits at for_end; for_next loops back to the check.
    assert_eq!(bytecode.op(4).operand.as_u64(), bytecode.position_of(7));
    assert_eq!(bytecode.op(6).operand.as_u64(), bytecode.position_of(4));
}

#[test]
fn for_break_and_continue() {
    let bytecode = compile("for 10 to break continue end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::For,
            Opcode::Jump,
            Opcode::Value,
            Opcode::ForTo,
            Opcode::ForCheck,
            Opcode::Jump,    // break
            Opcode::ForNext, // continue, rewritten in place
            Opcode::ForNext,
            Opcode::ForEnd,
        ]
    );
    assert_eq!(bytecode.op(5).operand.as_u64(), bytecode.position_of(8));
    assert_eq!(bytecode.op(6).operand.as_u64(), bytecode.position_of(4));
}

#[test]
fn functions_lower_to_lambda_define() {
    let bytecode = compile("$sq func dup * return end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Value,
            Opcode::Lambda,
            Opcode::Local,
            Opcode::Dup,
            Opcode::Mul,
            Opcode::Jump, // return
            Opcode::LocalEnd,
            Opcode::Return,
            Opcode::Define,
        ]
    );
    // return jumps to the epilogue; the lambda jumps over the body to the
    // define.
    assert_eq!(bytecode.op(5).operand.as_u64(), bytecode.position_of(6));
    assert_eq!(bytecode.op(1).operand.as_u64(), bytecode.position_of(8));
}

#[test]
fn macros_have_no_local_scope() {
    let bytecode = compile("$twice macro dup + end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Value,
            Opcode::Lambda,
            Opcode::Dup,
            Opcode::Add,
            Opcode::Return,
            Opcode::Define,
        ]
    );
}

#[test]
fn deferred_fragments_run_before_the_return_path() {
    let bytecode = compile("$f func defer { 1 putu } 2 putu end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Value,
            Opcode::Lambda,
            Opcode::Local,
            Opcode::Value,    // 2
            Opcode::Putu,
            Opcode::Value,    // deferred 1
            Opcode::Putu,
            Opcode::LocalEnd,
            Opcode::Return,
            Opcode::Define,
        ]
    );
    assert_eq!(bytecode.op(5).operand.as_u64(), 1);
}

#[test]
fn lambda_compiles_its_block_in_place() {
    let bytecode = compile("lambda { dup * } drop");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Lambda,
            Opcode::Local,
            Opcode::Dup,
            Opcode::Mul,
            Opcode::LocalEnd,
            Opcode::Return,
            Opcode::Drop,
        ]
    );
    assert_eq!(bytecode.op(0).operand.as_u64(), bytecode.position_of(6));
}

#[test]
fn structs_count_their_members() {
    let bytecode = compile("$point struct $x member $y member end");
    assert_eq!(
        opcodes(&bytecode),
        [
            Opcode::Value,
            Opcode::Datagroup,
            Opcode::Value,
            Opcode::Member,
            Opcode::Value,
            Opcode::Member,
            Opcode::DatagroupEnd,
        ]
    );
    assert_eq!(bytecode.op(1).operand.as_u64(), 2);
}

#[test]
fn every_jump_lands_on_an_op_boundary() {
    let source = indoc! {r#"
        $f func
            defer { 3 putu }
            loop 1 while
                2 switch 1 case break pass 2 case continue pass end
            end
            for 10 to 1 from 2 step
                dup 5 > if return else drop end
            end
        end
        f
    "#};
    let bytecode = compile(source);
    for op in bytecode.ops() {
        let target_like = matches!(
            op.opcode,
            Opcode::If | Opcode::Jump | Opcode::ForCheck | Opcode::ForNext | Opcode::Lambda
        );
        if target_like {
            let target = op.operand.as_u64();
            assert!(
                bytecode.index_of_pos(target).is_some() || target == bytecode.current_pos(),
                "operand {target} of {:?} is not an op boundary",
                op.opcode
            );
        }
    }
}

#[test]
fn compilation_is_deterministic() {
    let source = "#def sq { dup * } 3 sq $f func 1 sq end 'abc' puts";
    assert_eq!(compile(source).encode(), compile(source).encode());
}

mod errors {
    use super::*;

    #[test]
    fn unmatched_end() {
        assert!(matches!(
            try_compile("1 2 end"),
            Err(CompileError::UnmatchedEnd { .. })
        ));
    }

    #[test]
    fn unmatched_intermediates() {
        for source in ["else", "while", "1 case", "pass", "from", "to", "step"] {
            assert!(
                matches!(
                    try_compile(source),
                    Err(CompileError::UnmatchedIntermediate { .. })
                ),
                "{source} should be rejected"
            );
        }
    }

    #[test]
    fn intermediate_under_the_wrong_opener() {
        assert!(matches!(
            try_compile("1 if while end"),
            Err(CompileError::UnmatchedIntermediate { .. })
        ));
    }

    #[test]
    fn duplicate_for_clause() {
        assert!(matches!(
            try_compile("for 1 from 2 from end"),
            Err(CompileError::DuplicateFromToStep { .. })
        ));
    }

    #[test]
    fn switch_without_cases() {
        assert!(matches!(
            try_compile("1 switch end"),
            Err(CompileError::MalformedSwitch { .. })
        ));
    }

    #[test]
    fn switch_with_trailing_case() {
        assert!(matches!(
            try_compile("1 switch 2 case pass 3 case end"),
            Err(CompileError::MalformedSwitch { .. })
        ));
    }

    #[test]
    fn return_at_the_top_level() {
        assert!(matches!(
            try_compile("return"),
            Err(CompileError::ReturnOutsideFunction { .. })
        ));
        assert!(matches!(
            try_compile("1 if return end"),
            Err(CompileError::ReturnOutsideFunction { .. })
        ));
    }

    #[test]
    fn break_outside_a_loop() {
        assert!(matches!(
            try_compile("1 if break end"),
            Err(CompileError::UnmatchedIntermediate { .. })
        ));
    }

    #[test]
    fn invalid_literals() {
        assert!(matches!(
            try_compile("12abc"),
            Err(CompileError::InvalidNumeric { .. })
        ));
        assert!(matches!(
            try_compile(r"'\q'"),
            Err(CompileError::InvalidEscape { .. })
        ));
        assert!(matches!(
            try_compile("$2x"),
            Err(CompileError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            try_compile("$if"),
            Err(CompileError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn unclosed_construct_at_eof() {
        assert!(matches!(
            try_compile("1 if 2"),
            Err(CompileError::UnclosedConstruct { .. })
        ));
    }

    #[test]
    fn lambda_needs_a_block() {
        assert!(matches!(
            try_compile("lambda dup"),
            Err(CompileError::ExpectedBlock { .. })
        ));
    }
}
