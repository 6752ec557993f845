//! The compiled path: `compile` / `code` primitives and the compiler's
//! output shape.

use std::path::Path;

use rasp_compiler::compile::{Compiler, Linkage};
use rasp_compiler::evaluator::Evaluator;
use rasp_compiler::parser::parse_str;
use rasp_core::code::Code;
use rasp_core::pool::Pool;

const EVALUATOR_PATH: &str = concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../lib/machines/evaluator.scm"
);

fn evaluator() -> Evaluator {
    Evaluator::from_file(Path::new(EVALUATOR_PATH)).expect("evaluator program must load")
}

fn eval_last(evaluator: &mut Evaluator, input: &str) -> String {
    let mut out = Pool::new();
    let results = evaluator
        .evaluate_source(input, &mut out)
        .expect("input must parse");
    out.display(*results.last().expect("at least one form"))
}

fn compile_lines(input: &str, target: &str, linkage: &Linkage) -> Vec<String> {
    let mut pool = Pool::new();
    let forms = parse_str(&mut pool, input).unwrap();
    let exp = pool.car(forms);
    let code = Compiler::new()
        .compile(&mut pool, exp, target, linkage)
        .unwrap();
    code.iter().map(|c| c.render(&pool)).collect()
}

#[test]
fn test_compile_self_evaluating() {
    let lines = compile_lines("42", "val", &Linkage::Next);
    assert_eq!(lines, vec!["(assign val (const 42))"]);
}

#[test]
fn test_compile_self_evaluating_with_return() {
    let lines = compile_lines("42", "val", &Linkage::Return);
    assert_eq!(
        lines,
        vec!["(assign val (const 42))", "(goto (reg continue))"]
    );
}

#[test]
fn test_compile_variable() {
    let lines = compile_lines("x", "val", &Linkage::Next);
    assert_eq!(
        lines,
        vec!["(assign val (op lookup-variable-value) (const x) (reg env))"]
    );
}

#[test]
fn test_compile_quoted() {
    let lines = compile_lines("'(a b)", "val", &Linkage::Next);
    assert_eq!(lines, vec!["(assign val (const (a b)))"]);
}

#[test]
fn test_compile_if_shape() {
    let lines = compile_lines("(if x 1 2)", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(text.contains("(branch (label false-branch-1) (op false?) (reg val))"));
    assert!(text.contains("true-branch-1"));
    assert!(text.contains("false-branch-1"));
    assert!(text.contains("after-if-1"));
    // the consequent jumps past the alternative
    assert!(text.contains("(goto (label after-if-1))"));
}

#[test]
fn test_compile_definition_preserves_env() {
    // the value computation is a call, which clobbers env; the definition
    // still needs it afterwards
    let lines = compile_lines("(define x (f))", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(text.contains("(save env)"), "{text}");
    assert!(text.contains("(restore env)"), "{text}");
    assert!(text.contains("(assign val (op define-variable!) (const x) (reg val) (reg env))"));
}

#[test]
fn test_simple_definition_needs_no_save() {
    let lines = compile_lines("(define x 1)", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(!text.contains("save"), "{text}");
}

#[test]
fn test_compile_lambda_shape() {
    let lines = compile_lines("(lambda (x) x)", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(text.contains(
        "(assign val (op make-compiled-procedure) (label proc-entry-1) (reg env))"
    ));
    assert!(text.contains("(assign env (op compiled-environment) (reg proc))"));
    assert!(text.contains(
        "(assign env (op extend-environment) (const (x)) (reg argl) (reg env))"
    ));
    // the body returns through continue
    assert!(text.contains("(goto (reg continue))"));
    assert!(text.contains("after-lambda-1"));
}

#[test]
fn test_compile_application_shape() {
    let lines = compile_lines("(f 1 2)", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(text.contains("(assign argl (const ()))"));
    assert!(text.contains("(assign argl (op adjoin-arg) (reg val) (reg argl))"));
    assert!(text.contains("(branch (label primitive-branch-1) (op primitive-procedure?) (reg proc))"));
    assert!(text.contains("(branch (label compiled-branch-1) (op compiled-procedure?) (reg proc))"));
    assert!(text.contains("(perform (op signal-error) (const \"can't apply %s\") (reg proc))"));
    assert!(text.contains(
        "(assign val (op apply-primitive-procedure) (reg proc) (reg argl))"
    ));
}

#[test]
fn test_nested_call_preserves_argl() {
    // the inner call while argl is live forces a save/restore of argl
    let lines = compile_lines("(f (g 1) 2)", "val", &Linkage::Next);
    let text = lines.join("\n");
    assert!(text.contains("(save argl)"), "{text}");
    assert!(text.contains("(restore argl)"), "{text}");
    assert!(text.contains("(save proc)"), "{text}");
}

#[test]
fn test_compile_rejects_syntax_errors() {
    let mut pool = Pool::new();
    let forms = parse_str(&mut pool, "(if)").unwrap();
    let exp = pool.car(forms);
    let err = Compiler::new()
        .compile(&mut pool, exp, "val", &Linkage::Next)
        .unwrap_err();
    assert_eq!(err, "if: no predicate in (if)");
}

#[test]
fn test_compile_seq_register_annotations() {
    let mut pool = Pool::new();
    let forms = parse_str(&mut pool, "x").unwrap();
    let exp = pool.car(forms);
    let seq = Compiler::new()
        .compile_seq(&mut pool, exp, "val", &Linkage::Next)
        .unwrap();
    assert!(seq.needs("env"));
    assert!(seq.modifies("val"));
    assert!(!seq.modifies("env"));
}

#[test]
fn test_label_counter_is_not_shared() {
    // two compilers produce the same labels; one compiler keeps counting
    let a = compile_lines("(if x 1 2)", "val", &Linkage::Next).join("\n");
    let b = compile_lines("(if x 1 2)", "val", &Linkage::Next).join("\n");
    assert_eq!(a, b);

    let mut pool = Pool::new();
    let mut compiler = Compiler::new();
    let forms = parse_str(&mut pool, "(if x 1 2) (if x 1 2)").unwrap();
    let first = pool.car(forms);
    let second = pool.car(pool.cdr(forms));
    let one = compiler.compile(&mut pool, first, "val", &Linkage::Next).unwrap();
    let two = compiler.compile(&mut pool, second, "val", &Linkage::Next).unwrap();
    let one: Vec<String> = one.iter().map(|c| c.render(&pool)).collect();
    let two: Vec<String> = two.iter().map(|c| c.render(&pool)).collect();
    assert!(one.join("\n").contains("after-if-1"));
    assert!(two.join("\n").contains("after-if-2"));
}

// the compiled path through the machine

#[test]
fn test_compile_primitive_runs_the_code() {
    let mut e = evaluator();
    assert_eq!(eval_last(&mut e, "(compile '(+ 1 2))"), "3");
}

#[test]
fn test_compiled_definitions_are_callable() {
    let mut e = evaluator();
    eval_last(&mut e, "(compile '(define (cdouble x) (* 2 x)))");
    // called from interpreted code through the compiled-procedure arm
    assert_eq!(eval_last(&mut e, "(cdouble 21)"), "42");
    // and from compiled code through the compiled branch
    assert_eq!(eval_last(&mut e, "(compile '(cdouble 4))"), "8");
}

#[test]
fn test_compiled_and_interpreted_results_agree() {
    let mut e = evaluator();
    let cases = [
        "(+ 1 2 3)",
        "(- 10 (* 2 3))",
        "(if (< 1 2) 'a 'b)",
        "(if false 'a 'b)",
        "(let ((x 2) (y 3)) (* x y))",
        "((lambda (x) (+ x 1)) 4)",
        "((lambda (x . rest) rest) 1 2 3)",
        "(and 1 2)",
        "(and)",
        "(or false 7)",
        "(or)",
        "(begin 1 2 3)",
        "(cond ((= 1 1) 'y) (else 'n))",
        "(cond ((= 1 2) 'y))",
        "'(a b c)",
        "(cons 1 (cons 2 ()))",
    ];
    for case in cases {
        let direct = eval_last(&mut e, case);
        let compiled = eval_last(&mut e, &format!("(compile '{case})"));
        assert_eq!(direct, compiled, "compiled path diverges for {case}");
    }
}

#[test]
fn test_compiled_code_signals_cant_apply() {
    let mut e = evaluator();
    assert_eq!(eval_last(&mut e, "(compile '(1 2))"), "can't apply 1");
}

#[test]
fn test_compile_reports_syntax_errors() {
    let mut e = evaluator();
    let result = eval_last(&mut e, "(compile '(if))");
    assert_eq!(result, "compile: if: no predicate in (if)");
}

#[test]
fn test_code_primitive_returns_instructions() {
    let mut e = evaluator();
    let result = eval_last(&mut e, "(code '5 \"val\" \"next\")");
    assert_eq!(result, "((assign val (const 5)))");

    let result = eval_last(&mut e, "(code 'x \"target\" \"next\")");
    assert_eq!(
        result,
        "((assign target (op lookup-variable-value) (const x) (reg env)))"
    );

    // default target/linkage is val/return
    let result = eval_last(&mut e, "(code '5)");
    assert_eq!(result, "((assign val (const 5)) (goto (reg continue)))");
}

#[test]
fn test_library_and_self_tests_load_cleanly() {
    let mut e = evaluator();
    let lib_dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../lib"));
    for file in [
        "library/list.scm",
        "library/math.scm",
        "tests/basic.scm",
        "tests/structure.scm",
    ] {
        let source = std::fs::read_to_string(lib_dir.join(file)).unwrap();
        let mut out = Pool::new();
        let results = e.evaluate_source(&source, &mut out).unwrap();
        for result in results {
            assert!(
                !out.is_error(result),
                "{file}: {}",
                out.display(result)
            );
        }
    }
    // the library is now live
    assert_eq!(eval_last(&mut e, "(map square '(1 2 3))"), "(1 4 9)");
}

#[test]
fn test_run_from_a_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "(define (triple x) (* 3 x))").unwrap();
    writeln!(file, "(triple 14)").unwrap();

    let mut pool = Pool::new();
    let forms = rasp_compiler::parser::parse_file(&mut pool, file.path()).unwrap();
    assert_eq!(pool.list_len(forms), 2);

    let mut e = evaluator();
    let mut out = Pool::new();
    let mut last = None;
    for form in pool.list_items(forms) {
        last = Some(e.evaluate(&pool, form, &mut out));
    }
    assert_eq!(out.display(last.unwrap()), "42");
}

#[test]
fn test_code_round_trips_through_translation() {
    // what the code primitive prints translates back to the same code
    let mut pool = Pool::new();
    let forms = parse_str(&mut pool, "(lambda (x) (+ x 1))").unwrap();
    let exp = pool.car(forms);
    let code = Compiler::new()
        .compile(&mut pool, exp, "val", &Linkage::Next)
        .unwrap();

    let values: Vec<_> = code.iter().map(|c| c.to_value(&mut pool)).collect();
    let as_value = pool.list(&values);
    let translated: Vec<Code> =
        rasp_core::code::translate_to_code(&pool, as_value).unwrap();

    let before: Vec<String> = code.iter().map(|c| c.render(&pool)).collect();
    let after: Vec<String> = translated.iter().map(|c| c.render(&pool)).collect();
    assert_eq!(before, after);
}
