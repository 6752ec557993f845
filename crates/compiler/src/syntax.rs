//! Syntax layer: recognizers, checkers, accessors, desugarings
//!
//! For every special form there is a shape predicate (`is_*`), a structural
//! checker (`check_*`) that fails with a message naming the offending
//! expression, and accessors over the validated shape. Desugarings rewrite
//! derived forms for the compiler and the evaluator: `let` becomes a lambda
//! application, `cond` becomes nested `if`s, the function form of `define`
//! becomes a `lambda`, and a clause body collapses to nil / the single
//! expression / a `begin`.
//!
//! Accessors assume the checker ran (or the shape predicate held); handing
//! them an arbitrary value is a programming error.

use std::collections::HashSet;

use rasp_core::pool::Pool;
use rasp_core::value::{NIL, Value, ValueRef};

fn is_tagged_list(pool: &Pool, exp: ValueRef, tag: &str) -> bool {
    pool.is_pair(exp) && pool.symbol_name(pool.car(exp)) == Some(tag)
}

/// The expression as a proper list, or None.
fn to_list(pool: &Pool, exp: ValueRef) -> Option<ValueRef> {
    if pool.is_pair(exp) && pool.is_list(exp) {
        Some(exp)
    } else {
        None
    }
}

// recognizers

pub fn is_self_evaluating(pool: &Pool, exp: ValueRef) -> bool {
    matches!(
        pool.get(exp),
        Value::Nil | Value::Number(_) | Value::Str(_) | Value::Bool(_) | Value::Primitive { .. }
    )
}

pub fn is_variable(pool: &Pool, exp: ValueRef) -> bool {
    pool.is_symbol(exp)
}

pub fn is_quoted(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "quote")
}

pub fn is_assignment(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "set!")
}

pub fn is_definition(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "define")
}

pub fn is_if(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "if")
}

pub fn is_lambda(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "lambda")
}

pub fn is_let(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "let")
}

pub fn is_begin(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "begin")
}

pub fn is_cond(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "cond")
}

pub fn is_and(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "and")
}

pub fn is_or(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "or")
}

pub fn is_eval(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "eval")
}

pub fn is_apply(pool: &Pool, exp: ValueRef) -> bool {
    is_tagged_list(pool, exp, "apply")
}

pub fn is_application(pool: &Pool, exp: ValueRef) -> bool {
    pool.is_pair(exp)
}

/// A list whose head is a symbol: a candidate special form.
pub fn starts_with_symbol(pool: &Pool, exp: ValueRef) -> bool {
    pool.is_pair(exp) && pool.is_symbol(pool.car(exp))
}

// quote

pub fn check_quoted(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (quote x)
    let Some(quoted) = to_list(pool, exp) else {
        return Err(format!("quote: non-list structure in {}", pool.display(exp)));
    };
    match pool.list_len(quoted) {
        1 => Err(format!("quote: no expression in {}", pool.display(exp))),
        2 => Ok(()),
        _ => Err(format!("quote: more than one item in {}", pool.display(exp))),
    }
}

pub fn get_text_of_quotation(pool: &Pool, exp: ValueRef) -> ValueRef {
    // x from (quote x)
    pool.car(pool.cdr(exp))
}

// set!

pub fn check_assignment(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (set! variable value)
    let Some(assignment) = to_list(pool, exp) else {
        return Err(format!("set!: non-list structure in {}", pool.display(exp)));
    };
    let len = pool.list_len(assignment);
    if len < 2 {
        return Err(format!("set!: no variable in {}", pool.display(exp)));
    }
    if !pool.is_symbol(pool.car(pool.cdr(assignment))) {
        return Err(format!(
            "set!: variable is not a symbol in {}",
            pool.display(exp)
        ));
    }
    match len {
        2 => Err(format!("set!: no value in {}", pool.display(exp))),
        3 => Ok(()),
        _ => Err(format!("set!: more than two items in {}", pool.display(exp))),
    }
}

pub fn get_assignment_variable(pool: &Pool, exp: ValueRef) -> ValueRef {
    // x from (set! x 10)
    pool.car(pool.cdr(exp))
}

pub fn get_assignment_value(pool: &Pool, exp: ValueRef) -> ValueRef {
    // 10 from (set! x 10)
    pool.car(pool.cdr(pool.cdr(exp)))
}

// define

pub fn check_definition(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (define x 10)
    // (define (f x y) (+ x y) x)
    let Some(definition) = to_list(pool, exp) else {
        return Err(format!(
            "define: non-list structure in {}",
            pool.display(exp)
        ));
    };
    let len = pool.list_len(definition);
    if len < 2 {
        return Err(format!("define: no variable in {}", pool.display(exp)));
    }
    let subject = pool.car(pool.cdr(definition));
    match pool.get(subject) {
        Value::Pair { car, .. } => {
            if len < 3 {
                Err(format!("define: no body in {}", pool.display(exp)))
            } else if !pool.is_symbol(*car) {
                Err(format!(
                    "define: the function name is not a symbol in {}",
                    pool.display(exp)
                ))
            } else {
                Ok(())
            }
        }
        Value::Symbol(_) => match len {
            2 => Err(format!("define: no value in {}", pool.display(exp))),
            3 => Ok(()),
            _ => Err(format!(
                "define: the value can't be more than one item in {}",
                pool.display(exp)
            )),
        },
        _ => Err(format!(
            "define: either variable or function must be defined in {}",
            pool.display(exp)
        )),
    }
}

pub fn get_definition_variable(pool: &Pool, exp: ValueRef) -> ValueRef {
    let subject = pool.car(pool.cdr(exp));
    if pool.is_symbol(subject) {
        // x from (define x 10)
        subject
    } else {
        // f from (define (f x y) (+ x y) x)
        pool.car(subject)
    }
}

pub fn get_definition_value(pool: &mut Pool, exp: ValueRef) -> ValueRef {
    let subject = pool.car(pool.cdr(exp));
    if pool.is_symbol(subject) {
        // 10 from (define x 10)
        pool.car(pool.cdr(pool.cdr(exp)))
    } else {
        // (lambda (x y) (+ x y) x) from (define (f x y) (+ x y) x)
        let params = pool.cdr(subject);
        let body = pool.cdr(pool.cdr(exp));
        make_lambda(pool, params, body)
    }
}

// if

pub fn check_if(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (if x 1) or (if x 1 2)
    let Some(if_) = to_list(pool, exp) else {
        return Err(format!("if: non-list structure in {}", pool.display(exp)));
    };
    match pool.list_len(if_) {
        1 => Err(format!("if: no predicate in {}", pool.display(exp))),
        2 => Err(format!("if: no consequent in {}", pool.display(exp))),
        3 | 4 => Ok(()),
        _ => Err(format!("if: too many items in {}", pool.display(exp))),
    }
}

pub fn get_if_predicate(pool: &Pool, exp: ValueRef) -> ValueRef {
    // x from (if x 1 2) or (if x 1)
    pool.car(pool.cdr(exp))
}

pub fn get_if_consequent(pool: &Pool, exp: ValueRef) -> ValueRef {
    // 1 from (if x 1 2) or (if x 1)
    pool.car(pool.cdr(pool.cdr(exp)))
}

pub fn get_if_alternative(pool: &mut Pool, exp: ValueRef) -> ValueRef {
    let rest = pool.cdr(pool.cdr(pool.cdr(exp)));
    if pool.is_pair(rest) {
        // 2 from (if x 1 2)
        pool.car(rest)
    } else {
        // no alternative: false from (if x 1)
        pool.boolean(false)
    }
}

pub fn make_if(
    pool: &mut Pool,
    predicate: ValueRef,
    consequent: ValueRef,
    alternative: ValueRef,
) -> ValueRef {
    let head = pool.symbol("if");
    pool.list(&[head, predicate, consequent, alternative])
}

// lambda

pub fn check_lambda(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (lambda (p1 p2 ...) e1 e2 ...), params may be a symbol or dotted
    let Some(lambda) = to_list(pool, exp) else {
        return Err(format!(
            "lambda: non-list structure in {}",
            pool.display(exp)
        ));
    };
    let len = pool.list_len(lambda);
    if len < 2 {
        return Err(format!("lambda: no parameters in {}", pool.display(exp)));
    }
    if len < 3 {
        return Err(format!("lambda: no body in {}", pool.display(exp)));
    }

    let params = pool.car(pool.cdr(lambda));
    match pool.get(params) {
        // a single symbol takes the whole argument list
        Value::Symbol(_) => Ok(()),
        Value::Nil => Ok(()),
        Value::Pair { .. } => {
            let mut seen: HashSet<String> = HashSet::new();
            let mut cur = params;
            loop {
                let param = match pool.get(cur) {
                    Value::Pair { car, .. } => *car,
                    // dotted tail: the rest parameter
                    Value::Symbol(_) => cur,
                    Value::Nil => break,
                    _ => {
                        return Err(format!(
                            "lambda: some parameters are not symbols in {}",
                            pool.display(exp)
                        ));
                    }
                };
                let Some(name) = pool.symbol_name(param) else {
                    return Err(format!(
                        "lambda: some parameters are not symbols in {}",
                        pool.display(exp)
                    ));
                };
                if !seen.insert(name.to_string()) {
                    return Err(format!(
                        "lambda: duplicate parameter names in {}",
                        pool.display(exp)
                    ));
                }
                if pool.is_pair(cur) {
                    cur = pool.cdr(cur);
                } else {
                    break;
                }
            }
            Ok(())
        }
        _ => Err(format!(
            "lambda: some parameters are not symbols in {}",
            pool.display(exp)
        )),
    }
}

pub fn get_lambda_parameters(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (x y) from (lambda (x y) (+ x y) x)
    pool.car(pool.cdr(exp))
}

pub fn get_lambda_body(pool: &Pool, exp: ValueRef) -> ValueRef {
    // ((+ x y) x) from (lambda (x y) (+ x y) x)
    pool.cdr(pool.cdr(exp))
}

pub fn make_lambda(pool: &mut Pool, params: ValueRef, body: ValueRef) -> ValueRef {
    // params = (x y), body = ((+ x y) x) -> (lambda (x y) (+ x y) x)
    let head = pool.symbol("lambda");
    let tail = pool.pair(params, body);
    pool.pair(head, tail)
}

// let

pub fn check_let(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (let ((x 1) (y 2)) (+ x y) x)
    let Some(let_) = to_list(pool, exp) else {
        return Err(format!("let: non-list structure in {}", pool.display(exp)));
    };
    let len = pool.list_len(let_);
    if len < 2 {
        return Err(format!("let: no variables in {}", pool.display(exp)));
    }
    if len < 3 {
        return Err(format!("let: no body in {}", pool.display(exp)));
    }

    let variables = pool.car(pool.cdr(let_));
    if pool.is_nil(variables) {
        return Err(format!("let: no variable name in {}", pool.display(exp)));
    }
    let Some(variables) = to_list(pool, variables) else {
        return Err(format!("let: non-list variables in {}", pool.display(exp)));
    };
    for variable in pool.list_items(variables) {
        let Some(binding) = to_list(pool, variable) else {
            return Err(format!(
                "let: non-list variable pair in {}",
                pool.display(exp)
            ));
        };
        if !pool.is_symbol(pool.car(binding)) {
            return Err(format!(
                "let: variable name must be a symbol in {}",
                pool.display(exp)
            ));
        }
        match pool.list_len(binding) {
            1 => {
                return Err(format!("let: no variable value in {}", pool.display(exp)));
            }
            2 => {}
            _ => {
                return Err(format!(
                    "let: too many items in a variable pair in {}",
                    pool.display(exp)
                ));
            }
        }
    }
    Ok(())
}

pub fn transform_let(pool: &mut Pool, exp: ValueRef) -> ValueRef {
    // (let ((x 1) (y 2)) (+ x y) x) -> ((lambda (x y) (+ x y) x) 1 2)
    let bindings = pool.list_items(pool.car(pool.cdr(exp)));
    let body = pool.cdr(pool.cdr(exp));

    let mut params = Vec::with_capacity(bindings.len());
    let mut args = Vec::with_capacity(bindings.len());
    for binding in bindings {
        params.push(pool.car(binding));
        args.push(pool.car(pool.cdr(binding)));
    }

    let params = pool.list(&params);
    let lambda = make_lambda(pool, params, body);
    let mut result = pool.list(&args);
    result = pool.pair(lambda, result);
    result
}

// begin and sequences

pub fn check_begin(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (begin e1 e2 ...)
    let Some(begin) = to_list(pool, exp) else {
        return Err(format!("begin: non-list structure in {}", pool.display(exp)));
    };
    if pool.list_len(begin) < 2 {
        return Err(format!("begin: no expressions in {}", pool.display(exp)));
    }
    Ok(())
}

pub fn get_begin_actions(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (e1 e2 ...) from (begin e1 e2 ...)
    pool.cdr(exp)
}

pub fn transform_sequence(pool: &mut Pool, seq: ValueRef) -> ValueRef {
    if pool.is_nil(seq) {
        // () -> ()
        return seq;
    }
    if pool.is_nil(pool.cdr(seq)) {
        // (e) -> e
        return pool.car(seq);
    }
    // (e1 e2 ...) -> (begin e1 e2 ...)
    let head = pool.symbol("begin");
    pool.pair(head, seq)
}

// cond

fn is_else_clause(pool: &Pool, clause: ValueRef) -> bool {
    pool.is_pair(clause) && pool.symbol_name(pool.car(clause)) == Some("else")
}

pub fn check_cond(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (cond (p1 e11 ...) (p2 e21 ...) ... (else ee1 ...))
    let Some(cond) = to_list(pool, exp) else {
        return Err(format!("cond: non-list structure in {}", pool.display(exp)));
    };
    if pool.list_len(cond) < 2 {
        return Err(format!("cond: no clauses in {}", pool.display(exp)));
    }
    let mut else_clause_seen = false;
    for clause in pool.list_items(pool.cdr(cond)) {
        if else_clause_seen {
            return Err(format!(
                "cond: else clause must be the last in {}",
                pool.display(exp)
            ));
        }
        if pool.is_nil(clause) {
            return Err(format!("cond: empty clause in {}", pool.display(exp)));
        }
        let Some(clause) = to_list(pool, clause) else {
            return Err(format!("cond: non-list clause in {}", pool.display(exp)));
        };
        if pool.list_len(clause) < 2 {
            return Err(format!(
                "cond: clause without consequent in {}",
                pool.display(exp)
            ));
        }
        if is_else_clause(pool, clause) {
            else_clause_seen = true;
        }
    }
    Ok(())
}

pub fn transform_cond(pool: &mut Pool, exp: ValueRef) -> ValueRef {
    // (cond (p1 e1) (p2 e21 e22) (else ee)) ->
    //   (if p1 e1 (if p2 (begin e21 e22) ee))
    // without an else clause the innermost alternative is false
    transform_cond_clauses(pool, pool.cdr(exp))
}

fn transform_cond_clauses(pool: &mut Pool, clauses: ValueRef) -> ValueRef {
    if pool.is_nil(clauses) {
        return pool.boolean(false);
    }
    let first = pool.car(clauses);
    let rest = pool.cdr(clauses);
    let actions = pool.cdr(first);
    if is_else_clause(pool, first) {
        transform_sequence(pool, actions)
    } else {
        let predicate = pool.car(first);
        let consequent = transform_sequence(pool, actions);
        let alternative = transform_cond_clauses(pool, rest);
        make_if(pool, predicate, consequent, alternative)
    }
}

// and / or

pub fn check_and(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    if to_list(pool, exp).is_none() {
        return Err(format!("and: non-list structure in {}", pool.display(exp)));
    }
    Ok(())
}

pub fn get_and_expressions(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (...) from (and ...)
    pool.cdr(exp)
}

pub fn check_or(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    if to_list(pool, exp).is_none() {
        return Err(format!("or: non-list structure in {}", pool.display(exp)));
    }
    Ok(())
}

pub fn get_or_expressions(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (...) from (or ...)
    pool.cdr(exp)
}

// eval / apply

pub fn check_eval(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (eval e)
    let Some(eval) = to_list(pool, exp) else {
        return Err(format!("eval: non-list structure in {}", pool.display(exp)));
    };
    match pool.list_len(eval) {
        1 => Err(format!("eval: no expression in {}", pool.display(exp))),
        2 => Ok(()),
        _ => Err(format!("eval: too many items in {}", pool.display(exp))),
    }
}

pub fn get_eval_expression(pool: &Pool, exp: ValueRef) -> ValueRef {
    // e from (eval e)
    pool.car(pool.cdr(exp))
}

pub fn check_apply(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (apply f (a1 a2 ...))
    let Some(apply) = to_list(pool, exp) else {
        return Err(format!("apply: non-list structure in {}", pool.display(exp)));
    };
    match pool.list_len(apply) {
        1 => Err(format!("apply: no operator in {}", pool.display(exp))),
        2 => Err(format!("apply: no arguments in {}", pool.display(exp))),
        3 => Ok(()),
        _ => Err(format!("apply: too many items in {}", pool.display(exp))),
    }
}

pub fn get_apply_operator(pool: &Pool, exp: ValueRef) -> ValueRef {
    // f from (apply f (a1 a2 ...))
    pool.car(pool.cdr(exp))
}

pub fn get_apply_arguments(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (a1 a2 ...) from (apply f (a1 a2 ...))
    pool.car(pool.cdr(pool.cdr(exp)))
}

pub fn check_apply_arguments(pool: &Pool, args: ValueRef) -> Result<(), String> {
    if !pool.is_list(args) {
        return Err(format!("apply: can't apply to {}", pool.display(args)));
    }
    Ok(())
}

// applications

pub fn check_application(pool: &Pool, exp: ValueRef) -> Result<(), String> {
    // (f ...) with any f
    if pool.is_nil(exp) {
        return Err(format!("bad application {}", pool.display(exp)));
    }
    if to_list(pool, exp).is_none() {
        return Err(format!("can't apply to {}", pool.display(exp)));
    }
    Ok(())
}

pub fn get_operator(pool: &Pool, exp: ValueRef) -> ValueRef {
    // f from (f x y z)
    pool.car(exp)
}

pub fn get_operands(pool: &Pool, exp: ValueRef) -> ValueRef {
    // (x y z) from (f x y z)
    pool.cdr(exp)
}

// sequence / operand walkers

pub fn has_no_exps(pool: &Pool, seq: ValueRef) -> bool {
    pool.is_nil(seq)
}

pub fn is_last_exp(pool: &Pool, seq: ValueRef) -> bool {
    pool.is_nil(pool.cdr(seq))
}

pub fn get_first_exp(pool: &Pool, seq: ValueRef) -> ValueRef {
    pool.car(seq)
}

pub fn get_rest_exps(pool: &Pool, seq: ValueRef) -> ValueRef {
    pool.cdr(seq)
}

pub fn has_no_operands(pool: &Pool, operands: ValueRef) -> bool {
    pool.is_nil(operands)
}

pub fn is_last_operand(pool: &Pool, operands: ValueRef) -> bool {
    pool.is_nil(pool.cdr(operands))
}

pub fn get_first_operand(pool: &Pool, operands: ValueRef) -> ValueRef {
    pool.car(operands)
}

pub fn get_rest_operands(pool: &Pool, operands: ValueRef) -> ValueRef {
    pool.cdr(operands)
}

pub fn make_empty_arglist() -> ValueRef {
    NIL
}

/// Append `arg` to the end of `arg_list` (in place when non-empty).
pub fn adjoin_arg(pool: &mut Pool, arg: ValueRef, arg_list: ValueRef) -> ValueRef {
    let new_arg = pool.pair(arg, NIL);
    if pool.is_nil(arg_list) {
        return new_arg;
    }
    let mut last = arg_list;
    while !pool.is_nil(pool.cdr(last)) {
        last = pool.cdr(last);
    }
    pool.set_cdr(last, new_arg);
    arg_list
}

// procedures

pub fn is_primitive_procedure(pool: &Pool, proc: ValueRef) -> bool {
    matches!(pool.get(proc), Value::Primitive { .. })
}

pub fn is_compound_procedure(pool: &Pool, proc: ValueRef) -> bool {
    matches!(pool.get(proc), Value::Compound { .. })
}

pub fn is_compiled_procedure(pool: &Pool, proc: ValueRef) -> bool {
    matches!(pool.get(proc), Value::Compiled { .. })
}

pub fn get_compound_parameters(pool: &Pool, proc: ValueRef) -> ValueRef {
    match pool.get(proc) {
        Value::Compound { params, .. } => *params,
        other => panic!("parameters of a non-compound: {}", other.type_name()),
    }
}

pub fn get_compound_body(pool: &Pool, proc: ValueRef) -> ValueRef {
    match pool.get(proc) {
        Value::Compound { body, .. } => *body,
        other => panic!("body of a non-compound: {}", other.type_name()),
    }
}

pub fn get_compound_environment(pool: &Pool, proc: ValueRef) -> ValueRef {
    match pool.get(proc) {
        Value::Compound { env, .. } => *env,
        other => panic!("environment of a non-compound: {}", other.type_name()),
    }
}

pub fn make_compound_procedure(
    pool: &mut Pool,
    params: ValueRef,
    body: ValueRef,
    env: ValueRef,
) -> ValueRef {
    pool.compound(params, body, env)
}

pub fn get_compiled_entry(pool: &Pool, proc: ValueRef) -> ValueRef {
    match pool.get(proc) {
        Value::Compiled { entry, .. } => *entry,
        other => panic!("entry of a non-compiled: {}", other.type_name()),
    }
}

pub fn get_compiled_environment(pool: &Pool, proc: ValueRef) -> ValueRef {
    match pool.get(proc) {
        Value::Compiled { env, .. } => *env,
        other => panic!("environment of a non-compiled: {}", other.type_name()),
    }
}

pub fn make_compiled_procedure(pool: &mut Pool, entry: ValueRef, env: ValueRef) -> ValueRef {
    pool.compiled(entry, env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_str;

    fn parse_one(pool: &mut Pool, input: &str) -> ValueRef {
        let forms = parse_str(pool, input).unwrap();
        pool.car(forms)
    }

    #[test]
    fn test_recognizers() {
        let mut p = Pool::new();
        let v = parse_one(&mut p, "10");
        assert!(is_self_evaluating(&p, v));
        let v = parse_one(&mut p, "x");
        assert!(is_variable(&p, v));
        let v = parse_one(&mut p, "'x");
        assert!(is_quoted(&p, v));
        let v = parse_one(&mut p, "(if a b c)");
        assert!(is_if(&p, v));
        let v = parse_one(&mut p, "(f 1 2)");
        assert!(is_application(&p, v) && !is_if(&p, v));
    }

    #[test]
    fn test_check_quoted() {
        let mut p = Pool::new();
        let good = parse_one(&mut p, "'x");
        assert!(check_quoted(&p, good).is_ok());
        let bad = parse_one(&mut p, "(quote)");
        assert_eq!(
            check_quoted(&p, bad).unwrap_err(),
            "quote: no expression in (quote)"
        );
        let bad = parse_one(&mut p, "(quote a b)");
        assert_eq!(
            check_quoted(&p, bad).unwrap_err(),
            "quote: more than one item in (quote a b)"
        );
    }

    #[test]
    fn test_check_if_and_alternative_default() {
        let mut p = Pool::new();
        let two_armed = parse_one(&mut p, "(if p c)");
        assert!(check_if(&p, two_armed).is_ok());
        let alt = get_if_alternative(&mut p, two_armed);
        assert_eq!(p.display(alt), "false");

        let bad = parse_one(&mut p, "(if)");
        assert_eq!(check_if(&p, bad).unwrap_err(), "if: no predicate in (if)");
    }

    #[test]
    fn test_check_lambda_duplicates_and_variadics() {
        let mut p = Pool::new();
        let ok = parse_one(&mut p, "(lambda (x y) x)");
        assert!(check_lambda(&p, ok).is_ok());
        let variadic = parse_one(&mut p, "(lambda args args)");
        assert!(check_lambda(&p, variadic).is_ok());
        let dotted = parse_one(&mut p, "(lambda (x . rest) rest)");
        assert!(check_lambda(&p, dotted).is_ok());

        let dup = parse_one(&mut p, "(lambda (x x) x)");
        assert!(
            check_lambda(&p, dup)
                .unwrap_err()
                .contains("duplicate parameter names")
        );
        let bad = parse_one(&mut p, "(lambda (x 1) x)");
        assert!(
            check_lambda(&p, bad)
                .unwrap_err()
                .contains("parameters are not symbols")
        );
    }

    #[test]
    fn test_function_define_desugars_to_lambda() {
        let mut p = Pool::new();
        let def = parse_one(&mut p, "(define (f x y) (+ x y) x)");
        assert!(check_definition(&p, def).is_ok());
        let var = get_definition_variable(&p, def);
        assert_eq!(p.display(var), "f");
        let value = get_definition_value(&mut p, def);
        assert_eq!(p.display(value), "(lambda (x y) (+ x y) x)");
    }

    #[test]
    fn test_transform_let() {
        let mut p = Pool::new();
        let let_ = parse_one(&mut p, "(let ((x 10) (y 20)) (+ x y))");
        assert!(check_let(&p, let_).is_ok());
        let app = transform_let(&mut p, let_);
        assert_eq!(p.display(app), "((lambda (x y) (+ x y)) 10 20)");
    }

    #[test]
    fn test_check_let_errors() {
        let mut p = Pool::new();
        let bad = parse_one(&mut p, "(let ((x)) x)");
        assert!(check_let(&p, bad).unwrap_err().contains("no variable value"));
        let bad = parse_one(&mut p, "(let ((1 2)) x)");
        assert!(check_let(&p, bad).unwrap_err().contains("must be a symbol"));
        let bad = parse_one(&mut p, "(let () x)");
        assert!(check_let(&p, bad).unwrap_err().contains("no variable name"));
    }

    #[test]
    fn test_transform_cond() {
        let mut p = Pool::new();
        let cond = parse_one(&mut p, "(cond ((= 1 2) 'a) ((= 2 2) 'b) (else 'c))");
        assert!(check_cond(&p, cond).is_ok());
        let if_ = transform_cond(&mut p, cond);
        assert_eq!(p.display(if_), "(if (= 1 2) 'a (if (= 2 2) 'b 'c))");

        let no_else = parse_one(&mut p, "(cond ((= 1 2) 'a))");
        let if_ = transform_cond(&mut p, no_else);
        assert_eq!(p.display(if_), "(if (= 1 2) 'a false)");
    }

    #[test]
    fn test_check_cond_else_placement() {
        let mut p = Pool::new();
        let bad = parse_one(&mut p, "(cond (else 1) (a 2))");
        assert!(
            check_cond(&p, bad)
                .unwrap_err()
                .contains("else clause must be the last")
        );
    }

    #[test]
    fn test_transform_sequence() {
        let mut p = Pool::new();
        let seq = parse_one(&mut p, "(a b)");
        let begin = transform_sequence(&mut p, seq);
        assert_eq!(p.display(begin), "(begin a b)");

        let single = parse_one(&mut p, "(a)");
        let exp = transform_sequence(&mut p, single);
        assert_eq!(p.display(exp), "a");

        let v = transform_sequence(&mut p, NIL);
        assert_eq!(p.display(v), "()");
    }

    #[test]
    fn test_adjoin_arg_appends() {
        let mut p = Pool::new();
        let one = p.number(1.0);
        let lst = adjoin_arg(&mut p, one, NIL);
        let two = p.number(2.0);
        let lst = adjoin_arg(&mut p, two, lst);
        assert_eq!(p.display(lst), "(1 2)");
    }

    #[test]
    fn test_procedure_accessors() {
        let mut p = Pool::new();
        let params = parse_one(&mut p, "(x)");
        let body = parse_one(&mut p, "(x)");
        let env = p.environment();
        let proc = make_compound_procedure(&mut p, params, body, env);
        assert!(is_compound_procedure(&p, proc));
        assert!(!is_primitive_procedure(&p, proc));
        assert_eq!(get_compound_parameters(&p, proc), params);
        assert_eq!(get_compound_body(&p, proc), body);
        assert_eq!(get_compound_environment(&p, proc), env);
    }
}
