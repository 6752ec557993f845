//! Host primitive procedures
//!
//! The procedures reachable from user code: list structure, arithmetic,
//! comparisons, predicates, I/O, and the runtime hooks (`collect`, RNG,
//! `time`, `pretty`). Each receives its arguments as a list value and
//! answers a value; a returned `Err` (or an Error value) halts the calling
//! machine run. [`install_primitives`] binds the whole set into an
//! environment, so user `define` may shadow any of them.
//!
//! The `compile` and `code` primitives live with the compiler crate, which
//! registers them alongside this set.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rasp_core::env;
use rasp_core::machine::Machine;
use rasp_core::pool::Pool;
use rasp_core::value::{NIL, OpResult, PrimitiveFn, Value, ValueRef};

use crate::format::format_message;
use crate::pretty::pretty_str;

// argument helpers

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

pub fn expect_args(pool: &Pool, args: ValueRef, expected: usize) -> Result<(), String> {
    let got = pool.list_len(args);
    if got != expected {
        return Err(format!(
            "expects {} arg{}, but got {}",
            expected,
            plural(expected),
            got
        ));
    }
    Ok(())
}

pub fn expect_min_args(pool: &Pool, args: ValueRef, expected: usize) -> Result<(), String> {
    let got = pool.list_len(args);
    if got < expected {
        return Err(format!(
            "expects at least {} arg{}, but got {}",
            expected,
            plural(expected),
            got
        ));
    }
    Ok(())
}

pub fn expect_max_args(pool: &Pool, args: ValueRef, expected: usize) -> Result<(), String> {
    let got = pool.list_len(args);
    if got > expected {
        return Err(format!(
            "expects at most {} arg{}, but got {}",
            expected,
            plural(expected),
            got
        ));
    }
    Ok(())
}

/// The i-th argument; callers check the count first.
pub fn arg(pool: &Pool, args: ValueRef, index: usize) -> ValueRef {
    let mut cur = args;
    for _ in 0..index {
        cur = pool.cdr(cur);
    }
    pool.car(cur)
}

fn type_mismatch(pool: &Pool, v: ValueRef, index: usize, expected: &str) -> String {
    if pool.is_nil(v) {
        format!("arg #{index} must be {expected}, but got ()")
    } else {
        format!(
            "arg #{index} must be {expected}, but is {} {}",
            pool.get(v).type_name(),
            pool.display(v)
        )
    }
}

pub fn number_arg(pool: &Pool, args: ValueRef, index: usize) -> Result<f64, String> {
    let v = arg(pool, args, index);
    match pool.get(v) {
        Value::Number(n) => Ok(*n),
        _ => Err(type_mismatch(pool, v, index, "number")),
    }
}

fn pair_arg(pool: &Pool, args: ValueRef, index: usize) -> Result<ValueRef, String> {
    let v = arg(pool, args, index);
    if pool.is_pair(v) {
        Ok(v)
    } else {
        Err(type_mismatch(pool, v, index, "pair"))
    }
}

pub fn string_arg(pool: &Pool, args: ValueRef, index: usize) -> Result<String, String> {
    let v = arg(pool, args, index);
    match pool.get(v) {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(type_mismatch(pool, v, index, "string")),
    }
}

/// All arguments as numbers, with a per-position mismatch message.
fn number_args(pool: &Pool, args: ValueRef) -> Result<Vec<f64>, String> {
    let mut numbers = Vec::new();
    let mut cur = args;
    let mut index = 0;
    while let Value::Pair { car, cdr } = pool.get(cur) {
        match pool.get(*car) {
            Value::Number(n) => numbers.push(*n),
            _ => return Err(type_mismatch(pool, *car, index, "number")),
        }
        index += 1;
        cur = *cdr;
    }
    Ok(numbers)
}

// structural

fn prim_car(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let pair = pair_arg(&m.pool, args, 0)?;
    Ok(m.pool.car(pair))
}

fn prim_cdr(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let pair = pair_arg(&m.pool, args, 0)?;
    Ok(m.pool.cdr(pair))
}

fn prim_cons(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let first = arg(&m.pool, args, 0);
    let second = arg(&m.pool, args, 1);
    Ok(m.pool.pair(first, second))
}

fn prim_list(m: &mut Machine, args: ValueRef) -> OpResult {
    let items = m.pool.list_items(args);
    Ok(m.pool.list(&items))
}

fn prim_set_car(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let pair = pair_arg(&m.pool, args, 0)?;
    let v = arg(&m.pool, args, 1);
    m.pool.set_car(pair, v);
    Ok(NIL)
}

fn prim_set_cdr(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let pair = pair_arg(&m.pool, args, 0)?;
    let v = arg(&m.pool, args, 1);
    m.pool.set_cdr(pair, v);
    Ok(NIL)
}

// arithmetic

fn prim_add(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let numbers = number_args(&m.pool, args)?;
    Ok(m.pool.number(numbers.iter().sum()))
}

fn prim_sub(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let numbers = number_args(&m.pool, args)?;
    let result = if numbers.len() == 1 {
        -numbers[0]
    } else {
        numbers[1..].iter().fold(numbers[0], |acc, n| acc - n)
    };
    Ok(m.pool.number(result))
}

fn prim_mul(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 2)?;
    let numbers = number_args(&m.pool, args)?;
    Ok(m.pool.number(numbers.iter().product()))
}

fn prim_div(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 2)?;
    let numbers = number_args(&m.pool, args)?;
    let mut result = numbers[0];
    for n in &numbers[1..] {
        if *n == 0.0 {
            return Err("division by zero".to_string());
        }
        result /= n;
    }
    Ok(m.pool.number(result))
}

fn prim_remainder(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 2)?;
    let numbers = number_args(&m.pool, args)?;
    let mut result = numbers[0];
    for n in &numbers[1..] {
        if *n == 0.0 {
            return Err("division by zero".to_string());
        }
        result %= n;
    }
    Ok(m.pool.number(result))
}

fn prim_expt(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 2)?;
    let numbers = number_args(&m.pool, args)?;
    let result = numbers[1..]
        .iter()
        .fold(numbers[0], |acc, n| acc.powf(*n));
    Ok(m.pool.number(result))
}

fn prim_min(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let numbers = number_args(&m.pool, args)?;
    let result = numbers[1..].iter().fold(numbers[0], |acc, n| acc.min(*n));
    Ok(m.pool.number(result))
}

fn prim_max(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let numbers = number_args(&m.pool, args)?;
    let result = numbers[1..].iter().fold(numbers[0], |acc, n| acc.max(*n));
    Ok(m.pool.number(result))
}

// math

fn prim_abs(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.abs()))
}

fn prim_exp(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.exp()))
}

fn prim_log(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    if n <= 0.0 {
        return Err("can't take log of a non-positive number".to_string());
    }
    Ok(m.pool.number(n.ln()))
}

fn prim_sin(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.sin()))
}

fn prim_cos(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.cos()))
}

fn prim_tan(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.tan()))
}

fn prim_atan(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.atan()))
}

fn prim_atan2(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let y = number_arg(&m.pool, args, 0)?;
    let x = number_arg(&m.pool, args, 1)?;
    Ok(m.pool.number(y.atan2(x)))
}

fn prim_round(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.round()))
}

fn prim_floor(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.floor()))
}

fn prim_ceiling(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    Ok(m.pool.number(n.ceil()))
}

// relational

fn chain_compare(
    m: &mut Machine,
    args: ValueRef,
    keep: fn(f64, f64) -> bool,
) -> OpResult {
    expect_min_args(&m.pool, args, 2)?;
    let numbers = number_args(&m.pool, args)?;
    let holds = numbers.windows(2).all(|w| keep(w[0], w[1]));
    Ok(m.pool.boolean(holds))
}

fn prim_eq(m: &mut Machine, args: ValueRef) -> OpResult {
    chain_compare(m, args, |a, b| a == b)
}

fn prim_lt(m: &mut Machine, args: ValueRef) -> OpResult {
    chain_compare(m, args, |a, b| a < b)
}

fn prim_lte(m: &mut Machine, args: ValueRef) -> OpResult {
    chain_compare(m, args, |a, b| a <= b)
}

fn prim_gt(m: &mut Machine, args: ValueRef) -> OpResult {
    chain_compare(m, args, |a, b| a > b)
}

fn prim_gte(m: &mut Machine, args: ValueRef) -> OpResult {
    chain_compare(m, args, |a, b| a >= b)
}

fn prim_not(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let v = arg(&m.pool, args, 0);
    let truth = !m.pool.is_truthy(v);
    Ok(m.pool.boolean(truth))
}

// predicates

fn type_predicate(m: &mut Machine, args: ValueRef, test: fn(&Value) -> bool) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let v = arg(&m.pool, args, 0);
    let truth = test(m.pool.get(v));
    Ok(m.pool.boolean(truth))
}

fn prim_number_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Number(_)))
}

fn prim_symbol_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Symbol(_)))
}

fn prim_string_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Str(_)))
}

fn prim_bool_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Bool(_)))
}

fn prim_pair_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Pair { .. }))
}

fn prim_list_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let v = arg(&m.pool, args, 0);
    let truth = m.pool.is_list(v);
    Ok(m.pool.boolean(truth))
}

fn prim_null_q(m: &mut Machine, args: ValueRef) -> OpResult {
    type_predicate(m, args, |v| matches!(v, Value::Nil))
}

fn prim_true_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let v = arg(&m.pool, args, 0);
    let truth = m.pool.is_truthy(v);
    Ok(m.pool.boolean(truth))
}

fn prim_false_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let v = arg(&m.pool, args, 0);
    let truth = !m.pool.is_truthy(v);
    Ok(m.pool.boolean(truth))
}

fn prim_equal_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let a = arg(&m.pool, args, 0);
    let b = arg(&m.pool, args, 1);
    let truth = m.pool.equal(a, b);
    Ok(m.pool.boolean(truth))
}

fn prim_eq_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 2)?;
    let a = arg(&m.pool, args, 0);
    let b = arg(&m.pool, args, 1);
    Ok(m.pool.boolean(a == b))
}

fn prim_even_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    let truth = n.fract() == 0.0 && (n as i64) % 2 == 0;
    Ok(m.pool.boolean(truth))
}

fn prim_odd_q(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 1)?;
    let n = number_arg(&m.pool, args, 0)?;
    let truth = n.fract() == 0.0 && (n as i64) % 2 != 0;
    Ok(m.pool.boolean(truth))
}

// I/O and diagnostics

fn prim_error(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let fmt = string_arg(&m.pool, args, 0)?;
    let rest = m.pool.cdr(args);
    let message = format_message(&m.pool, &fmt, rest);
    Ok(m.pool.error(message))
}

fn prim_info(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let fmt = string_arg(&m.pool, args, 0)?;
    let rest = m.pool.cdr(args);
    let message = format_message(&m.pool, &fmt, rest);
    Ok(m.pool.info(message))
}

fn prim_display(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    let items = m.pool.list_items(args);
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            print!(" ");
        }
        // symbols and strings print raw, everything else canonically
        match m.pool.get(*v) {
            Value::Symbol(s) | Value::Str(s) => print!("{s}"),
            _ => print!("{}", m.pool.display(*v)),
        }
    }
    Ok(NIL)
}

fn prim_newline(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 0)?;
    println!();
    Ok(NIL)
}

// runtime hooks

fn prim_collect(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 0)?;
    let (before, after) = m.pool.collect();
    let collected = before - after;
    let percentage = if before > 0 {
        collected as f64 / before as f64 * 100.0
    } else {
        0.0
    };
    Ok(m.pool.info(format!(
        "{collected} ({percentage:.2}%) from {before} collected"
    )))
}

fn prim_time(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_args(&m.pool, args, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("system clock error: {e}"))?;
    Ok(m.pool.number(now.as_secs_f64()))
}

fn prim_pretty(m: &mut Machine, args: ValueRef) -> OpResult {
    expect_min_args(&m.pool, args, 1)?;
    expect_max_args(&m.pool, args, 2)?;
    let v = arg(&m.pool, args, 0);
    let width = if m.pool.list_len(args) > 1 {
        number_arg(&m.pool, args, 1)? as usize
    } else {
        80
    };
    let rendered = pretty_str(&m.pool, v, width);
    Ok(m.pool.symbol(rendered))
}

/// Bind the primitive set into `env` (in the machine's pool).
pub fn install_primitives(machine: &mut Machine, env: ValueRef) {
    let plain: &[(&str, fn(&mut Machine, ValueRef) -> OpResult)] = &[
        // structural
        ("car", prim_car),
        ("cdr", prim_cdr),
        ("cons", prim_cons),
        ("list", prim_list),
        ("set-car!", prim_set_car),
        ("set-cdr!", prim_set_cdr),
        // arithmetic
        ("+", prim_add),
        ("-", prim_sub),
        ("*", prim_mul),
        ("/", prim_div),
        ("remainder", prim_remainder),
        ("expt", prim_expt),
        ("min", prim_min),
        ("max", prim_max),
        // math
        ("abs", prim_abs),
        ("exp", prim_exp),
        ("log", prim_log),
        ("sin", prim_sin),
        ("cos", prim_cos),
        ("tan", prim_tan),
        ("atan", prim_atan),
        ("atan2", prim_atan2),
        ("round", prim_round),
        ("floor", prim_floor),
        ("ceiling", prim_ceiling),
        // relational
        ("=", prim_eq),
        ("<", prim_lt),
        ("<=", prim_lte),
        (">", prim_gt),
        (">=", prim_gte),
        ("not", prim_not),
        // predicates
        ("number?", prim_number_q),
        ("symbol?", prim_symbol_q),
        ("string?", prim_string_q),
        ("bool?", prim_bool_q),
        ("pair?", prim_pair_q),
        ("list?", prim_list_q),
        ("null?", prim_null_q),
        ("true?", prim_true_q),
        ("false?", prim_false_q),
        ("equal?", prim_equal_q),
        ("eq?", prim_eq_q),
        ("even?", prim_even_q),
        ("odd?", prim_odd_q),
        // other
        ("error", prim_error),
        ("info", prim_info),
        ("display", prim_display),
        ("newline", prim_newline),
        ("collect", prim_collect),
        ("time", prim_time),
        ("pretty", prim_pretty),
    ];

    for (name, f) in plain {
        let prim: PrimitiveFn = Rc::new(*f);
        let v = machine.pool.primitive(*name, prim);
        env::define(&mut machine.pool, env, name, v);
    }

    // srand/random share one RNG, threaded through the closures instead of
    // a process-wide static
    let rng = Rc::new(RefCell::new(StdRng::from_entropy()));

    let seeded = rng.clone();
    let srand: PrimitiveFn = Rc::new(move |m: &mut Machine, args: ValueRef| {
        expect_args(&m.pool, args, 1)?;
        let seed = number_arg(&m.pool, args, 0)?;
        *seeded.borrow_mut() = StdRng::seed_from_u64(seed as u64);
        Ok(m.pool.info("RNG was seeded"))
    });
    let v = machine.pool.primitive("srand", srand);
    env::define(&mut machine.pool, env, "srand", v);

    let random: PrimitiveFn = Rc::new(move |m: &mut Machine, args: ValueRef| {
        expect_args(&m.pool, args, 1)?;
        let upper = number_arg(&m.pool, args, 0)? as i64;
        if upper <= 0 {
            return Err("expects a positive upper bound".to_string());
        }
        let n = rng.borrow_mut().gen_range(0..upper);
        Ok(m.pool.number(n as f64))
    });
    let v = machine.pool.primitive("random", random);
    env::define(&mut machine.pool, env, "random", v);

    tracing::debug!(count = plain.len() + 2, "primitives installed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::new("val")
    }

    fn numbers(m: &mut Machine, ns: &[f64]) -> ValueRef {
        let items: Vec<ValueRef> = ns.iter().map(|n| m.pool.number(*n)).collect();
        m.pool.list(&items)
    }

    #[test]
    fn test_add_sub() {
        let mut m = machine();
        let args = numbers(&mut m, &[1.0, 2.0, 3.0]);
        let r = prim_add(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "6");

        let args = numbers(&mut m, &[10.0, 1.0, 2.0, 3.0]);
        let r = prim_sub(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "4");

        let args = numbers(&mut m, &[5.0]);
        let r = prim_sub(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "-5");
    }

    #[test]
    fn test_division_by_zero() {
        let mut m = machine();
        let args = numbers(&mut m, &[1.0, 0.0]);
        assert_eq!(prim_div(&mut m, args).unwrap_err(), "division by zero");
    }

    #[test]
    fn test_arity_message() {
        let mut m = machine();
        let args = numbers(&mut m, &[1.0, 2.0]);
        assert_eq!(
            prim_car(&mut m, args).unwrap_err(),
            "expects 1 arg, but got 2"
        );
    }

    #[test]
    fn test_type_message() {
        let mut m = machine();
        let sym = m.pool.symbol("x");
        let args = m.pool.list(&[sym]);
        assert_eq!(
            prim_abs(&mut m, args).unwrap_err(),
            "arg #0 must be number, but is symbol x"
        );
    }

    #[test]
    fn test_chained_comparison() {
        let mut m = machine();
        let args = numbers(&mut m, &[1.0, 2.0, 3.0]);
        let r = prim_lt(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "true");

        let args = numbers(&mut m, &[1.0, 3.0, 2.0]);
        let r = prim_lt(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "false");
    }

    #[test]
    fn test_parity() {
        let mut m = machine();
        let args = numbers(&mut m, &[4.0]);
        let r = prim_even_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "true");

        let args = numbers(&mut m, &[2.5]);
        let r = prim_even_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "false");
        let args = numbers(&mut m, &[2.5]);
        let r = prim_odd_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "false");
    }

    #[test]
    fn test_set_car_mutates() {
        let mut m = machine();
        let one = m.pool.number(1.0);
        let two = m.pool.number(2.0);
        let pair = m.pool.pair(one, two);
        let x = m.pool.symbol("x");
        let args = m.pool.list(&[pair, x]);
        prim_set_car(&mut m, args).unwrap();
        assert_eq!(m.pool.display(pair), "(x . 2)");
    }

    #[test]
    fn test_equal_vs_eq() {
        let mut m = machine();
        let a1 = m.pool.number(1.0);
        let a = m.pool.list(&[a1]);
        let b1 = m.pool.number(1.0);
        let b = m.pool.list(&[b1]);

        let args = m.pool.list(&[a, b]);
        let r = prim_equal_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "true");

        let args = m.pool.list(&[a, b]);
        let r = prim_eq_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "false");

        let args = m.pool.list(&[a, a]);
        let r = prim_eq_q(&mut m, args).unwrap();
        assert_eq!(m.pool.display(r), "true");
    }

    #[test]
    fn test_error_formats_message() {
        let mut m = machine();
        let fmt = m.pool.string("bad thing: %s");
        let x = m.pool.symbol("culprit");
        let args = m.pool.list(&[fmt, x]);
        let r = prim_error(&mut m, args).unwrap();
        assert!(m.pool.is_error(r));
        assert_eq!(m.pool.display(r), "bad thing: culprit");
    }

    #[test]
    fn test_collect_reports() {
        let mut m = machine();
        let args = NIL;
        let r = prim_collect(&mut m, args).unwrap();
        assert!(m.pool.display(r).contains("collected"));
    }

    #[test]
    fn test_install_binds_into_env() {
        let mut m = machine();
        let genv = m.pool.environment();
        install_primitives(&mut m, genv);
        let plus = env::get(&m.pool, genv, "+").unwrap();
        assert!(matches!(m.pool.get(plus), Value::Primitive { .. }));
        assert_eq!(m.pool.display(plus), "<primitive '+'>");
    }
}
