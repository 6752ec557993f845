//! Environments: chains of name-to-value frames
//!
//! An environment value holds a frame (a list of `(name . value)` record
//! pairs) and a parent environment. Lookup scans the frame front to back
//! and, when asked, continues into the parent chain, so the innermost
//! binding wins. `set!` goes through [`lookup`] with the recursive flag;
//! `define` stays in the current frame.

use crate::pool::Pool;
use crate::value::{Value, ValueRef};

/// Find the record for `name`. Scans the current frame; with `recursive`
/// set, walks up the parent chain.
pub fn lookup(pool: &Pool, env: ValueRef, name: &str, recursive: bool) -> Option<ValueRef> {
    let mut env = env;
    loop {
        let (frame, parent) = match pool.get(env) {
            Value::Env { frame, parent } => (*frame, *parent),
            other => panic!("lookup in non-environment: {}", other.type_name()),
        };

        let mut cur = frame;
        while let Value::Pair { car: record, cdr } = pool.get(cur) {
            if pool.symbol_name(pool.car(*record)) == Some(name) {
                return Some(*record);
            }
            cur = *cdr;
        }

        if recursive && !pool.is_nil(parent) {
            env = parent;
        } else {
            return None;
        }
    }
}

/// Current value of a record returned by [`lookup`].
pub fn record_value(pool: &Pool, record: ValueRef) -> ValueRef {
    pool.cdr(record)
}

/// Overwrite the value of a record returned by [`lookup`].
pub fn update_record(pool: &mut Pool, record: ValueRef, v: ValueRef) {
    pool.set_cdr(record, v);
}

/// Prepend a `(name . value)` record to the environment's own frame.
/// Callers keep one record per name by looking the name up first.
pub fn define(pool: &mut Pool, env: ValueRef, name: &str, v: ValueRef) {
    let name = pool.symbol(name);
    let record = pool.pair(name, v);
    let frame = match pool.get(env) {
        Value::Env { frame, .. } => *frame,
        other => panic!("define in non-environment: {}", other.type_name()),
    };
    let frame = pool.pair(record, frame);
    match pool.get_mut(env) {
        Value::Env { frame: slot, .. } => *slot = frame,
        _ => unreachable!(),
    }
}

/// Attach `parent` as the enclosing environment of `env` and return `env`.
pub fn extend(pool: &mut Pool, env: ValueRef, parent: ValueRef) -> ValueRef {
    match pool.get_mut(env) {
        Value::Env { parent: slot, .. } => *slot = parent,
        other => panic!("extend of non-environment: {}", other.type_name()),
    }
    env
}

/// Parent environment, nil at the root.
pub fn parent(pool: &Pool, env: ValueRef) -> ValueRef {
    match pool.get(env) {
        Value::Env { parent, .. } => *parent,
        other => panic!("parent of non-environment: {}", other.type_name()),
    }
}

/// The environment's own frame as a record list.
pub fn frame(pool: &Pool, env: ValueRef) -> ValueRef {
    match pool.get(env) {
        Value::Env { frame, .. } => *frame,
        other => panic!("frame of non-environment: {}", other.type_name()),
    }
}

/// Convenience: look `name` up the whole chain and return its value.
pub fn get(pool: &Pool, env: ValueRef, name: &str) -> Option<ValueRef> {
    lookup(pool, env, name, true).map(|record| record_value(pool, record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_lookup() {
        let mut p = Pool::new();
        let env = p.environment();
        let ten = p.number(10.0);
        define(&mut p, env, "x", ten);

        let record = lookup(&p, env, "x", false).unwrap();
        assert_eq!(record_value(&p, record), ten);
        assert!(lookup(&p, env, "y", false).is_none());
    }

    #[test]
    fn test_update_record() {
        let mut p = Pool::new();
        let env = p.environment();
        let ten = p.number(10.0);
        define(&mut p, env, "x", ten);

        let record = lookup(&p, env, "x", true).unwrap();
        let twenty = p.number(20.0);
        update_record(&mut p, record, twenty);
        assert_eq!(get(&p, env, "x"), Some(twenty));
    }

    #[test]
    fn test_innermost_binding_wins() {
        let mut p = Pool::new();
        let global = p.environment();
        let one = p.number(1.0);
        define(&mut p, global, "x", one);

        let inner = p.environment();
        let two = p.number(2.0);
        define(&mut p, inner, "x", two);
        extend(&mut p, inner, global);

        assert_eq!(get(&p, inner, "x"), Some(two));
        assert_eq!(get(&p, global, "x"), Some(one));
    }

    #[test]
    fn test_recursive_lookup_walks_parents() {
        let mut p = Pool::new();
        let global = p.environment();
        let one = p.number(1.0);
        define(&mut p, global, "y", one);

        let inner = p.environment();
        extend(&mut p, inner, global);

        assert!(lookup(&p, inner, "y", false).is_none());
        assert_eq!(get(&p, inner, "y"), Some(one));
    }
}
