//! Message formatting for error/info values
//!
//! The `error` and `info` primitives and the `signal-error` machine op take
//! a format string plus a list of values; each `%s` is replaced with the
//! next value rendered to its canonical form, `%%` collapses to a literal
//! percent. Surplus `%s` markers are left in place.

use rasp_core::pool::Pool;
use rasp_core::value::{Value, ValueRef};

/// Substitute the values of `args` (a list) into `fmt`.
pub fn format_message(pool: &Pool, fmt: &str, args: ValueRef) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut rest = args;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('s') => match pool.get(rest) {
                Value::Pair { car, cdr } => {
                    chars.next();
                    out.push_str(&pool.display(*car));
                    rest = *cdr;
                }
                _ => out.push('%'),
            },
            _ => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rasp_core::value::NIL;

    #[test]
    fn test_substitutes_in_order() {
        let mut p = Pool::new();
        let a = p.symbol("x");
        let b = p.number(2.0);
        let args = p.list(&[a, b]);
        assert_eq!(format_message(&p, "%s is %s", args), "x is 2");
    }

    #[test]
    fn test_literal_percent_and_surplus_markers() {
        let p = Pool::new();
        assert_eq!(format_message(&p, "100%% done", NIL), "100% done");
        assert_eq!(format_message(&p, "missing %s here", NIL), "missing %s here");
    }

    #[test]
    fn test_renders_structures() {
        let mut p = Pool::new();
        let one = p.number(1.0);
        let two = p.number(2.0);
        let pair = p.pair(one, two);
        let args = p.list(&[pair]);
        assert_eq!(
            format_message(&p, "can't apply %s", args),
            "can't apply (1 . 2)"
        );
    }
}
