//! Width-aware pretty printer
//!
//! Renders a value inline when it fits the target width, otherwise breaks a
//! list open: the first element stays on the opening line, every following
//! element goes on its own line indented one step deeper. Improper lists
//! and cyclic structures fall back to the inline form.

use rasp_core::pool::Pool;
use rasp_core::value::ValueRef;

const INDENT_SPACES: usize = 4;

/// Render `v` with a target line width.
pub fn pretty_str(pool: &Pool, v: ValueRef, width: usize) -> String {
    pretty_at(pool, v, width, 0)
}

fn pretty_at(pool: &Pool, v: ValueRef, width: usize, indent: usize) -> String {
    let inline = pool.display(v);
    if indent + inline.len() <= width || !pool.is_pair(v) {
        return inline;
    }
    // the cycle mark means the spine cannot be walked safely
    if inline.contains("<cycle>") || !pool.is_list(v) {
        return inline;
    }

    let items = pool.list_items(v);
    let mut out = String::from("(");
    out.push_str(&pretty_at(pool, items[0], width, indent + 1));
    for &item in &items[1..] {
        out.push('\n');
        out.push_str(&" ".repeat(indent + INDENT_SPACES));
        out.push_str(&pretty_at(pool, item, width, indent + INDENT_SPACES));
    }
    out.push(')');
    out
}
