//! rasp-runtime: the host primitive library
//!
//! The procedures compiled code and the evaluator program call back into:
//! list structure, arithmetic, comparisons, predicates, I/O, and the
//! runtime hooks, plus the message formatting and pretty printing they rely
//! on. The `compile`/`code` primitives are registered by the compiler crate
//! next to this set.

pub mod format;
pub mod pretty;
pub mod primitives;

pub use format::format_message;
pub use pretty::pretty_str;
pub use primitives::install_primitives;
