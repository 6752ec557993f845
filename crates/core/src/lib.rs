//! rasp-core: the machine substrate
//!
//! The value model and managed pool (generational mark-and-sweep GC),
//! environments, the typed instruction/code model, and the register machine
//! itself. Higher layers - the expression compiler, the host primitives,
//! and the REPL - live in their own crates on top of this one.

pub mod code;
pub mod env;
pub mod machine;
pub mod pool;
pub mod value;

pub use code::{Code, Token, translate_to_code};
pub use machine::{Insn, Machine};
pub use pool::Pool;
pub use value::{MachineOp, NIL, OpResult, PrimitiveFn, Value, ValueRef};
