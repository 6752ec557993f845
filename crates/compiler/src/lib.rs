//! rasp-compiler: from source text to register-machine code
//!
//! The s-expression reader, the syntax layer (recognizers, checkers,
//! accessors, desugarings), the syntax-directed compiler with its
//! register-preservation algebra, and the evaluator host that runs the
//! explicit-control evaluator program against the machine.

pub mod compile;
pub mod evaluator;
pub mod parser;
pub mod syntax;

pub use compile::{Compiler, InstSeq, Linkage, check_syntax};
pub use evaluator::Evaluator;
pub use parser::{Parser, is_balanced, parse_file, parse_str};
