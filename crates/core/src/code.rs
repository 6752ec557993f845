//! Typed register-machine code and its s-expression form
//!
//! [`Code`] is the source-level instruction set: what the compiler emits and
//! what machine program files contain. Translation from parsed values is
//! purely syntactic - the line head picks the variant, and the third operand
//! of `assign` is inspected (op token vs. anything else) to split calls from
//! copies. [`Code::to_value`] reproduces the original s-expression up to
//! whitespace.

use crate::pool::Pool;
use crate::value::{NIL, Value, ValueRef};

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `(op name)` - only valid as the op position of assign/perform/branch.
    Op(String),
    /// `(reg name)`
    Reg(String),
    /// `(label name)`
    Label(String),
    /// `(const value)` - the handle belongs to the pool the code was
    /// translated (or compiled) against.
    Const(ValueRef),
}

impl Token {
    fn to_value(&self, pool: &mut Pool) -> ValueRef {
        let (tag, payload) = match self {
            Token::Op(name) => ("op", pool.symbol(name.as_str())),
            Token::Reg(name) => ("reg", pool.symbol(name.as_str())),
            Token::Label(name) => ("label", pool.symbol(name.as_str())),
            Token::Const(v) => ("const", *v),
        };
        let tag = pool.symbol(tag);
        pool.list(&[tag, payload])
    }

    fn render(&self, pool: &Pool) -> String {
        match self {
            Token::Op(name) => format!("(op {name})"),
            Token::Reg(name) => format!("(reg {name})"),
            Token::Label(name) => format!("(label {name})"),
            Token::Const(v) => format!("(const {})", pool.display(*v)),
        }
    }
}

/// One line of register-machine code.
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    /// Standalone label declaration; names the next instruction.
    Label(String),
    /// `(assign reg (op name) arg...)` - call the op, store the result.
    AssignCall {
        reg: String,
        op: String,
        args: Vec<Token>,
    },
    /// `(assign reg src)` - copy from a register, label, or constant.
    AssignCopy { reg: String, src: Token },
    /// `(perform (op name) arg...)` - call the op, ignore the result.
    Perform { op: String, args: Vec<Token> },
    /// `(branch (label name) (op name) arg...)` - jump when the op answers
    /// a truthy value.
    Branch {
        label: String,
        op: String,
        args: Vec<Token>,
    },
    /// `(goto (reg name))` or `(goto (label name))`.
    Goto { target: Token },
    /// `(save reg)` - push the register on the stack.
    Save { reg: String },
    /// `(restore reg)` - pop the stack into the register.
    Restore { reg: String },
}

impl Code {
    /// The instruction back in its s-expression form.
    pub fn to_value(&self, pool: &mut Pool) -> ValueRef {
        match self {
            Code::Label(name) => pool.symbol(name.as_str()),
            Code::AssignCall { reg, op, args } => {
                let mut items = vec![pool.symbol("assign"), pool.symbol(reg.as_str())];
                let op = Token::Op(op.clone()).to_value(pool);
                items.push(op);
                for arg in args {
                    items.push(arg.to_value(pool));
                }
                pool.list(&items)
            }
            Code::AssignCopy { reg, src } => {
                let head = pool.symbol("assign");
                let reg = pool.symbol(reg.as_str());
                let src = src.to_value(pool);
                pool.list(&[head, reg, src])
            }
            Code::Perform { op, args } => {
                let mut items = vec![pool.symbol("perform")];
                let op = Token::Op(op.clone()).to_value(pool);
                items.push(op);
                for arg in args {
                    items.push(arg.to_value(pool));
                }
                pool.list(&items)
            }
            Code::Branch { label, op, args } => {
                let mut items = vec![pool.symbol("branch")];
                let label = Token::Label(label.clone()).to_value(pool);
                let op = Token::Op(op.clone()).to_value(pool);
                items.push(label);
                items.push(op);
                for arg in args {
                    items.push(arg.to_value(pool));
                }
                pool.list(&items)
            }
            Code::Goto { target } => {
                let head = pool.symbol("goto");
                let target = target.to_value(pool);
                pool.list(&[head, target])
            }
            Code::Save { reg } => {
                let head = pool.symbol("save");
                let reg = pool.symbol(reg.as_str());
                pool.list(&[head, reg])
            }
            Code::Restore { reg } => {
                let head = pool.symbol("restore");
                let reg = pool.symbol(reg.as_str());
                pool.list(&[head, reg])
            }
        }
    }

    /// Textual form of the line; `pool` resolves constant payloads.
    pub fn render(&self, pool: &Pool) -> String {
        match self {
            Code::Label(name) => name.clone(),
            Code::AssignCall { reg, op, args } => {
                format!("(assign {reg} (op {op}){})", render_args(pool, args))
            }
            Code::AssignCopy { reg, src } => format!("(assign {reg} {})", src.render(pool)),
            Code::Perform { op, args } => {
                format!("(perform (op {op}){})", render_args(pool, args))
            }
            Code::Branch { label, op, args } => {
                format!("(branch (label {label}) (op {op}){})", render_args(pool, args))
            }
            Code::Goto { target } => format!("(goto {})", target.render(pool)),
            Code::Save { reg } => format!("(save {reg})"),
            Code::Restore { reg } => format!("(restore {reg})"),
        }
    }
}

fn render_args(pool: &Pool, args: &[Token]) -> String {
    let mut out = String::new();
    for arg in args {
        out.push(' ');
        out.push_str(&arg.render(pool));
    }
    out
}

/// Translate a parsed list of code lines into typed instructions.
///
/// Bare symbols declare labels; every other line is a list headed by an
/// instruction keyword.
pub fn translate_to_code(pool: &Pool, source: ValueRef) -> Result<Vec<Code>, String> {
    let mut code = Vec::new();
    let mut cur = source;
    while let Value::Pair { car: line, cdr } = pool.get(cur) {
        code.push(translate_line(pool, *line)?);
        cur = *cdr;
    }
    if !pool.is_nil(cur) {
        return Err(format!("code is not a proper list: {}", pool.display(source)));
    }
    Ok(code)
}

fn translate_line(pool: &Pool, line: ValueRef) -> Result<Code, String> {
    if let Some(label) = pool.symbol_name(line) {
        return Ok(Code::Label(label.to_string()));
    }
    if !pool.is_pair(line) {
        return Err(format!("bad code line: {}", pool.display(line)));
    }

    let head = pool.car(line);
    let rest = pool.cdr(line);
    let Some(keyword) = pool.symbol_name(head) else {
        return Err(format!("bad code line: {}", pool.display(line)));
    };

    match keyword {
        "assign" => translate_assign(pool, line, rest),
        "perform" => {
            let (op, args) = translate_op_and_args(pool, line, rest)?;
            Ok(Code::Perform { op, args })
        }
        "branch" => {
            let label_token = token(pool, line, item(pool, line, rest, 0)?)?;
            let Token::Label(label) = label_token else {
                return Err(format!(
                    "branch target must be a label in {}",
                    pool.display(line)
                ));
            };
            let (op, args) = translate_op_and_args(pool, line, pool.cdr(rest))?;
            Ok(Code::Branch { label, op, args })
        }
        "goto" => {
            let target = token(pool, line, item(pool, line, rest, 0)?)?;
            match target {
                Token::Reg(_) | Token::Label(_) => Ok(Code::Goto { target }),
                _ => Err(format!(
                    "goto target must be a register or label in {}",
                    pool.display(line)
                )),
            }
        }
        "save" => Ok(Code::Save {
            reg: register_name(pool, line, rest)?,
        }),
        "restore" => Ok(Code::Restore {
            reg: register_name(pool, line, rest)?,
        }),
        other => Err(format!(
            "unknown instruction '{}' in {}",
            other,
            pool.display(line)
        )),
    }
}

fn translate_assign(pool: &Pool, line: ValueRef, rest: ValueRef) -> Result<Code, String> {
    let reg = register_name(pool, line, rest)?;
    let src_item = item(pool, line, pool.cdr(rest), 0)?;
    let src = token(pool, line, src_item)?;
    match src {
        Token::Op(op) => {
            let args = translate_args(pool, line, pool.cdr(pool.cdr(rest)))?;
            Ok(Code::AssignCall { reg, op, args })
        }
        src => {
            if !pool.is_nil(pool.cdr(pool.cdr(rest))) {
                return Err(format!(
                    "assign from a non-op source takes no arguments in {}",
                    pool.display(line)
                ));
            }
            Ok(Code::AssignCopy { reg, src })
        }
    }
}

fn translate_op_and_args(
    pool: &Pool,
    line: ValueRef,
    rest: ValueRef,
) -> Result<(String, Vec<Token>), String> {
    let op_item = item(pool, line, rest, 0)?;
    let Token::Op(op) = token(pool, line, op_item)? else {
        return Err(format!("expected an op token in {}", pool.display(line)));
    };
    let args = translate_args(pool, line, pool.cdr(rest))?;
    Ok((op, args))
}

fn translate_args(pool: &Pool, line: ValueRef, list: ValueRef) -> Result<Vec<Token>, String> {
    let mut args = Vec::new();
    let mut cur = list;
    while let Value::Pair { car, cdr } = pool.get(cur) {
        let tok = token(pool, line, *car)?;
        if matches!(tok, Token::Op(_)) {
            return Err(format!("misplaced op token in {}", pool.display(line)));
        }
        args.push(tok);
        cur = *cdr;
    }
    Ok(args)
}

fn token(pool: &Pool, line: ValueRef, v: ValueRef) -> Result<Token, String> {
    if !pool.is_pair(v) {
        return Err(format!("bad operand {} in {}", pool.display(v), pool.display(line)));
    }
    let tag = pool.car(v);
    let rest = pool.cdr(v);
    let payload = if pool.is_pair(rest) { pool.car(rest) } else { NIL };
    let name = |payload: ValueRef| -> Result<String, String> {
        pool.symbol_name(payload)
            .map(str::to_string)
            .ok_or_else(|| {
                format!(
                    "operand name must be a symbol in {}",
                    pool.display(line)
                )
            })
    };
    match pool.symbol_name(tag) {
        Some("op") => Ok(Token::Op(name(payload)?)),
        Some("reg") => Ok(Token::Reg(name(payload)?)),
        Some("label") => Ok(Token::Label(name(payload)?)),
        Some("const") => Ok(Token::Const(payload)),
        _ => Err(format!(
            "bad operand {} in {}",
            pool.display(v),
            pool.display(line)
        )),
    }
}

fn register_name(pool: &Pool, line: ValueRef, rest: ValueRef) -> Result<String, String> {
    let item = item(pool, line, rest, 0)?;
    pool.symbol_name(item).map(str::to_string).ok_or_else(|| {
        format!(
            "expected a register name in {}",
            pool.display(line)
        )
    })
}

fn item(pool: &Pool, line: ValueRef, list: ValueRef, index: usize) -> Result<ValueRef, String> {
    let mut cur = list;
    let mut i = 0;
    while let Value::Pair { car, cdr } = pool.get(cur) {
        if i == index {
            return Ok(*car);
        }
        i += 1;
        cur = *cdr;
    }
    Err(format!("incomplete instruction {}", pool.display(line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(pool: &mut Pool, items: &[ValueRef]) -> ValueRef {
        pool.list(items)
    }

    #[test]
    fn test_translate_label() {
        let mut p = Pool::new();
        let label = p.symbol("after-if-1");
        let source = p.list(&[label]);
        let code = translate_to_code(&p, source).unwrap();
        assert_eq!(code, vec![Code::Label("after-if-1".to_string())]);
    }

    #[test]
    fn test_translate_assign_call_vs_copy() {
        let mut p = Pool::new();

        // (assign val (op car) (reg exp))
        let assign = p.symbol("assign");
        let val = p.symbol("val");
        let op = p.symbol("op");
        let car = p.symbol("car");
        let op_tok = p.list(&[op, car]);
        let reg = p.symbol("reg");
        let exp = p.symbol("exp");
        let reg_tok = p.list(&[reg, exp]);
        let call_line = parse_line(&mut p, &[assign, val, op_tok, reg_tok]);

        // (assign exp (reg val))
        let assign2 = p.symbol("assign");
        let exp2 = p.symbol("exp");
        let reg2 = p.symbol("reg");
        let val2 = p.symbol("val");
        let reg_tok2 = p.list(&[reg2, val2]);
        let copy_line = parse_line(&mut p, &[assign2, exp2, reg_tok2]);

        let source = p.list(&[call_line, copy_line]);
        let code = translate_to_code(&p, source).unwrap();
        assert_eq!(
            code,
            vec![
                Code::AssignCall {
                    reg: "val".to_string(),
                    op: "car".to_string(),
                    args: vec![Token::Reg("exp".to_string())],
                },
                Code::AssignCopy {
                    reg: "exp".to_string(),
                    src: Token::Reg("val".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_translate_rejects_unknown_instruction() {
        let mut p = Pool::new();
        let bogus = p.symbol("frobnicate");
        let val = p.symbol("val");
        let line = p.list(&[bogus, val]);
        let source = p.list(&[line]);
        let err = translate_to_code(&p, source).unwrap_err();
        assert!(err.contains("unknown instruction 'frobnicate'"), "{err}");
    }

    #[test]
    fn test_round_trip_through_values() {
        let mut p = Pool::new();
        let forty_two = p.number(42.0);
        let original = vec![
            Code::Label("start".to_string()),
            Code::AssignCopy {
                reg: "val".to_string(),
                src: Token::Const(forty_two),
            },
            Code::Branch {
                label: "start".to_string(),
                op: "true?".to_string(),
                args: vec![Token::Reg("val".to_string())],
            },
            Code::Goto {
                target: Token::Reg("continue".to_string()),
            },
            Code::Save {
                reg: "env".to_string(),
            },
            Code::Restore {
                reg: "env".to_string(),
            },
            Code::Perform {
                op: "newline".to_string(),
                args: vec![],
            },
        ];

        let values: Vec<ValueRef> = original.iter().map(|c| c.to_value(&mut p)).collect();
        let source = p.list(&values);
        let translated = translate_to_code(&p, source).unwrap();

        // constants come back as fresh handles; compare rendered text
        let rendered: Vec<String> = original.iter().map(|c| c.render(&p)).collect();
        let rendered_back: Vec<String> = translated.iter().map(|c| c.render(&p)).collect();
        assert_eq!(rendered, rendered_back);
    }

    #[test]
    fn test_render() {
        let mut p = Pool::new();
        let x = p.symbol("x");
        let code = Code::AssignCall {
            reg: "val".to_string(),
            op: "lookup-variable-value".to_string(),
            args: vec![Token::Const(x), Token::Reg("env".to_string())],
        };
        assert_eq!(
            code.render(&p),
            "(assign val (op lookup-variable-value) (const x) (reg env))"
        );
    }
}
