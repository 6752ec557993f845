//! Syntax-directed compiler to register-machine code
//!
//! Compilation of an expression takes a target register (where the result
//! must land) and a linkage (what control does afterwards: fall through,
//! `goto (reg continue)`, or jump to a named label). The result is an
//! instruction sequence annotated with the registers it needs (reads before
//! writing) and modifies; the `preserving` combinator consults those sets
//! to insert save/restore pairs only around sequences that actually clobber
//! a register the continuation still needs.
//!
//! The whole expression tree is validated by the syntax checkers before any
//! code is produced; the first shape error aborts the compile.

use std::collections::BTreeSet;

use rasp_core::code::{Code, Token};
use rasp_core::pool::Pool;
use rasp_core::value::{NIL, ValueRef};

use crate::syntax;

/// What happens after a compiled expression produces its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    /// Control falls through to the following code.
    Next,
    /// End with `goto (reg continue)`.
    Return,
    /// End with a jump to the named label.
    Jump(String),
}

/// An instruction sequence with register-usage annotations.
#[derive(Debug, Clone)]
pub struct InstSeq {
    needed: BTreeSet<String>,
    modified: BTreeSet<String>,
    code: Vec<Code>,
}

impl InstSeq {
    fn empty() -> InstSeq {
        InstSeq {
            needed: BTreeSet::new(),
            modified: BTreeSet::new(),
            code: Vec::new(),
        }
    }

    fn with(needed: &[&str], modified: &[&str], code: Vec<Code>) -> InstSeq {
        InstSeq {
            needed: needed.iter().map(|r| r.to_string()).collect(),
            modified: modified.iter().map(|r| r.to_string()).collect(),
            code,
        }
    }

    fn label(name: &str) -> InstSeq {
        InstSeq::with(&[], &[], vec![Code::Label(name.to_string())])
    }

    pub fn needs(&self, reg: &str) -> bool {
        self.needed.contains(reg)
    }

    pub fn modifies(&self, reg: &str) -> bool {
        self.modified.contains(reg)
    }

    pub fn needed(&self) -> impl Iterator<Item = &str> {
        self.needed.iter().map(String::as_str)
    }

    pub fn modified(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    pub fn code(&self) -> &[Code] {
        &self.code
    }

    pub fn into_code(self) -> Vec<Code> {
        self.code
    }
}

/// Sequential composition: the second sequence sees the first's effects, so
/// registers the first provides are no longer needed from outside.
pub fn append_seqs(first: InstSeq, second: InstSeq) -> InstSeq {
    let mut needed = first.needed.clone();
    for reg in &second.needed {
        if !first.modified.contains(reg) {
            needed.insert(reg.clone());
        }
    }
    let mut modified = first.modified;
    modified.extend(second.modified);
    let mut code = first.code;
    code.extend(second.code);
    InstSeq {
        needed,
        modified,
        code,
    }
}

fn append_all(seqs: Vec<InstSeq>) -> InstSeq {
    let mut result = InstSeq::empty();
    for seq in seqs {
        result = append_seqs(result, seq);
    }
    result
}

/// Composition of mutually exclusive branches: both register sets are
/// plain unions since either side may run.
pub fn parallel_seqs(first: InstSeq, second: InstSeq) -> InstSeq {
    let mut needed = first.needed;
    needed.extend(second.needed);
    let mut modified = first.modified;
    modified.extend(second.modified);
    let mut code = first.code;
    code.extend(second.code);
    InstSeq {
        needed,
        modified,
        code,
    }
}

/// Concatenate the body after the sequence but ignore the body's register
/// sets; the body only runs when jumped into (a lambda's code).
pub fn tack_on_seq(seq: InstSeq, body: InstSeq) -> InstSeq {
    let mut code = seq.code;
    code.extend(body.code);
    InstSeq {
        needed: seq.needed,
        modified: seq.modified,
        code,
    }
}

/// Compose two sequences, saving and restoring each register in `regs`
/// around the first sequence when the first modifies it and the second
/// still needs it.
pub fn preserving(regs: &[&str], first: InstSeq, second: InstSeq) -> InstSeq {
    let Some((&reg, rest)) = regs.split_first() else {
        return append_seqs(first, second);
    };

    if first.modifies(reg) && second.needs(reg) {
        let mut needed = first.needed.clone();
        needed.insert(reg.to_string());
        let mut modified = first.modified.clone();
        modified.remove(reg);

        let mut code = Vec::with_capacity(first.code.len() + 2);
        code.push(Code::Save {
            reg: reg.to_string(),
        });
        code.extend(first.code);
        code.push(Code::Restore {
            reg: reg.to_string(),
        });

        preserving(
            rest,
            InstSeq {
                needed,
                modified,
                code,
            },
            second,
        )
    } else {
        preserving(rest, first, second)
    }
}

/// The compiler context: only the label counter, threaded through so no
/// process-wide state is involved.
pub struct Compiler {
    label_counter: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler { label_counter: 0 }
    }

    /// Compile `exp` (a value in `pool`) so that its result lands in
    /// `target` and control continues per `linkage`. Constants in the
    /// produced code are handles into `pool`.
    pub fn compile(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> Result<Vec<Code>, String> {
        check_syntax(pool, exp)?;
        Ok(self.compile_exp(pool, exp, target, linkage).into_code())
    }

    /// As [`Compiler::compile`], keeping the register annotations.
    pub fn compile_seq(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> Result<InstSeq, String> {
        check_syntax(pool, exp)?;
        Ok(self.compile_exp(pool, exp, target, linkage))
    }

    fn make_label(&mut self, family: &str, increment: bool) -> String {
        if increment {
            self.label_counter += 1;
        }
        format!("{family}-{}", self.label_counter)
    }

    fn compile_exp(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        if syntax::is_self_evaluating(pool, exp) {
            self.compile_self_evaluating(exp, target, linkage)
        } else if syntax::is_variable(pool, exp) {
            self.compile_variable(exp, target, linkage)
        } else if syntax::is_quoted(pool, exp) {
            self.compile_quoted(pool, exp, target, linkage)
        } else if syntax::is_assignment(pool, exp) {
            self.compile_assignment(pool, exp, target, linkage)
        } else if syntax::is_definition(pool, exp) {
            self.compile_definition(pool, exp, target, linkage)
        } else if syntax::is_if(pool, exp) {
            self.compile_if(pool, exp, target, linkage)
        } else if syntax::is_lambda(pool, exp) {
            self.compile_lambda(pool, exp, target, linkage)
        } else if syntax::is_let(pool, exp) {
            let transformed = syntax::transform_let(pool, exp);
            self.compile_exp(pool, transformed, target, linkage)
        } else if syntax::is_begin(pool, exp) {
            let actions = syntax::get_begin_actions(pool, exp);
            self.compile_sequence(pool, actions, target, linkage)
        } else if syntax::is_cond(pool, exp) {
            let transformed = syntax::transform_cond(pool, exp);
            self.compile_exp(pool, transformed, target, linkage)
        } else if syntax::is_and(pool, exp) {
            self.compile_and_or(pool, exp, target, linkage, true)
        } else if syntax::is_or(pool, exp) {
            self.compile_and_or(pool, exp, target, linkage, false)
        } else if syntax::is_eval(pool, exp) {
            self.compile_eval(pool, exp, target, linkage)
        } else if syntax::is_apply(pool, exp) {
            self.compile_apply(pool, exp, target, linkage)
        } else {
            self.compile_application(pool, exp, target, linkage)
        }
    }

    fn compile_self_evaluating(&mut self, exp: ValueRef, target: &str, linkage: &Linkage) -> InstSeq {
        let seq = InstSeq::with(
            &[],
            &[target],
            vec![Code::AssignCopy {
                reg: target.to_string(),
                src: Token::Const(exp),
            }],
        );
        end_with_linkage(linkage, seq)
    }

    fn compile_quoted(
        &mut self,
        pool: &Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let quoted = syntax::get_text_of_quotation(pool, exp);
        let seq = InstSeq::with(
            &[],
            &[target],
            vec![Code::AssignCopy {
                reg: target.to_string(),
                src: Token::Const(quoted),
            }],
        );
        end_with_linkage(linkage, seq)
    }

    fn compile_variable(&mut self, exp: ValueRef, target: &str, linkage: &Linkage) -> InstSeq {
        let seq = InstSeq::with(
            &["env"],
            &[target],
            vec![Code::AssignCall {
                reg: target.to_string(),
                op: "lookup-variable-value".to_string(),
                args: vec![Token::Const(exp), Token::Reg("env".to_string())],
            }],
        );
        end_with_linkage(linkage, seq)
    }

    fn compile_assignment(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let name = syntax::get_assignment_variable(pool, exp);
        let value = syntax::get_assignment_value(pool, exp);
        let value_seq = self.compile_exp(pool, value, "val", &Linkage::Next);

        let assign_seq = InstSeq::with(
            &["env", "val"],
            &[target],
            vec![Code::AssignCall {
                reg: target.to_string(),
                op: "set-variable-value!".to_string(),
                args: vec![
                    Token::Const(name),
                    Token::Reg("val".to_string()),
                    Token::Reg("env".to_string()),
                ],
            }],
        );

        end_with_linkage(linkage, preserving(&["env"], value_seq, assign_seq))
    }

    fn compile_definition(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let name = syntax::get_definition_variable(pool, exp);
        let value = syntax::get_definition_value(pool, exp);
        let value_seq = self.compile_exp(pool, value, "val", &Linkage::Next);

        let define_seq = InstSeq::with(
            &["env", "val"],
            &[target],
            vec![Code::AssignCall {
                reg: target.to_string(),
                op: "define-variable!".to_string(),
                args: vec![
                    Token::Const(name),
                    Token::Reg("val".to_string()),
                    Token::Reg("env".to_string()),
                ],
            }],
        );

        end_with_linkage(linkage, preserving(&["env"], value_seq, define_seq))
    }

    fn compile_if(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let true_branch = self.make_label("true-branch", true);
        let false_branch = self.make_label("false-branch", false);
        let after_if = self.make_label("after-if", false);

        // when the outer linkage falls through, the consequent must jump
        // past the alternative
        let consequent_linkage = match linkage {
            Linkage::Next => Linkage::Jump(after_if.clone()),
            other => other.clone(),
        };

        let predicate = syntax::get_if_predicate(pool, exp);
        let consequent = syntax::get_if_consequent(pool, exp);
        let alternative = syntax::get_if_alternative(pool, exp);

        let pred_seq = self.compile_exp(pool, predicate, "val", &Linkage::Next);
        let cons_seq = self.compile_exp(pool, consequent, target, &consequent_linkage);
        let alt_seq = self.compile_exp(pool, alternative, target, linkage);

        let test_seq = InstSeq::with(
            &["val"],
            &[],
            vec![Code::Branch {
                label: false_branch.clone(),
                op: "false?".to_string(),
                args: vec![Token::Reg("val".to_string())],
            }],
        );

        let arms = parallel_seqs(
            append_seqs(InstSeq::label(&true_branch), cons_seq),
            append_seqs(InstSeq::label(&false_branch), alt_seq),
        );
        preserving(
            &["env", "continue"],
            pred_seq,
            append_all(vec![test_seq, arms, InstSeq::label(&after_if)]),
        )
    }

    /// A body sequence: every expression but the last is evaluated for
    /// effect into `val`; the last gets the real target and linkage.
    fn compile_sequence(
        &mut self,
        pool: &mut Pool,
        seq: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        if syntax::is_last_exp(pool, seq) {
            let first = syntax::get_first_exp(pool, seq);
            return self.compile_exp(pool, first, target, linkage);
        }
        let first = syntax::get_first_exp(pool, seq);
        let rest = syntax::get_rest_exps(pool, seq);
        let first_seq = self.compile_exp(pool, first, target, &Linkage::Next);
        let rest_seq = self.compile_sequence(pool, rest, target, linkage);
        preserving(&["env", "continue"], first_seq, rest_seq)
    }

    fn compile_lambda(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let proc_entry = self.make_label("proc-entry", true);
        let after_lambda = self.make_label("after-lambda", false);

        let lambda_linkage = match linkage {
            Linkage::Next => Linkage::Jump(after_lambda.clone()),
            other => other.clone(),
        };

        let assign_seq = InstSeq::with(
            &["env"],
            &[target],
            vec![Code::AssignCall {
                reg: target.to_string(),
                op: "make-compiled-procedure".to_string(),
                args: vec![
                    Token::Label(proc_entry.clone()),
                    Token::Reg("env".to_string()),
                ],
            }],
        );

        let body = self.compile_lambda_body(pool, exp, &proc_entry);
        append_seqs(
            tack_on_seq(end_with_linkage(&lambda_linkage, assign_seq), body),
            InstSeq::label(&after_lambda),
        )
    }

    fn compile_lambda_body(&mut self, pool: &mut Pool, exp: ValueRef, proc_entry: &str) -> InstSeq {
        let params = syntax::get_lambda_parameters(pool, exp);
        let body = syntax::get_lambda_body(pool, exp);

        let pre_body = InstSeq::with(
            &["env", "proc", "argl"],
            &["env"],
            vec![
                Code::Label(proc_entry.to_string()),
                Code::AssignCall {
                    reg: "env".to_string(),
                    op: "compiled-environment".to_string(),
                    args: vec![Token::Reg("proc".to_string())],
                },
                Code::AssignCall {
                    reg: "env".to_string(),
                    op: "extend-environment".to_string(),
                    args: vec![
                        Token::Const(params),
                        Token::Reg("argl".to_string()),
                        Token::Reg("env".to_string()),
                    ],
                },
            ],
        );

        let body_seq = self.compile_sequence(pool, body, "val", &Linkage::Return);
        append_seqs(pre_body, body_seq)
    }

    /// `and` and `or` share one shape: evaluate left to right into `val`,
    /// short-circuiting to the end label on the first falsy (`and`) or
    /// truthy (`or`) value; the last expression decides otherwise.
    fn compile_and_or(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
        is_and: bool,
    ) -> InstSeq {
        let exps = if is_and {
            syntax::get_and_expressions(pool, exp)
        } else {
            syntax::get_or_expressions(pool, exp)
        };

        if syntax::has_no_exps(pool, exps) {
            // (and) is true, (or) is false
            let value = pool.boolean(is_and);
            return self.compile_self_evaluating(value, target, linkage);
        }
        if syntax::is_last_exp(pool, exps) {
            let only = syntax::get_first_exp(pool, exps);
            return self.compile_exp(pool, only, target, linkage);
        }

        let mut rev_seqs = Vec::new();
        let mut cur = exps;
        while !syntax::has_no_exps(pool, cur) {
            let one = syntax::get_first_exp(pool, cur);
            rev_seqs.push(self.compile_exp(pool, one, "val", &Linkage::Next));
            cur = syntax::get_rest_exps(pool, cur);
        }
        rev_seqs.reverse();

        let (family, test_op) = if is_and {
            ("after-and", "false?")
        } else {
            ("after-or", "true?")
        };
        let after = self.make_label(family, true);

        let jump_seq = InstSeq::with(
            &["val"],
            &[],
            vec![Code::Branch {
                label: after.clone(),
                op: test_op.to_string(),
                args: vec![Token::Reg("val".to_string())],
            }],
        );

        // the last expression runs without a conditional jump
        let mut rev_seqs = rev_seqs.into_iter();
        let mut eval_seq = rev_seqs.next().expect("at least two expressions");
        for seq in rev_seqs {
            eval_seq = preserving(&["env"], append_seqs(seq, jump_seq.clone()), eval_seq);
        }

        let mut final_seq = InstSeq::label(&after);
        if target != "val" {
            final_seq = append_seqs(
                final_seq,
                InstSeq::with(
                    &["val"],
                    &[target],
                    vec![Code::AssignCopy {
                        reg: target.to_string(),
                        src: Token::Reg("val".to_string()),
                    }],
                ),
            );
        }

        end_with_linkage(linkage, append_seqs(eval_seq, final_seq))
    }

    /// `(eval e)` evaluates `e` at compile-level, then hands the resulting
    /// expression to the loaded evaluator at `eval-dispatch`.
    fn compile_eval(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let inner = syntax::get_eval_expression(pool, exp);
        if syntax::is_self_evaluating(pool, inner) {
            return self.compile_self_evaluating(inner, target, linkage);
        }
        if syntax::is_quoted(pool, inner) {
            return self.compile_quoted(pool, inner, target, linkage);
        }

        assert!(
            target == "val" || *linkage != Linkage::Return,
            "eval with a non-val target can't use the return linkage"
        );

        let internal_seq = self.compile_exp(pool, inner, "exp", &Linkage::Next);

        let mut needed = vec!["env"];
        let mut code = Vec::new();
        match linkage {
            Linkage::Return => {
                // the evaluator sets val and returns through continue itself
                needed.push("continue");
                code.push(goto_label("eval-dispatch"));
            }
            Linkage::Next => {
                let after_eval = self.make_label("after-eval", true);
                code.push(assign_label("continue", &after_eval));
                code.push(goto_label("eval-dispatch"));
                code.push(Code::Label(after_eval));
                if target != "val" {
                    code.push(copy_reg(target, "val"));
                }
            }
            Linkage::Jump(label) => {
                if target == "val" {
                    code.push(assign_label("continue", label));
                    code.push(goto_label("eval-dispatch"));
                } else {
                    let after_eval = self.make_label("after-eval", true);
                    code.push(assign_label("continue", &after_eval));
                    code.push(goto_label("eval-dispatch"));
                    code.push(Code::Label(after_eval));
                    code.push(copy_reg(target, "val"));
                    code.push(goto_label(label));
                }
            }
        }

        // anything can happen during the evaluation
        let external_seq = InstSeq::with(
            &needed,
            &["env", "proc", "val", "argl", "continue"],
            code,
        );
        preserving(&["env"], internal_seq, external_seq)
    }

    fn compile_apply(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let operator = syntax::get_apply_operator(pool, exp);
        let arguments = syntax::get_apply_arguments(pool, exp);

        let operator_seq = self.compile_exp(pool, operator, "proc", &Linkage::Next);
        let arguments_seq = self.compile_exp(pool, arguments, "argl", &Linkage::Next);
        let call_seq = self.compile_procedure_call(pool, target, linkage);

        preserving(
            &["env", "continue"],
            operator_seq,
            preserving(&["proc", "continue"], arguments_seq, call_seq),
        )
    }

    fn compile_application(
        &mut self,
        pool: &mut Pool,
        exp: ValueRef,
        target: &str,
        linkage: &Linkage,
    ) -> InstSeq {
        let operator = syntax::get_operator(pool, exp);
        let operator_seq = self.compile_exp(pool, operator, "proc", &Linkage::Next);

        let mut operand_seqs = Vec::new();
        let mut operands = syntax::get_operands(pool, exp);
        while !syntax::has_no_operands(pool, operands) {
            let operand = syntax::get_first_operand(pool, operands);
            operand_seqs.push(self.compile_exp(pool, operand, "val", &Linkage::Next));
            operands = syntax::get_rest_operands(pool, operands);
        }

        let arglist_seq = self.compile_arglist(operand_seqs);
        let call_seq = self.compile_procedure_call(pool, target, linkage);

        preserving(
            &["env", "continue"],
            operator_seq,
            preserving(&["proc", "continue"], arglist_seq, call_seq),
        )
    }

    /// Build `argl` by adjoining each operand in textual order, keeping
    /// `argl` alive across operand evaluation and `env` across successive
    /// operands.
    fn compile_arglist(&mut self, operand_seqs: Vec<InstSeq>) -> InstSeq {
        let mut seq = InstSeq::with(
            &[],
            &["argl"],
            vec![Code::AssignCopy {
                reg: "argl".to_string(),
                src: Token::Const(NIL),
            }],
        );

        for operand_seq in operand_seqs {
            let adjoin_seq = InstSeq::with(
                &["val", "argl"],
                &["argl"],
                vec![Code::AssignCall {
                    reg: "argl".to_string(),
                    op: "adjoin-arg".to_string(),
                    args: vec![Token::Reg("val".to_string()), Token::Reg("argl".to_string())],
                }],
            );
            let one = preserving(&["argl"], operand_seq, adjoin_seq);
            seq = preserving(&["env"], seq, one);
        }
        seq
    }

    /// Dispatch on the procedure in `proc`: primitive and compiled arms,
    /// with a signalled error for anything else.
    fn compile_procedure_call(&mut self, pool: &mut Pool, target: &str, linkage: &Linkage) -> InstSeq {
        let primitive_branch = self.make_label("primitive-branch", true);
        let compiled_branch = self.make_label("compiled-branch", false);
        let after_call = self.make_label("after-call", false);

        let compiled_linkage = match linkage {
            Linkage::Next => Linkage::Jump(after_call.clone()),
            other => other.clone(),
        };

        let cant_apply = pool.string("can't apply %s");
        let test_seq = InstSeq::with(
            &["proc"],
            &[],
            vec![
                Code::Branch {
                    label: primitive_branch.clone(),
                    op: "primitive-procedure?".to_string(),
                    args: vec![Token::Reg("proc".to_string())],
                },
                Code::Branch {
                    label: compiled_branch.clone(),
                    op: "compiled-procedure?".to_string(),
                    args: vec![Token::Reg("proc".to_string())],
                },
                Code::Perform {
                    op: "signal-error".to_string(),
                    args: vec![Token::Const(cant_apply), Token::Reg("proc".to_string())],
                },
            ],
        );

        let primitive_seq = InstSeq::with(
            &["proc", "argl"],
            &[target],
            vec![Code::AssignCall {
                reg: target.to_string(),
                op: "apply-primitive-procedure".to_string(),
                args: vec![Token::Reg("proc".to_string()), Token::Reg("argl".to_string())],
            }],
        );

        let arms = parallel_seqs(
            append_seqs(
                InstSeq::label(&compiled_branch),
                self.compile_compiled_call(target, &compiled_linkage),
            ),
            append_seqs(
                InstSeq::label(&primitive_branch),
                end_with_linkage(linkage, primitive_seq),
            ),
        );

        append_all(vec![test_seq, arms, InstSeq::label(&after_call)])
    }

    fn compile_compiled_call(&mut self, target: &str, linkage: &Linkage) -> InstSeq {
        assert!(
            target == "val" || *linkage != Linkage::Return,
            "compiled call with a non-val target can't use the return linkage"
        );

        let entry = Code::AssignCall {
            reg: "val".to_string(),
            op: "compiled-entry".to_string(),
            args: vec![Token::Reg("proc".to_string())],
        };
        let jump = Code::Goto {
            target: Token::Reg("val".to_string()),
        };
        let all_modified = &["env", "proc", "val", "argl", "continue"];

        match linkage {
            Linkage::Return => {
                // the callee returns through continue on its own
                InstSeq::with(&["proc", "continue"], all_modified, vec![entry, jump])
            }
            Linkage::Jump(label) if target == "val" => InstSeq::with(
                &["proc"],
                all_modified,
                vec![assign_label("continue", label), entry, jump],
            ),
            Linkage::Jump(label) => {
                let proc_return = self.make_label("proc-return", true);
                InstSeq::with(
                    &["proc"],
                    all_modified,
                    vec![
                        assign_label("continue", &proc_return),
                        entry,
                        jump,
                        Code::Label(proc_return),
                        copy_reg(target, "val"),
                        goto_label(label),
                    ],
                )
            }
            Linkage::Next => unreachable!("callers turn next into an explicit label"),
        }
    }
}

fn compile_linkage(linkage: &Linkage) -> InstSeq {
    match linkage {
        Linkage::Return => InstSeq::with(
            &["continue"],
            &[],
            vec![Code::Goto {
                target: Token::Reg("continue".to_string()),
            }],
        ),
        Linkage::Next => InstSeq::empty(),
        Linkage::Jump(label) => InstSeq::with(&[], &[], vec![goto_label(label)]),
    }
}

fn end_with_linkage(linkage: &Linkage, seq: InstSeq) -> InstSeq {
    preserving(&["continue"], seq, compile_linkage(linkage))
}

fn goto_label(label: &str) -> Code {
    Code::Goto {
        target: Token::Label(label.to_string()),
    }
}

fn assign_label(reg: &str, label: &str) -> Code {
    Code::AssignCopy {
        reg: reg.to_string(),
        src: Token::Label(label.to_string()),
    }
}

fn copy_reg(dst: &str, src: &str) -> Code {
    Code::AssignCopy {
        reg: dst.to_string(),
        src: Token::Reg(src.to_string()),
    }
}

/// Validate the whole expression tree before compiling; the first shape
/// error wins.
pub fn check_syntax(pool: &mut Pool, exp: ValueRef) -> Result<(), String> {
    if syntax::is_self_evaluating(pool, exp) || syntax::is_variable(pool, exp) {
        Ok(())
    } else if syntax::is_quoted(pool, exp) {
        syntax::check_quoted(pool, exp)
    } else if syntax::is_assignment(pool, exp) {
        syntax::check_assignment(pool, exp)?;
        check_syntax(pool, syntax::get_assignment_value(pool, exp))
    } else if syntax::is_definition(pool, exp) {
        syntax::check_definition(pool, exp)?;
        let value = syntax::get_definition_value(pool, exp);
        check_syntax(pool, value)
    } else if syntax::is_if(pool, exp) {
        syntax::check_if(pool, exp)?;
        check_syntax(pool, syntax::get_if_predicate(pool, exp))?;
        check_syntax(pool, syntax::get_if_consequent(pool, exp))?;
        let alternative = syntax::get_if_alternative(pool, exp);
        check_syntax(pool, alternative)
    } else if syntax::is_lambda(pool, exp) {
        syntax::check_lambda(pool, exp)?;
        check_each(pool, syntax::get_lambda_body(pool, exp))
    } else if syntax::is_let(pool, exp) {
        syntax::check_let(pool, exp)?;
        let transformed = syntax::transform_let(pool, exp);
        check_syntax(pool, transformed)
    } else if syntax::is_begin(pool, exp) {
        syntax::check_begin(pool, exp)?;
        check_each(pool, syntax::get_begin_actions(pool, exp))
    } else if syntax::is_cond(pool, exp) {
        syntax::check_cond(pool, exp)?;
        let transformed = syntax::transform_cond(pool, exp);
        check_syntax(pool, transformed)
    } else if syntax::is_and(pool, exp) {
        syntax::check_and(pool, exp)?;
        check_each(pool, syntax::get_and_expressions(pool, exp))
    } else if syntax::is_or(pool, exp) {
        syntax::check_or(pool, exp)?;
        check_each(pool, syntax::get_or_expressions(pool, exp))
    } else if syntax::is_eval(pool, exp) {
        syntax::check_eval(pool, exp)?;
        check_syntax(pool, syntax::get_eval_expression(pool, exp))
    } else if syntax::is_apply(pool, exp) {
        syntax::check_apply(pool, exp)?;
        check_syntax(pool, syntax::get_apply_operator(pool, exp))?;
        let arguments = syntax::get_apply_arguments(pool, exp);
        syntax::check_apply_arguments(pool, arguments)?;
        check_syntax(pool, arguments)
    } else {
        syntax::check_application(pool, exp)?;
        check_syntax(pool, syntax::get_operator(pool, exp))?;
        check_each(pool, syntax::get_operands(pool, exp))
    }
}

fn check_each(pool: &mut Pool, exps: ValueRef) -> Result<(), String> {
    let items = pool.list_items(exps);
    for item in items {
        check_syntax(pool, item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(needed: &[&str], modified: &[&str], marker: &str) -> InstSeq {
        InstSeq::with(needed, modified, vec![Code::Label(marker.to_string())])
    }

    fn lines(seq: &InstSeq) -> Vec<String> {
        let pool = Pool::new();
        seq.code().iter().map(|c| c.render(&pool)).collect()
    }

    #[test]
    fn test_append_register_sets() {
        // the first sequence provides val, so the composite no longer
        // needs it from outside
        let a = seq(&["env"], &["val"], "a");
        let b = seq(&["val", "argl"], &["proc"], "b");
        let joined = append_seqs(a, b);
        assert!(joined.needs("env"));
        assert!(joined.needs("argl"));
        assert!(!joined.needs("val"));
        assert!(joined.modifies("val"));
        assert!(joined.modifies("proc"));
        assert_eq!(lines(&joined), vec!["a", "b"]);
    }

    #[test]
    fn test_parallel_unions_both_sets() {
        let a = seq(&["env"], &["val"], "a");
        let b = seq(&["val"], &["proc"], "b");
        let joined = parallel_seqs(a, b);
        // either branch may run, so val stays needed
        assert!(joined.needs("env"));
        assert!(joined.needs("val"));
        assert!(joined.modifies("val"));
        assert!(joined.modifies("proc"));
    }

    #[test]
    fn test_tack_on_ignores_body_sets() {
        let a = seq(&["env"], &["val"], "a");
        let body = seq(&["argl"], &["proc"], "body");
        let joined = tack_on_seq(a, body);
        assert!(!joined.needs("argl"));
        assert!(!joined.modifies("proc"));
        assert_eq!(lines(&joined), vec!["a", "body"]);
    }

    #[test]
    fn test_preserving_wraps_only_live_clobbers() {
        let a = seq(&[], &["env", "val"], "a");
        let b = seq(&["env"], &[], "b");
        let joined = preserving(&["env", "continue"], a, b);
        assert_eq!(
            lines(&joined),
            vec!["(save env)", "a", "(restore env)", "b"]
        );
        // the save/restore pair makes env a need, not a modification
        assert!(joined.needs("env"));
        assert!(!joined.modifies("env"));
        assert!(joined.modifies("val"));
    }

    #[test]
    fn test_preserving_skips_dead_registers() {
        // b never reads env, so no save is inserted
        let a = seq(&[], &["env"], "a");
        let b = seq(&["val"], &[], "b");
        let joined = preserving(&["env"], a, b);
        assert_eq!(lines(&joined), vec!["a", "b"]);

        // a never writes continue, so no save either
        let a = seq(&[], &["val"], "a");
        let b = seq(&["continue"], &[], "b");
        let joined = preserving(&["continue"], a, b);
        assert_eq!(lines(&joined), vec!["a", "b"]);
    }

    #[test]
    fn test_preserving_handles_multiple_registers() {
        let a = seq(&[], &["env", "continue"], "a");
        let b = seq(&["env", "continue"], &[], "b");
        let joined = preserving(&["env", "continue"], a, b);
        // wrapped inside-out: env first, then continue around it
        assert_eq!(
            lines(&joined),
            vec![
                "(save continue)",
                "(save env)",
                "a",
                "(restore env)",
                "(restore continue)",
                "b"
            ]
        );
    }

    #[test]
    fn test_linkage_sequences() {
        let body = seq(&[], &["val"], "body");
        let returned = end_with_linkage(&Linkage::Return, body.clone());
        assert_eq!(lines(&returned), vec!["body", "(goto (reg continue))"]);
        assert!(returned.needs("continue"));

        let next = end_with_linkage(&Linkage::Next, body.clone());
        assert_eq!(lines(&next), vec!["body"]);

        let jumped = end_with_linkage(&Linkage::Jump("done".to_string()), body);
        assert_eq!(lines(&jumped), vec!["body", "(goto (label done))"]);
    }
}
