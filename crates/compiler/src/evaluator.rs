//! Evaluator host
//!
//! Owns the long-running machine loaded with the explicit-control evaluator
//! program, binds every op that program (and compiled code) may invoke, and
//! keeps the global environment alive across runs. Each evaluation imports
//! one expression into the `exp` register, points `env` at the global
//! environment, runs the machine to halt, and exports the `val` register.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use rasp_core::code::translate_to_code;
use rasp_core::env;
use rasp_core::machine::Machine;
use rasp_core::pool::Pool;
use rasp_core::value::{MachineOp, NIL, PrimitiveFn, Value, ValueRef};
use rasp_runtime::format::format_message;
use rasp_runtime::primitives::{
    arg, expect_args, expect_max_args, expect_min_args, install_primitives, string_arg,
};

use crate::compile::{Compiler, Linkage};
use crate::parser;
use crate::syntax;

/// The evaluator: a machine preloaded with the evaluator program plus the
/// global environment it evaluates against.
pub struct Evaluator {
    machine: Machine,
    global_env: ValueRef,
    compiler: Rc<RefCell<Compiler>>,
}

impl Evaluator {
    /// Build the evaluator from a program file.
    pub fn from_file(path: &Path) -> Result<Evaluator, String> {
        let mut scratch = Pool::new();
        let source = parser::parse_file(&mut scratch, path)?;
        tracing::debug!(path = %path.display(), "evaluator program loaded");
        Evaluator::build(&scratch, source)
    }

    /// Build the evaluator from program text.
    pub fn from_source(text: &str) -> Result<Evaluator, String> {
        let mut scratch = Pool::new();
        let source = parser::parse_str(&mut scratch, text)?;
        Evaluator::build(&scratch, source)
    }

    fn build(scratch: &Pool, source: ValueRef) -> Result<Evaluator, String> {
        let code = translate_to_code(scratch, source)?;
        let mut machine = Machine::with_code(scratch, &code, "val")?;
        bind_machine_ops(&mut machine);

        let compiler = Rc::new(RefCell::new(Compiler::new()));
        let global_env = make_global_environment(&mut machine, &compiler);
        machine.pool.register_root(global_env);

        Ok(Evaluator {
            machine,
            global_env,
            compiler,
        })
    }

    /// Evaluate one expression (imported from `src`); the result is
    /// exported into `dst`.
    pub fn evaluate(&mut self, src: &Pool, exp: ValueRef, dst: &mut Pool) -> ValueRef {
        self.machine.set_register("env", self.global_env);
        self.machine.write_to_register("exp", src, exp);
        self.machine.execute();
        self.machine.read_output(dst)
    }

    /// Parse `input` and evaluate every top-level form, collecting the
    /// per-form results in `dst`.
    pub fn evaluate_source(
        &mut self,
        input: &str,
        dst: &mut Pool,
    ) -> Result<Vec<ValueRef>, String> {
        let mut scratch = Pool::new();
        let forms = parser::parse_str(&mut scratch, input)?;
        let mut results = Vec::new();
        for form in scratch.list_items(forms) {
            results.push(self.evaluate(&scratch, form, dst));
        }
        Ok(results)
    }

    /// Rebuild the global environment (constants and primitives). The
    /// label counter is kept so recompilations never reuse a label.
    pub fn reset(&mut self) {
        self.machine.pool.unregister_root(self.global_env);
        let global_env = make_global_environment(&mut self.machine, &self.compiler);
        self.machine.pool.register_root(global_env);
        self.global_env = global_env;
        tracing::info!("global environment reset");
    }

    pub fn set_trace(&mut self, level: u8) {
        self.machine.set_trace(level);
    }

    pub fn trace(&self) -> u8 {
        self.machine.trace()
    }

    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.machine.set_interrupt(flag);
    }
}

/// The global environment: boolean aliases, math constants, the primitive
/// library, and the compilation primitives.
fn make_global_environment(machine: &mut Machine, compiler: &Rc<RefCell<Compiler>>) -> ValueRef {
    let genv = machine.pool.environment();

    let t = machine.pool.boolean(true);
    env::define(&mut machine.pool, genv, "#t", t);
    let f = machine.pool.boolean(false);
    env::define(&mut machine.pool, genv, "#f", f);
    let pi = machine.pool.number(3.1415926536);
    env::define(&mut machine.pool, genv, "PI", pi);
    let e = machine.pool.number(2.7182818285);
    env::define(&mut machine.pool, genv, "E", e);

    install_primitives(machine, genv);
    install_compile_primitives(machine, genv, compiler);
    genv
}

/// `compile` and `code`: the two primitives that need the compiler context.
fn install_compile_primitives(
    machine: &mut Machine,
    genv: ValueRef,
    compiler: &Rc<RefCell<Compiler>>,
) {
    // (compile e): compile e for the val register with the return linkage,
    // splice the code into the machine, and continue there; the compiled
    // code's result replaces this call's
    let shared = compiler.clone();
    let compile_prim: PrimitiveFn = Rc::new(move |m: &mut Machine, args: ValueRef| {
        expect_args(&m.pool, args, 1)?;
        let exp = arg(&m.pool, args, 0);
        let code = shared
            .borrow_mut()
            .compile(&mut m.pool, exp, "val", &Linkage::Return)?;
        m.append_and_jump(&code)?;
        Ok(NIL)
    });
    let v = machine.pool.primitive("compile", compile_prim);
    env::define(&mut machine.pool, genv, "compile", v);

    // (code e [target [linkage]]): the compiled instructions as data
    let shared = compiler.clone();
    let code_prim: PrimitiveFn = Rc::new(move |m: &mut Machine, args: ValueRef| {
        expect_min_args(&m.pool, args, 1)?;
        expect_max_args(&m.pool, args, 3)?;
        let exp = arg(&m.pool, args, 0);
        let count = m.pool.list_len(args);
        let target = if count > 1 {
            string_arg(&m.pool, args, 1)?
        } else {
            "val".to_string()
        };
        let linkage = if count > 2 {
            string_arg(&m.pool, args, 2)?
        } else {
            "return".to_string()
        };
        let linkage = match linkage.as_str() {
            "next" => Linkage::Next,
            "return" => Linkage::Return,
            label => Linkage::Jump(label.to_string()),
        };

        let code = shared
            .borrow_mut()
            .compile(&mut m.pool, exp, &target, &linkage)?;
        let values: Vec<ValueRef> = code.iter().map(|c| c.to_value(&mut m.pool)).collect();
        Ok(m.pool.list(&values))
    });
    let v = machine.pool.primitive("code", code_prim);
    env::define(&mut machine.pool, genv, "code", v);
}

// op adapters

fn cell(args: &[ValueRef], index: usize) -> Result<ValueRef, String> {
    args.get(index).copied().ok_or_else(|| {
        format!(
            "expects at least {} op args, but got {}",
            index + 1,
            args.len()
        )
    })
}

fn value(m: &Machine, args: &[ValueRef], index: usize) -> Result<ValueRef, String> {
    Ok(m.pool.car(cell(args, index)?))
}

fn check_op(f: fn(&Pool, ValueRef) -> Result<(), String>) -> MachineOp {
    Rc::new(move |m: &mut Machine, args: &[ValueRef]| {
        let exp = value(m, args, 0)?;
        f(&m.pool, exp)?;
        Ok(NIL)
    })
}

fn get_op(f: fn(&Pool, ValueRef) -> ValueRef) -> MachineOp {
    Rc::new(move |m: &mut Machine, args: &[ValueRef]| {
        let exp = value(m, args, 0)?;
        Ok(f(&m.pool, exp))
    })
}

fn get_mut_op(f: fn(&mut Pool, ValueRef) -> ValueRef) -> MachineOp {
    Rc::new(move |m: &mut Machine, args: &[ValueRef]| {
        let exp = value(m, args, 0)?;
        Ok(f(&mut m.pool, exp))
    })
}

fn pred_op(f: fn(&Pool, ValueRef) -> bool) -> MachineOp {
    Rc::new(move |m: &mut Machine, args: &[ValueRef]| {
        let v = value(m, args, 0)?;
        let truth = f(&m.pool, v);
        Ok(m.pool.boolean(truth))
    })
}

/// Bind every op the evaluator program and compiled code may invoke.
fn bind_machine_ops(m: &mut Machine) {
    // per-form checks and accessors
    m.bind_op("check-quoted", check_op(syntax::check_quoted));
    m.bind_op("text-of-quotation", get_op(syntax::get_text_of_quotation));

    m.bind_op("check-assignment", check_op(syntax::check_assignment));
    m.bind_op("assignment-variable", get_op(syntax::get_assignment_variable));
    m.bind_op("assignment-value", get_op(syntax::get_assignment_value));

    m.bind_op("check-definition", check_op(syntax::check_definition));
    m.bind_op("definition-variable", get_op(syntax::get_definition_variable));
    m.bind_op("definition-value", get_mut_op(syntax::get_definition_value));

    m.bind_op("check-if", check_op(syntax::check_if));
    m.bind_op("if-predicate", get_op(syntax::get_if_predicate));
    m.bind_op("if-consequent", get_op(syntax::get_if_consequent));
    m.bind_op("if-alternative", get_mut_op(syntax::get_if_alternative));

    m.bind_op("check-lambda", check_op(syntax::check_lambda));
    m.bind_op("lambda-parameters", get_op(syntax::get_lambda_parameters));
    m.bind_op("lambda-body", get_op(syntax::get_lambda_body));

    m.bind_op("check-let", check_op(syntax::check_let));
    m.bind_op("transform-let", get_mut_op(syntax::transform_let));

    m.bind_op("check-begin", check_op(syntax::check_begin));
    m.bind_op("begin-actions", get_op(syntax::get_begin_actions));

    m.bind_op("check-cond", check_op(syntax::check_cond));
    m.bind_op("transform-cond", get_mut_op(syntax::transform_cond));

    m.bind_op("check-and", check_op(syntax::check_and));
    m.bind_op("and-expressions", get_op(syntax::get_and_expressions));

    m.bind_op("check-or", check_op(syntax::check_or));
    m.bind_op("or-expressions", get_op(syntax::get_or_expressions));

    m.bind_op("check-eval", check_op(syntax::check_eval));
    m.bind_op("eval-expression", get_op(syntax::get_eval_expression));

    m.bind_op("check-apply", check_op(syntax::check_apply));
    m.bind_op("apply-operator", get_op(syntax::get_apply_operator));
    m.bind_op("apply-arguments", get_op(syntax::get_apply_arguments));
    m.bind_op("check-apply-args", check_op(syntax::check_apply_arguments));

    m.bind_op("check-application", check_op(syntax::check_application));

    // truthiness
    m.bind_op("true?", pred_op(|p, v| p.is_truthy(v)));
    m.bind_op("false?", pred_op(|p, v| !p.is_truthy(v)));
    m.bind_op(
        "make-true",
        Rc::new(|m: &mut Machine, _args: &[ValueRef]| Ok(m.pool.boolean(true))),
    );
    m.bind_op(
        "make-false",
        Rc::new(|m: &mut Machine, _args: &[ValueRef]| Ok(m.pool.boolean(false))),
    );

    // sequence and operand walkers
    m.bind_op("no-exps?", pred_op(syntax::has_no_exps));
    m.bind_op("last-exp?", pred_op(syntax::is_last_exp));
    m.bind_op("first-exp", get_op(syntax::get_first_exp));
    m.bind_op("rest-exps", get_op(syntax::get_rest_exps));

    m.bind_op("operator", get_op(syntax::get_operator));
    m.bind_op("operands", get_op(syntax::get_operands));
    m.bind_op("no-operands?", pred_op(syntax::has_no_operands));
    m.bind_op("last-operand?", pred_op(syntax::is_last_operand));
    m.bind_op("first-operand", get_op(syntax::get_first_operand));
    m.bind_op("rest-operands", get_op(syntax::get_rest_operands));

    m.bind_op(
        "make-empty-arglist",
        Rc::new(|_m: &mut Machine, _args: &[ValueRef]| Ok(NIL)),
    );
    m.bind_op(
        "adjoin-arg",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let new_arg = value(m, args, 0)?;
            let arg_list = value(m, args, 1)?;
            Ok(syntax::adjoin_arg(&mut m.pool, new_arg, arg_list))
        }),
    );

    // procedures
    m.bind_op("primitive-procedure?", pred_op(syntax::is_primitive_procedure));
    m.bind_op("compound-procedure?", pred_op(syntax::is_compound_procedure));
    m.bind_op("compiled-procedure?", pred_op(syntax::is_compiled_procedure));

    m.bind_op("compound-parameters", get_op(syntax::get_compound_parameters));
    m.bind_op("compound-body", get_op(syntax::get_compound_body));
    m.bind_op("compound-environment", get_op(syntax::get_compound_environment));
    m.bind_op(
        "make-compound-procedure",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let params = value(m, args, 0)?;
            let body = value(m, args, 1)?;
            let env = value(m, args, 2)?;
            Ok(m.pool.compound(params, body, env))
        }),
    );

    m.bind_op("compiled-entry", get_op(syntax::get_compiled_entry));
    m.bind_op("compiled-environment", get_op(syntax::get_compiled_environment));
    m.bind_op(
        "make-compiled-procedure",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let entry = value(m, args, 0)?;
            let env = value(m, args, 1)?;
            Ok(m.pool.compiled(entry, env))
        }),
    );

    // errors
    m.bind_op(
        "signal-error",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let fmt_v = value(m, args, 0)?;
            let fmt = match m.pool.get(fmt_v) {
                Value::Str(s) => s.clone(),
                other => {
                    return Err(format!(
                        "signal-error expects a string format, got {}",
                        other.type_name()
                    ));
                }
            };
            let mut rest = Vec::with_capacity(args.len().saturating_sub(1));
            for arg_cell in &args[1..] {
                rest.push(m.pool.car(*arg_cell));
            }
            let rest = m.pool.list(&rest);
            let message = format_message(&m.pool, &fmt, rest);
            Ok(m.pool.error(message))
        }),
    );

    m.bind_op(
        "apply-primitive-procedure",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let proc = value(m, args, 0)?;
            let arglist = value(m, args, 1)?;
            let (name, f) = match m.pool.get(proc) {
                Value::Primitive { name, f } => (name.clone(), f.clone()),
                _ => {
                    return Err(format!(
                        "can't apply {} as a primitive",
                        m.pool.display(proc)
                    ));
                }
            };
            match f(m, arglist) {
                Ok(v) if m.pool.is_error(v) => {
                    // attach the primitive's name to its error
                    let message = format!("{name}: {}", m.pool.display(v));
                    Ok(m.pool.error(message))
                }
                Ok(v) => Ok(v),
                Err(message) => Err(format!("{name}: {message}")),
            }
        }),
    );

    // environments
    m.bind_op(
        "lookup-variable-value",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let name_v = value(m, args, 0)?;
            let genv = value(m, args, 1)?;
            let Some(name) = m.pool.symbol_name(name_v).map(str::to_string) else {
                return Err(format!(
                    "can't look up a non-symbol: {}",
                    m.pool.display(name_v)
                ));
            };
            match env::get(&m.pool, genv, &name) {
                Some(v) => Ok(v),
                None => Err(format!("{name} is unbound")),
            }
        }),
    );

    m.bind_op(
        "set-variable-value!",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let name_v = value(m, args, 0)?;
            let val = value(m, args, 1)?;
            let env_v = value(m, args, 2)?;
            let Some(name) = m.pool.symbol_name(name_v).map(str::to_string) else {
                return Err(format!(
                    "can't assign a non-symbol: {}",
                    m.pool.display(name_v)
                ));
            };
            match env::lookup(&m.pool, env_v, &name, true) {
                Some(record) => {
                    env::update_record(&mut m.pool, record, val);
                    Ok(NIL)
                }
                None => Err(format!("{name} is unbound")),
            }
        }),
    );

    m.bind_op(
        "define-variable!",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let name_v = value(m, args, 0)?;
            let val = value(m, args, 1)?;
            let env_v = value(m, args, 2)?;
            let Some(name) = m.pool.symbol_name(name_v).map(str::to_string) else {
                return Err(format!(
                    "can't define a non-symbol: {}",
                    m.pool.display(name_v)
                ));
            };
            match env::lookup(&m.pool, env_v, &name, false) {
                Some(record) => {
                    env::update_record(&mut m.pool, record, val);
                    Ok(m.pool.info(format!("{name} is updated")))
                }
                None => {
                    env::define(&mut m.pool, env_v, &name, val);
                    Ok(m.pool.info(format!("{name} is defined")))
                }
            }
        }),
    );

    m.bind_op("extend-environment", Rc::new(op_extend_environment));

    // the evaluator's dispatch table
    m.bind_op(
        "dispatch-table-ready?",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            // receives the dispatch register cell itself
            let dispatch_cell = cell(args, 0)?;
            let ready = !m.pool.is_nil(m.pool.car(dispatch_cell));
            Ok(m.pool.boolean(ready))
        }),
    );
    m.bind_op(
        "make-dispatch-table",
        Rc::new(|m: &mut Machine, _args: &[ValueRef]| Ok(m.pool.environment())),
    );
    m.bind_op(
        "add-dispatch-record",
        Rc::new(|m: &mut Machine, args: &[ValueRef]| {
            let dispatch = value(m, args, 0)?;
            let name_v = value(m, args, 1)?;
            // the label cell itself, so the record tracks late resolution
            let label_cell = cell(args, 2)?;
            let Some(name) = m.pool.symbol_name(name_v).map(str::to_string) else {
                return Err(format!(
                    "dispatch record name must be a symbol, got {}",
                    m.pool.display(name_v)
                ));
            };
            env::define(&mut m.pool, dispatch, &name, label_cell);
            Ok(dispatch)
        }),
    );
    m.bind_op("dispatch-on-type", Rc::new(op_dispatch_on_type));
}

/// Bind parameters to arguments in a fresh frame over the procedure's
/// environment. Parameters may be a proper list, a dotted list whose tail
/// swallows the remaining arguments, or a single symbol taking them all.
fn op_extend_environment(m: &mut Machine, args: &[ValueRef]) -> Result<ValueRef, String> {
    let names = value(m, args, 0)?;
    let values = value(m, args, 1)?;
    let parent = value(m, args, 2)?;

    // arity walk before binding anything
    let mut n = names;
    let mut v = values;
    let matches = loop {
        if m.pool.is_symbol(n) {
            break true;
        }
        match (m.pool.is_pair(n), m.pool.is_pair(v)) {
            (true, true) => {
                n = m.pool.cdr(n);
                v = m.pool.cdr(v);
            }
            (false, false) if m.pool.is_nil(n) && m.pool.is_nil(v) => break true,
            _ => break false,
        }
    };
    if !matches {
        let proc = m.register_value("proc");
        return Err(format!(
            "the arguments {} don't match {}",
            m.pool.display(values),
            m.pool.display(proc)
        ));
    }

    let genv = m.pool.environment();
    let mut n = names;
    let mut v = values;
    loop {
        if let Some(name) = m.pool.symbol_name(n).map(str::to_string) {
            // dotted tail or single-symbol parameter list
            env::define(&mut m.pool, genv, &name, v);
            break;
        }
        if m.pool.is_nil(n) {
            break;
        }
        let param = m.pool.car(n);
        let Some(name) = m.pool.symbol_name(param).map(str::to_string) else {
            return Err(format!(
                "parameter is not a symbol: {}",
                m.pool.display(param)
            ));
        };
        let arg_value = m.pool.car(v);
        env::define(&mut m.pool, genv, &name, arg_value);
        n = m.pool.cdr(n);
        v = m.pool.cdr(v);
    }

    Ok(env::extend(&mut m.pool, genv, parent))
}

/// Pick the evaluator label for an expression: `self` for self-evaluating,
/// `var` for symbols, the head symbol for candidate special forms, and
/// `default` otherwise (or when the head has no record).
fn op_dispatch_on_type(m: &mut Machine, args: &[ValueRef]) -> Result<ValueRef, String> {
    let exp = value(m, args, 0)?;
    let dispatch = value(m, args, 1)?;

    let key = if syntax::is_self_evaluating(&m.pool, exp) {
        Some("self".to_string())
    } else if syntax::is_variable(&m.pool, exp) {
        Some("var".to_string())
    } else if syntax::starts_with_symbol(&m.pool, exp) {
        m.pool.symbol_name(m.pool.car(exp)).map(str::to_string)
    } else {
        None
    };

    let record = key
        .and_then(|key| env::lookup(&m.pool, dispatch, &key, false))
        .or_else(|| env::lookup(&m.pool, dispatch, "default", false));
    match record {
        Some(record) => {
            let label_cell = env::record_value(&m.pool, record);
            Ok(m.pool.car(label_cell))
        }
        None => Err("the dispatch table has no default entry".to_string()),
    }
}
