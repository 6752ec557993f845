//! The register machine
//!
//! A machine owns its pool. All machine state - register cells, label
//! cells, op bindings, the constants chain, the instruction chain, and the
//! stack - lives in that pool, linked from a backbone of holder pairs that
//! is registered as the single GC root. The program counter walks the
//! instruction chain; nil means halted.
//!
//! Failure protocol: an op returning an Error value (or an `Err`) writes
//! the error to the output register and nils the PC. An unbound op or an
//! undeclared label does the same with a synthesized error. Structural
//! misuse (a non-instruction in the code chain, car of an atom) is a
//! programming error in the compiler or the loaded program and panics.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::code::{Code, Token};
use crate::pool::Pool;
use crate::value::{MachineOp, NIL, OpCell, Value, ValueRef};

/// A decoded instruction. Operands are resolved to cells in the machine's
/// pool: register cells and label cells are `(contents . name)` pairs,
/// constant cells are links of the constants chain whose car is the value.
#[derive(Clone)]
pub enum Insn {
    AssignCall {
        dst: ValueRef,
        op: ValueRef,
        args: Vec<ValueRef>,
    },
    AssignCopy {
        dst: ValueRef,
        src: ValueRef,
    },
    Perform {
        op: ValueRef,
        args: Vec<ValueRef>,
    },
    Branch {
        label: ValueRef,
        label_name: String,
        op: ValueRef,
        args: Vec<ValueRef>,
    },
    Goto {
        target: ValueRef,
        /// Set when the target is a label token, for the unbound check.
        label_name: Option<String>,
    },
    Save {
        reg: ValueRef,
    },
    Restore {
        reg: ValueRef,
    },
}

impl Insn {
    /// Cell handles held by this instruction, in a fixed order.
    pub fn children(&self) -> Vec<ValueRef> {
        match self {
            Insn::AssignCall { dst, op, args } => {
                let mut refs = vec![*dst, *op];
                refs.extend_from_slice(args);
                refs
            }
            Insn::AssignCopy { dst, src } => vec![*dst, *src],
            Insn::Perform { op, args } => {
                let mut refs = vec![*op];
                refs.extend_from_slice(args);
                refs
            }
            Insn::Branch { label, op, args, .. } => {
                let mut refs = vec![*label, *op];
                refs.extend_from_slice(args);
                refs
            }
            Insn::Goto { target, .. } => vec![*target],
            Insn::Save { reg } | Insn::Restore { reg } => vec![*reg],
        }
    }

    /// Replace held handles; `new` must match [`Insn::children`]'s layout.
    pub fn rewrite_children(&mut self, new: &[ValueRef]) {
        match self {
            Insn::AssignCall { dst, op, args } => {
                *dst = new[0];
                *op = new[1];
                args.copy_from_slice(&new[2..]);
            }
            Insn::AssignCopy { dst, src } => {
                *dst = new[0];
                *src = new[1];
            }
            Insn::Perform { op, args } => {
                *op = new[0];
                args.copy_from_slice(&new[1..]);
            }
            Insn::Branch { label, op, args, .. } => {
                *label = new[0];
                *op = new[1];
                args.copy_from_slice(&new[2..]);
            }
            Insn::Goto { target, .. } => *target = new[0],
            Insn::Save { reg } | Insn::Restore { reg } => *reg = new[0],
        }
    }
}

/// The register machine.
pub struct Machine {
    /// The machine's heap. Public so ops can allocate results directly.
    pub pool: Pool,

    registers: HashMap<String, ValueRef>,
    labels: HashMap<String, ValueRef>,
    ops: HashMap<String, ValueRef>,
    declared_labels: HashSet<String>,

    // holder pairs, all reachable from the rooted backbone
    registers_holder: ValueRef,
    constants_holder: ValueRef,
    labels_holder: ValueRef,
    ops_holder: ValueRef,
    code_holder: ValueRef,
    stack_holder: ValueRef,

    code_tail: ValueRef,
    pc: ValueRef,
    output: ValueRef,
    output_name: String,

    /// Jump requested by an op mid-instruction; taken when the current
    /// instruction completes.
    pending_jump: Option<ValueRef>,

    trace: u8,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Machine {
    /// Create an empty machine whose run results land in `output_register`.
    pub fn new(output_register: &str) -> Machine {
        let mut pool = Pool::new();

        let registers_holder = pool.pair(NIL, NIL);
        let constants_holder = pool.pair(NIL, NIL);
        let labels_holder = pool.pair(NIL, NIL);
        let ops_holder = pool.pair(NIL, NIL);
        let code_holder = pool.pair(NIL, NIL);
        let stack_holder = pool.pair(NIL, NIL);
        let backbone = pool.list(&[
            registers_holder,
            constants_holder,
            labels_holder,
            ops_holder,
            code_holder,
            stack_holder,
        ]);
        pool.register_root(backbone);

        let mut machine = Machine {
            pool,
            registers: HashMap::new(),
            labels: HashMap::new(),
            ops: HashMap::new(),
            declared_labels: HashSet::new(),
            registers_holder,
            constants_holder,
            labels_holder,
            ops_holder,
            code_holder,
            stack_holder,
            code_tail: NIL,
            pc: NIL,
            output: NIL,
            output_name: output_register.to_string(),
            pending_jump: None,
            trace: 0,
            interrupt: None,
        };
        machine.output = machine.register_cell(output_register);
        tracing::debug!(output = output_register, "machine created");
        machine
    }

    /// Create a machine preloaded with `code`; constants are imported from
    /// `src`.
    pub fn with_code(src: &Pool, code: &[Code], output_register: &str) -> Result<Machine, String> {
        let mut machine = Machine::new(output_register);
        machine.load(src, code)?;
        Ok(machine)
    }

    /// Append `code` to the instruction chain, importing constants from
    /// `src`.
    pub fn load(&mut self, src: &Pool, code: &[Code]) -> Result<(), String> {
        self.append_code(Some(src), code)?;
        Ok(())
    }

    /// Append `code` whose constant handles already live in this machine's
    /// pool, and arrange for execution to continue at its first
    /// instruction once the current one completes.
    pub fn append_and_jump(&mut self, code: &[Code]) -> Result<(), String> {
        let head = self.append_code(None, code)?;
        self.pending_jump = Some(head);
        Ok(())
    }

    /// Attach a host function to the named op. Binding may happen before or
    /// after code referencing the op is loaded.
    pub fn bind_op(&mut self, name: &str, f: MachineOp) {
        let cell = self.op_cell(name);
        match self.pool.get_mut(cell) {
            Value::Op(op) => op.f = Some(f),
            _ => unreachable!(),
        }
    }

    /// Per-instruction trace level: 0 = off, 1 = headers, 2 = full state.
    pub fn set_trace(&mut self, level: u8) {
        self.trace = level;
    }

    pub fn trace(&self) -> u8 {
        self.trace
    }

    /// Install the interrupt flag polled between instructions.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    pub fn output_register(&self) -> &str {
        &self.output_name
    }

    // register access

    /// The register's cell, created on first reference.
    pub fn register_cell(&mut self, name: &str) -> ValueRef {
        if let Some(cell) = self.registers.get(name) {
            return *cell;
        }
        let name_sym = self.pool.symbol(name);
        let cell = self.pool.pair(NIL, name_sym);
        let chain = self.pool.car(self.registers_holder);
        let chain = self.pool.pair(cell, chain);
        self.pool.set_car(self.registers_holder, chain);
        self.registers.insert(name.to_string(), cell);
        cell
    }

    /// Current contents of a register (a handle into the machine's pool).
    pub fn register_value(&mut self, name: &str) -> ValueRef {
        let cell = self.register_cell(name);
        self.pool.car(cell)
    }

    /// Set a register from a handle already in the machine's pool.
    pub fn set_register(&mut self, name: &str, v: ValueRef) {
        let cell = self.register_cell(name);
        self.pool.set_car(cell, v);
    }

    /// Host write: import `v` from `src` and store it in the register.
    pub fn write_to_register(&mut self, name: &str, src: &Pool, v: ValueRef) {
        let imported = self.pool.import(src, v);
        self.set_register(name, imported);
    }

    /// Host read: export the register's contents into `dst`.
    pub fn read_from_register(&mut self, name: &str, dst: &mut Pool) -> ValueRef {
        let v = self.register_value(name);
        self.pool.export(dst, v)
    }

    /// Export the nominated output register.
    pub fn read_output(&mut self, dst: &mut Pool) -> ValueRef {
        let name = self.output_name.clone();
        self.read_from_register(&name, dst)
    }

    // running

    /// Write `inputs` (imported from `src`), execute from the chain head to
    /// halt, then export the output register into `dst`.
    pub fn run(&mut self, src: &Pool, inputs: &[(&str, ValueRef)], dst: &mut Pool) -> ValueRef {
        for (name, v) in inputs {
            self.write_to_register(name, src, *v);
        }
        self.execute();
        self.read_output(dst)
    }

    /// Execute from the chain head until the PC is nil, then collect
    /// garbage. The stack is cleared on entry.
    pub fn execute(&mut self) {
        self.pool.set_car(self.stack_holder, NIL);
        self.pc = self.pool.car(self.code_holder);

        while self.pc != NIL {
            let interrupted = self
                .interrupt
                .as_ref()
                .is_some_and(|flag| flag.swap(false, Ordering::SeqCst));
            if interrupted {
                tracing::info!("machine interrupted");
                let error = self.pool.error("interrupted");
                self.halt_with(error);
                break;
            }
            if self.trace > 0 {
                self.trace_step();
            }
            self.step();
        }

        self.pool.collect();
    }

    fn step(&mut self) {
        let insn_ref = self.pool.car(self.pc);
        let insn = match self.pool.get(insn_ref) {
            Value::Insn { insn, .. } => insn.clone(),
            other => panic!("non-instruction in code chain: {}", other.type_name()),
        };

        match insn {
            Insn::AssignCall { dst, op, args } => match self.call_op(op, &args) {
                Ok(result) => {
                    self.pool.set_car(dst, result);
                    self.finish_call();
                }
                Err(error) => self.halt_with(error),
            },
            Insn::AssignCopy { dst, src } => {
                let v = self.pool.car(src);
                self.pool.set_car(dst, v);
                self.advance();
            }
            Insn::Perform { op, args } => match self.call_op(op, &args) {
                Ok(_) => self.finish_call(),
                Err(error) => self.halt_with(error),
            },
            Insn::Branch {
                label,
                label_name,
                op,
                args,
            } => match self.call_op(op, &args) {
                Ok(result) if self.pool.is_truthy(result) => {
                    if !self.declared_labels.contains(&label_name) {
                        let error = self
                            .pool
                            .error(format!("label '{label_name}' is unbound"));
                        self.halt_with(error);
                    } else {
                        self.pc = self.pool.car(label);
                    }
                }
                Ok(_) => self.advance(),
                Err(error) => self.halt_with(error),
            },
            Insn::Goto { target, label_name } => {
                if let Some(name) = &label_name {
                    if !self.declared_labels.contains(name) {
                        let error = self.pool.error(format!("label '{name}' is unbound"));
                        self.halt_with(error);
                        return;
                    }
                }
                self.pc = self.pool.car(target);
            }
            Insn::Save { reg } => {
                let v = self.pool.car(reg);
                let stack = self.pool.car(self.stack_holder);
                let stack = self.pool.pair(v, stack);
                self.pool.set_car(self.stack_holder, stack);
                self.advance();
            }
            Insn::Restore { reg } => {
                let stack = self.pool.car(self.stack_holder);
                if stack == NIL {
                    let error = self.pool.error("can't pop from empty stack");
                    self.halt_with(error);
                    return;
                }
                let top = self.pool.car(stack);
                let rest = self.pool.cdr(stack);
                self.pool.set_car(reg, top);
                self.pool.set_car(self.stack_holder, rest);
                self.advance();
            }
        }
    }

    /// Call the op behind `op_cell`; an unbound op, an `Err` result, and a
    /// returned Error value all come back as `Err` with the error value.
    fn call_op(&mut self, op_cell: ValueRef, args: &[ValueRef]) -> Result<ValueRef, ValueRef> {
        let f = match self.pool.get(op_cell) {
            Value::Op(OpCell { f: Some(f), .. }) => f.clone(),
            Value::Op(OpCell { name, .. }) => {
                let message = format!("op '{name}' is unbound");
                return Err(self.pool.error(message));
            }
            other => panic!("calling a non-op: {}", other.type_name()),
        };
        match f(self, args) {
            Ok(v) if self.pool.is_error(v) => Err(v),
            Ok(v) => Ok(v),
            Err(message) => {
                let error = self.pool.error(message);
                Err(error)
            }
        }
    }

    fn finish_call(&mut self) {
        match self.pending_jump.take() {
            Some(head) => self.pc = head,
            None => self.advance(),
        }
    }

    fn advance(&mut self) {
        self.pc = self.pool.cdr(self.pc);
    }

    fn halt_with(&mut self, error: ValueRef) {
        self.pool.set_car(self.output, error);
        self.pc = NIL;
    }

    fn trace_step(&self) {
        let insn_ref = self.pool.car(self.pc);
        if let Value::Insn { text, .. } = self.pool.get(insn_ref) {
            println!("[trace] {text}");
        }
        if self.trace >= 2 {
            let mut names: Vec<&String> = self.registers.keys().collect();
            names.sort();
            for name in names {
                let cell = self.registers[name];
                let v = self.pool.car(cell);
                // positions in the code chain would render as the whole
                // remaining program
                let rendered = match self.pool.get(v) {
                    Value::Pair { car, .. }
                        if matches!(self.pool.get(*car), Value::Insn { .. }) =>
                    {
                        "<code>".to_string()
                    }
                    _ => self.pool.display(v),
                };
                println!("[trace]   {name} = {rendered}");
            }
            let stack = self.pool.car(self.stack_holder);
            println!("[trace]   stack depth = {}", self.pool.list_len(stack));
        }
    }

    // cell management

    fn label_cell(&mut self, name: &str) -> ValueRef {
        if let Some(cell) = self.labels.get(name) {
            return *cell;
        }
        let name_sym = self.pool.symbol(name);
        let cell = self.pool.pair(NIL, name_sym);
        let chain = self.pool.car(self.labels_holder);
        let chain = self.pool.pair(cell, chain);
        self.pool.set_car(self.labels_holder, chain);
        self.labels.insert(name.to_string(), cell);
        cell
    }

    fn op_cell(&mut self, name: &str) -> ValueRef {
        if let Some(cell) = self.ops.get(name) {
            return *cell;
        }
        let cell = self.pool.op(name);
        let chain = self.pool.car(self.ops_holder);
        let chain = self.pool.pair(cell, chain);
        self.pool.set_car(self.ops_holder, chain);
        self.ops.insert(name.to_string(), cell);
        cell
    }

    /// Keep a constant alive by linking it into the constants chain; the
    /// chain link doubles as the constant's cell.
    fn constant_cell(&mut self, v: ValueRef) -> ValueRef {
        let chain = self.pool.car(self.constants_holder);
        let cell = self.pool.pair(v, chain);
        self.pool.set_car(self.constants_holder, cell);
        cell
    }

    fn token_to_cell(&mut self, src: Option<&Pool>, token: &Token) -> Result<ValueRef, String> {
        match token {
            Token::Reg(name) => Ok(self.register_cell(name)),
            Token::Label(name) => Ok(self.label_cell(name)),
            Token::Const(v) => {
                let v = match src {
                    Some(src) => self.pool.import(src, *v),
                    None => *v,
                };
                Ok(self.constant_cell(v))
            }
            Token::Op(name) => Err(format!("misplaced op token '{name}'")),
        }
    }

    fn tokens_to_cells(
        &mut self,
        src: Option<&Pool>,
        tokens: &[Token],
    ) -> Result<Vec<ValueRef>, String> {
        tokens
            .iter()
            .map(|t| self.token_to_cell(src, t))
            .collect()
    }

    /// Append code lines to the instruction chain. Consecutive labels
    /// resolve to the instruction that follows them; labels at the very end
    /// resolve to nil. Returns the first appended instruction.
    fn append_code(&mut self, src: Option<&Pool>, code: &[Code]) -> Result<ValueRef, String> {
        let mut head = NIL;
        let mut tail = NIL;
        let mut label_queue: Vec<String> = Vec::new();

        for line in code {
            if let Code::Label(name) = line {
                self.declared_labels.insert(name.clone());
                label_queue.push(name.clone());
                continue;
            }

            let text = line.render(src.unwrap_or(&self.pool));
            let insn = self.decode(src, line)?;
            let insn_val = self.pool.insn(insn, text);
            let new_pair = self.pool.pair(insn_val, NIL);

            if head == NIL {
                head = new_pair;
            } else {
                self.pool.set_cdr(tail, new_pair);
            }
            tail = new_pair;

            for name in label_queue.drain(..) {
                let cell = self.label_cell(&name);
                self.pool.set_car(cell, new_pair);
            }
        }

        if head == NIL {
            return Err("can't append empty code".to_string());
        }
        for name in label_queue.drain(..) {
            let cell = self.label_cell(&name);
            self.pool.set_car(cell, NIL);
        }

        if self.code_tail == NIL {
            self.pool.set_car(self.code_holder, head);
        } else {
            self.pool.set_cdr(self.code_tail, head);
        }
        self.code_tail = tail;

        tracing::debug!(lines = code.len(), "code appended");
        Ok(head)
    }

    fn decode(&mut self, src: Option<&Pool>, line: &Code) -> Result<Insn, String> {
        match line {
            Code::Label(_) => unreachable!("labels are consumed before decoding"),
            Code::AssignCall { reg, op, args } => Ok(Insn::AssignCall {
                dst: self.register_cell(reg),
                op: self.op_cell(op),
                args: self.tokens_to_cells(src, args)?,
            }),
            Code::AssignCopy { reg, src: token } => Ok(Insn::AssignCopy {
                dst: self.register_cell(reg),
                src: self.token_to_cell(src, token)?,
            }),
            Code::Perform { op, args } => Ok(Insn::Perform {
                op: self.op_cell(op),
                args: self.tokens_to_cells(src, args)?,
            }),
            Code::Branch { label, op, args } => Ok(Insn::Branch {
                label: self.label_cell(label),
                label_name: label.clone(),
                op: self.op_cell(op),
                args: self.tokens_to_cells(src, args)?,
            }),
            Code::Goto { target } => {
                let label_name = match target {
                    Token::Label(name) => Some(name.clone()),
                    _ => None,
                };
                Ok(Insn::Goto {
                    target: self.token_to_cell(src, target)?,
                    label_name,
                })
            }
            Code::Save { reg } => Ok(Insn::Save {
                reg: self.register_cell(reg),
            }),
            Code::Restore { reg } => Ok(Insn::Restore {
                reg: self.register_cell(reg),
            }),
        }
    }
}
