//! Sandboxed executor
//!
//! A tree-walking interpreter over a validated [`ExecutableUnit`]. Names
//! resolve through the script's own scopes and then the
//! [`CapabilityEnvironment`]; there is no ambient scope behind it.
//!
//! Every statement, loop iteration and call is charged against a step
//! budget, and the [`Interrupt`] flag is polled on every charge.

use crate::ast::{BinOp, CmpOp, Comprehension, Expr, Program, Stmt, StmtKind, UnaryOp};
use crate::builtins::{self, CallArgs};
use crate::capabilities::{is_forbidden_name, Binding, CapabilityEnvironment, Console};
use crate::validator::ExecutableUnit;
use crate::value::{
    binary_op, normalize_index, range_len, slice_indices, BoundMethod, Function, HeapScope, Key,
    Value,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Stack size for threads that run the interpreter.
pub const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

const BYTES_PER_STEP: usize = 64;

/// Faults raised while executing validated code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("NameError: name '{0}' is not defined")]
    Name(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("ValueError: {0}")]
    Value(String),

    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(String),

    #[error("IndexError: {0}")]
    Index(String),

    #[error("KeyError: {0}")]
    Key(String),

    #[error("AttributeError: {0}")]
    Attribute(String),

    #[error("OverflowError: {0}")]
    Overflow(String),

    #[error("AssertionError: {0}")]
    Assertion(String),

    #[error("Capability denied: {0}")]
    CapabilityDenied(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExhausted(String),

    #[error("Execution interrupted")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}

type RtResult<T> = Result<T, RuntimeError>;

/// Bounds on a single execution.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub max_steps: u64,
    pub max_call_depth: usize,
    /// Elements per list/tuple/dict, characters per string, bytes per read.
    pub max_sequence_len: usize,
    /// Wall-clock budget enforced by whoever owns the [`Interrupt`].
    pub timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 64,
            max_sequence_len: 10_000_000,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cooperative cancellation flag shared with a watchdog.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(AtomicOrdering::Relaxed)
    }
}

/// Runs validated units inside a capability environment.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    limits: ExecutionLimits,
    interrupt: Interrupt,
}

impl Executor {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Execute `unit` with only the bindings in `env` visible.
    ///
    /// Faults in the interpreter itself surface as [`RuntimeError::Internal`].
    pub fn run(&self, unit: &ExecutableUnit, env: CapabilityEnvironment) -> RtResult<()> {
        let heap = HeapScope::enter();
        let mut interp = Interpreter::new(&env, &self.limits, &self.interrupt);
        let result = catch_unwind(AssertUnwindSafe(|| interp.exec_program(unit.program())));
        let steps = interp.steps;
        drop(interp);
        drop(heap);

        match result {
            Ok(result) => {
                tracing::debug!(steps, ok = result.is_ok(), "execution finished");
                result
            }
            Err(_) => {
                tracing::error!(steps, "interpreter panicked");
                Err(RuntimeError::Internal("interpreter fault".to_string()))
            }
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub(crate) struct Interpreter<'a> {
    env: &'a CapabilityEnvironment,
    limits: &'a ExecutionLimits,
    interrupt: &'a Interrupt,
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    steps: u64,
}

impl<'a> Interpreter<'a> {
    fn new(
        env: &'a CapabilityEnvironment,
        limits: &'a ExecutionLimits,
        interrupt: &'a Interrupt,
    ) -> Self {
        Self {
            env,
            limits,
            interrupt,
            globals: HashMap::new(),
            frames: Vec::new(),
            steps: 0,
        }
    }

    pub(crate) fn console(&self) -> &Console {
        self.env.console()
    }

    pub(crate) fn max_sequence_len(&self) -> usize {
        self.limits.max_sequence_len
    }

    /// Charge `n` steps against the budget.
    pub(crate) fn charge(&mut self, n: u64) -> RtResult<()> {
        if self.interrupt.is_triggered() {
            return Err(RuntimeError::Interrupted);
        }
        self.steps = self.steps.saturating_add(n);
        if self.steps > self.limits.max_steps {
            return Err(RuntimeError::ResourceExhausted(format!(
                "step budget of {} exceeded",
                self.limits.max_steps
            )));
        }
        Ok(())
    }

    /// Charge for scanning or producing `n` bytes of text.
    pub(crate) fn charge_bytes(&mut self, n: usize) -> RtResult<()> {
        self.charge((n / BYTES_PER_STEP) as u64)
    }

    fn tick(&mut self) -> RtResult<()> {
        self.charge(1)
    }

    pub(crate) fn check_len(&self, len: usize) -> RtResult<()> {
        if len > self.limits.max_sequence_len {
            return Err(RuntimeError::ResourceExhausted(format!(
                "sequence of {} items exceeds the limit of {}",
                len, self.limits.max_sequence_len
            )));
        }
        Ok(())
    }

    // --- statements ---

    fn exec_program(&mut self, program: &Program) -> RtResult<()> {
        match self.exec_block(&program.body)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => {
                Err(RuntimeError::Internal("loop control outside loop".to_string()))
            }
        }
    }

    fn exec_block(&mut self, body: &[Stmt]) -> RtResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> RtResult<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy() { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body } => loop {
                self.tick()?;
                if !self.eval(test)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => return self.exec_for(target, iter, body),
            StmtKind::FunctionDef(def) => {
                let defaults = def
                    .params
                    .iter()
                    .filter_map(|p| p.default.as_ref())
                    .map(|d| self.eval(d))
                    .collect::<RtResult<Vec<_>>>()?;
                let function = Value::Function(Rc::new(Function {
                    def: def.clone(),
                    defaults,
                }));
                self.store(&def.name, function)?;
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(v) => self.eval(v)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval(m)?.to_display(),
                        None => "assertion failed".to_string(),
                    };
                    return Err(RuntimeError::Assertion(message));
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import(_) | StmtKind::ImportFrom { .. } => {
                return Err(RuntimeError::CapabilityDenied("import".to_string()))
            }
            StmtKind::Global(_) => return Err(RuntimeError::CapabilityDenied("global".to_string())),
            StmtKind::Nonlocal(_) => {
                return Err(RuntimeError::CapabilityDenied("nonlocal".to_string()))
            }
            StmtKind::Unsupported(construct) => {
                return Err(RuntimeError::CapabilityDenied(construct.to_string()))
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt]) -> RtResult<Flow> {
        let iterable = self.eval(iter)?;

        // ranges are walked lazily
        if let Value::Range { start, stop, step } = iterable {
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                self.tick()?;
                self.assign(target, Value::Int(i))?;
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                i = match i.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            return Ok(Flow::Normal);
        }

        for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> RtResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.augmented(op, current, rhs)?;
                self.store(name, updated)
            }
            Expr::Subscript { value: obj, index } => {
                if matches!(**index, Expr::Slice { .. }) {
                    return Err(RuntimeError::Type(
                        "augmented assignment to a slice is not supported".to_string(),
                    ));
                }
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                let current = self.get_item(&container, &key)?;
                let rhs = self.eval(value)?;
                let updated = self.augmented(op, current, rhs)?;
                self.set_item(&container, key, updated)
            }
            _ => Err(RuntimeError::CapabilityDenied(
                "attribute assignment".to_string(),
            )),
        }
    }

    /// `+=` extends lists in place; everything else rebinds.
    fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> RtResult<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let extra = self.iterate(&rhs)?;
            self.check_len(list.items.borrow().len() + extra.len())?;
            self.charge(extra.len() as u64)?;
            list.items.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(op, &current, &rhs)
    }

    fn assign(&mut self, target: &Expr, value: Value) -> RtResult<()> {
        match target {
            Expr::Name(name) => self.store(name, value),
            Expr::Subscript { value: obj, index } => {
                let container = self.eval(obj)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.set_slice(&container, bounds, value);
                }
                let key = self.eval(index)?;
                self.set_item(&container, key, value)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() < targets.len() {
                    return Err(RuntimeError::Value(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(RuntimeError::Value(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Expr::Attribute { .. } => Err(RuntimeError::CapabilityDenied(
                "attribute assignment".to_string(),
            )),
            _ => Err(RuntimeError::Internal("invalid assignment target".to_string())),
        }
    }

    fn delete(&mut self, target: &Expr) -> RtResult<()> {
        match target {
            Expr::Name(name) => {
                let scope = match self.frames.last_mut() {
                    Some(frame) => frame,
                    None => &mut self.globals,
                };
                scope
                    .remove(name.as_str())
                    .map(|_| ())
                    .ok_or_else(|| RuntimeError::Name(name.clone()))
            }
            Expr::Subscript { value: obj, index } => {
                let container = self.eval(obj)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.del_slice(&container, bounds);
                }
                let key = self.eval(index)?;
                self.del_item(&container, &key)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                targets.iter().try_for_each(|t| self.delete(t))
            }
            Expr::Attribute { .. } => Err(RuntimeError::CapabilityDenied(
                "attribute deletion".to_string(),
            )),
            _ => Err(RuntimeError::Internal("invalid deletion target".to_string())),
        }
    }

    // --- names ---

    fn lookup(&self, name: &str) -> RtResult<Value> {
        if is_forbidden_name(name) {
            return Err(RuntimeError::Name(name.to_string()));
        }
        if let Some(value) = self.frames.last().and_then(|frame| frame.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(Binding::Data(handle)) = self.env.binding(name) {
            return Ok(Value::Data(handle.clone()));
        }
        if let Some(builtin) = self.env.builtin(name) {
            return Ok(Value::Builtin(builtin));
        }
        Err(RuntimeError::Name(name.to_string()))
    }

    fn store(&mut self, name: &str, value: Value) -> RtResult<()> {
        if is_forbidden_name(name) {
            return Err(RuntimeError::CapabilityDenied(format!("name '{}'", name)));
        }
        let scope = match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        };
        scope.insert(name.to_string(), value);
        Ok(())
    }

    // --- expressions ---

    fn eval(&mut self, expr: &Expr) -> RtResult<Value> {
        match expr {
            Expr::Name(name) => self.lookup(name),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s.as_str())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let mut map = indexmap::IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = self.eval(k)?.to_key()?;
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            Expr::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehend(generators, elt, &mut out)?;
                Ok(Value::list(out))
            }
            Expr::Attribute { value, attr } => {
                let receiver = self.eval(value)?;
                self.attribute(receiver, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = &**index {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.get_slice(&container, bounds);
                }
                let key = self.eval(index)?;
                self.get_item(&container, &key)
            }
            Expr::Slice { .. } => Err(RuntimeError::Type(
                "slice is only valid inside a subscript".to_string(),
            )),
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let positional = self.eval_all(args)?;
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, value) in kwargs {
                    keywords.push((name.clone(), self.eval(value)?));
                }
                self.call_value(&func, CallArgs::new(positional, keywords))
            }
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::And(a, b) => {
                let left = self.eval(a)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(b)
            }
            Expr::Or(a, b) => {
                let left = self.eval(a)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(b)
            }
            Expr::Compare { left, ops } => {
                let mut left = self.eval(left)?;
                for (op, right) in ops {
                    let right = self.eval(right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda { .. } => Err(RuntimeError::CapabilityDenied("lambda".to_string())),
            Expr::Unsupported(construct) => {
                Err(RuntimeError::CapabilityDenied(construct.to_string()))
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> RtResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    pub(crate) fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> RtResult<Value> {
        let result = binary_op(op, left, right, self.limits.max_sequence_len)?;
        match &result {
            Value::Str(s) => self.charge_bytes(s.len())?,
            Value::List(l) => self.charge(l.items.borrow().len() as u64)?,
            Value::Tuple(t) => self.charge(t.items.len() as u64)?,
            _ => {}
        }
        Ok(result)
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        elt: &Expr,
        out: &mut Vec<Value>,
    ) -> RtResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            self.check_len(out.len() + 1)?;
            out.push(self.eval(elt)?);
            return Ok(());
        };

        let iterable = self.eval(&first.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item)?;
            for condition in &first.conditions {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, elt, out)?;
        }
        Ok(())
    }

    fn attribute(&self, receiver: Value, attr: &str) -> RtResult<Value> {
        if is_forbidden_name(attr) {
            return Err(RuntimeError::CapabilityDenied(format!("attribute '{}'", attr)));
        }
        match builtins::method_name(&receiver, attr) {
            Some(name) => Ok(Value::Method(Rc::new(BoundMethod { receiver, name }))),
            None => Err(RuntimeError::Attribute(format!(
                "'{}' object has no attribute '{}'",
                receiver.type_name(),
                attr
            ))),
        }
    }

    // --- calls ---

    pub(crate) fn call_value(&mut self, func: &Value, args: CallArgs) -> RtResult<Value> {
        self.tick()?;
        match func {
            Value::Builtin(name) => {
                // the environment is consulted again at call time
                if !self.env.allows_builtin(name) {
                    return Err(RuntimeError::CapabilityDenied(format!("builtin '{}'", name)));
                }
                let builtin = builtins::lookup(name).ok_or_else(|| RuntimeError::Name(name.to_string()))?;
                builtin(self, args)
            }
            Value::Method(method) => builtins::call_method(self, &method.receiver, method.name, args),
            Value::Function(function) => self.call_function(function, args),
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Function, args: CallArgs) -> RtResult<Value> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(RuntimeError::ResourceExhausted(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            )));
        }

        let def = &function.def;
        let params = &def.params;
        let (positional, keywords) = args.into_parts();
        if positional.len() > params.len() {
            return Err(RuntimeError::Type(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                positional.len()
            )));
        }

        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }
        for (name, value) in keywords {
            let index = params.iter().position(|p| p.name == name).ok_or_else(|| {
                RuntimeError::Type(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                ))
            })?;
            if slots[index].is_some() {
                return Err(RuntimeError::Type(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            slots[index] = Some(value);
        }

        let first_default = params.len() - function.defaults.len();
        let mut frame = HashMap::with_capacity(params.len());
        for (i, (param, slot)) in params.iter().zip(slots).enumerate() {
            let value = match slot {
                Some(value) => value,
                None if i >= first_default => function.defaults[i - first_default].clone(),
                None => {
                    return Err(RuntimeError::Type(format!(
                        "{}() missing required argument: '{}'",
                        def.name, param.name
                    )))
                }
            };
            frame.insert(param.name.clone(), value);
        }

        self.frames.push(frame);
        let result = self.exec_block(&def.body);
        self.frames.pop();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // --- iteration ---

    /// Materialize the items of an iterable value.
    pub(crate) fn iterate(&mut self, value: &Value) -> RtResult<Vec<Value>> {
        Ok(match value {
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::List(l) => l.items.borrow().clone(),
            Value::Tuple(t) => t.items.clone(),
            Value::Dict(d) => d.entries.borrow().keys().map(Key::to_value).collect(),
            Value::Range { start, stop, step } => {
                let len = range_len(*start, *stop, *step);
                self.check_len(len)?;
                let (start, step) = (*start as i128, *step as i128);
                (0..len as i128)
                    .map(|k| Value::Int((start + k * step) as i64))
                    .collect()
            }
            Value::Data(_) => {
                let text = builtins::read_data(self, value)?;
                text.lines().map(Value::str).collect()
            }
            other => {
                return Err(RuntimeError::Type(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }

    // --- item access ---

    fn slice_bounds(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> RtResult<SliceBounds> {
        let mut bound = |part: &Option<Box<Expr>>| -> RtResult<Option<i64>> {
            let Some(expr) = part else {
                return Ok(None);
            };
            match self.eval(expr)? {
                Value::None => Ok(None),
                v => v.as_int().map(Some).ok_or_else(|| {
                    RuntimeError::Type("slice indices must be integers or None".to_string())
                }),
            }
        };
        Ok(SliceBounds {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }

    pub(crate) fn get_item(&mut self, container: &Value, key: &Value) -> RtResult<Value> {
        match container {
            Value::List(l) => {
                let items = l.items.borrow();
                let i = normalize_index(index_of(key, "list")?, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(t) => {
                let i = normalize_index(index_of(key, "tuple")?, t.items.len(), "tuple")?;
                Ok(t.items[i].clone())
            }
            Value::Str(s) => {
                let index = index_of(key, "string")?;
                self.charge_bytes(s.len())?;
                let len = s.chars().count();
                let i = normalize_index(index, len, "string")?;
                Ok(s.chars()
                    .nth(i)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::None))
            }
            Value::Dict(d) => d
                .entries
                .borrow()
                .get(&key.to_key()?)
                .cloned()
                .ok_or_else(|| RuntimeError::Key(key.repr())),
            Value::Range { start, stop, step } => {
                let len = range_len(*start, *stop, *step);
                let i = normalize_index(index_of(key, "range object")?, len, "range object")?;
                Ok(Value::Int((*start as i128 + i as i128 * *step as i128) as i64))
            }
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn get_slice(&mut self, container: &Value, bounds: SliceBounds) -> RtResult<Value> {
        match container {
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked: String = bounds.indices(chars.len())?.into_iter().map(|i| chars[i]).collect();
                Ok(Value::str(picked))
            }
            Value::List(l) => {
                let items = l.items.borrow();
                let picked = bounds.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::list(picked))
            }
            Value::Tuple(t) => {
                let picked = bounds.indices(t.items.len())?.into_iter().map(|i| t.items[i].clone()).collect();
                Ok(Value::tuple(picked))
            }
            Value::Range { .. } => {
                let items = self.iterate(container)?;
                let picked = bounds.indices(items.len())?.into_iter().map(|i| items[i].clone()).collect();
                Ok(Value::list(picked))
            }
            other => Err(RuntimeError::Type(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(&mut self, container: &Value, key: Value, value: Value) -> RtResult<()> {
        match container {
            Value::List(l) => {
                let mut items = l.items.borrow_mut();
                let len = items.len();
                let i = normalize_index(index_of(&key, "list")?, len, "list assignment")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(d) => {
                let key = key.to_key()?;
                let mut entries = d.entries.borrow_mut();
                if !entries.contains_key(&key) {
                    self.check_len(entries.len() + 1)?;
                }
                entries.insert(key, value);
                Ok(())
            }
            other => Err(RuntimeError::Type(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn set_slice(&mut self, container: &Value, bounds: SliceBounds, value: Value) -> RtResult<()> {
        let Value::List(l) = container else {
            return Err(RuntimeError::Type(format!(
                "'{}' object does not support slice assignment",
                container.type_name()
            )));
        };
        let replacement = self.iterate(&value)?;
        let len = l.items.borrow().len();

        if bounds.step.unwrap_or(1) == 1 {
            let start = clamp_bound(bounds.lower, len, 0);
            let stop = clamp_bound(bounds.upper, len, len).max(start);
            self.check_len(len - (stop - start) + replacement.len())?;
            l.items.borrow_mut().splice(start..stop, replacement);
            return Ok(());
        }

        let positions = bounds.indices(len)?;
        if positions.len() != replacement.len() {
            return Err(RuntimeError::Value(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                positions.len()
            )));
        }
        let mut items = l.items.borrow_mut();
        for (i, item) in positions.into_iter().zip(replacement) {
            items[i] = item;
        }
        Ok(())
    }

    fn del_item(&mut self, container: &Value, key: &Value) -> RtResult<()> {
        match container {
            Value::List(l) => {
                let mut items = l.items.borrow_mut();
                let len = items.len();
                let i = normalize_index(index_of(key, "list")?, len, "list assignment")?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(d) => d
                .entries
                .borrow_mut()
                .shift_remove(&key.to_key()?)
                .map(|_| ())
                .ok_or_else(|| RuntimeError::Key(key.repr())),
            other => Err(RuntimeError::Type(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    fn del_slice(&mut self, container: &Value, bounds: SliceBounds) -> RtResult<()> {
        let Value::List(l) = container else {
            return Err(RuntimeError::Type(format!(
                "'{}' object does not support item deletion",
                container.type_name()
            )));
        };
        let mut items = l.items.borrow_mut();
        let mut doomed = vec![false; items.len()];
        for i in bounds.indices(items.len())? {
            doomed[i] = true;
        }
        let mut position = 0;
        items.retain(|_| {
            let keep = !doomed[position];
            position += 1;
            keep
        });
        Ok(())
    }
}

struct SliceBounds {
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
}

impl SliceBounds {
    fn indices(&self, len: usize) -> RtResult<Vec<usize>> {
        slice_indices(len, self.lower, self.upper, self.step)
    }
}

fn clamp_bound(bound: Option<i64>, len: usize, default: usize) -> usize {
    match bound {
        None => default,
        Some(b) if b < 0 => (b + len as i64).max(0) as usize,
        Some(b) => (b as usize).min(len),
    }
}

fn index_of(key: &Value, what: &str) -> RtResult<i64> {
    key.as_int().ok_or_else(|| {
        RuntimeError::Type(format!(
            "{} indices must be integers, not {}",
            what,
            key.type_name()
        ))
    })
}

fn unary(op: UnaryOp, value: Value) -> RtResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match value {
            Value::Float(f) => Ok(Value::Float(-f)),
            v => match v.as_int() {
                Some(i) => i.checked_neg().map(Value::Int).ok_or_else(|| {
                    RuntimeError::Overflow("integer result out of range".to_string())
                }),
                None => Err(RuntimeError::Type(format!(
                    "bad operand type for unary -: '{}'",
                    v.type_name()
                ))),
            },
        },
        UnaryOp::Pos => match value {
            Value::Float(f) => Ok(Value::Float(f)),
            v => v.as_int().map(Value::Int).ok_or_else(|| {
                RuntimeError::Type(format!("bad operand type for unary +: '{}'", v.type_name()))
            }),
        },
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> RtResult<bool> {
    Ok(match op {
        CmpOp::Eq => left.equals(right)?,
        CmpOp::NotEq => !left.equals(right)?,
        CmpOp::Lt => left.compare(right)? == Some(Ordering::Less),
        CmpOp::LtE => matches!(left.compare(right)?, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => left.compare(right)? == Some(Ordering::Greater),
        CmpOp::GtE => matches!(
            left.compare(right)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CmpOp::In => right.contains(left)?,
        CmpOp::NotIn => !right.contains(left)?,
        CmpOp::Is => left.is(right),
        CmpOp::IsNot => !left.is(right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::DataHandle;
    use crate::validator::validate;
    use std::io::Write;

    /// Validate and run `code` on a worker thread against `data`, returning
    /// the result and everything printed.
    fn run_with(code: &str, data: &[u8], limits: ExecutionLimits) -> (RtResult<()>, String) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        let handle = DataHandle::new(file.path(), data.len() as u64);
        let unit = validate(code).unwrap();
        let env = CapabilityEnvironment::build(handle);
        let console = env.console().clone();

        let result = std::thread::Builder::new()
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || Executor::new(limits).run(&unit, env))
            .unwrap()
            .join()
            .unwrap();
        drop(file);
        (result, console.contents())
    }

    fn run(code: &str) -> (RtResult<()>, String) {
        run_with(code, b"alpha\nbeta\ngamma\n", ExecutionLimits::default())
    }

    fn output(code: &str) -> String {
        let (result, out) = run(code);
        assert_eq!(result, Ok(()), "code failed: {}", code);
        out
    }

    fn error(code: &str) -> RuntimeError {
        run(code).0.unwrap_err()
    }

    #[test]
    fn test_arithmetic_and_print() {
        assert_eq!(output("x = 1 + 1\nprint(x)"), "2\n");
        assert_eq!(output("print(7 // 2, 7 % 3, 2 ** 10, 7 / 2)"), "3 1 1024 3.5\n");
        assert_eq!(output("print(-7 // 2, 'a' * 3)"), "-4 aaa\n");
        assert_eq!(output("x = 5\nx += 2\nx *= 3\nprint(x)"), "21\n");
    }

    #[test]
    fn test_long_operator_chains() {
        let code = format!("print(1{}, True{})", " + 1".repeat(149), " and True".repeat(149));
        assert_eq!(output(&code), "150 True\n");
    }

    #[test]
    fn test_empty_program_is_a_no_op() {
        assert_eq!(output(""), "");
    }

    #[test]
    fn test_control_flow() {
        let code = r#"
total = 0
for i in range(10):
    if i % 2 == 0:
        continue
    if i > 7:
        break
    total += i
n = 0
while n < 3:
    n += 1
print(total, n)
"#;
        assert_eq!(output(code), "16 3\n");
    }

    #[test]
    fn test_functions_and_recursion() {
        let code = r#"
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

def greet(name, greeting="hello"):
    return greeting + " " + name

print(fact(10))
print(greet("bob"), greet("amy", greeting="hi"))
"#;
        assert_eq!(output(code), "3628800\nhello bob hi amy\n");
    }

    #[test]
    fn test_call_argument_errors() {
        let define = "def f(a, b=1):\n    return a\n";
        assert!(matches!(error(&format!("{}f()", define)), RuntimeError::Type(_)));
        assert!(matches!(error(&format!("{}f(1, 2, 3)", define)), RuntimeError::Type(_)));
        assert!(matches!(error(&format!("{}f(1, c=2)", define)), RuntimeError::Type(_)));
        assert!(matches!(error(&format!("{}f(1, a=2)", define)), RuntimeError::Type(_)));
    }

    #[test]
    fn test_data_binding() {
        assert_eq!(output("print(data_file.read())"), "alpha\nbeta\ngamma\n\n");
        assert_eq!(output("print(data_file.lines())"), "['alpha', 'beta', 'gamma']\n");
        assert_eq!(output("print(data_file.size())"), "17\n");
        assert_eq!(output("print(data_file)"), "<data_file>\n");
        assert_eq!(
            output("for line in data_file:\n    print(line.upper())"),
            "ALPHA\nBETA\nGAMMA\n"
        );
    }

    #[test]
    fn test_collections() {
        let code = r#"
words = data_file.read().split()
counts = {}
for w in words:
    counts[w[0]] = counts.get(w[0], 0) + 1
pairs = sorted(counts.items())
print(pairs)
squares = [i * i for i in range(6) if i % 2 == 1]
print(squares, squares[-1], squares[::-1])
a, b = (1, 2)
a, b = b, a
print(a, b)
nums = [3, 1, 2]
nums.append(0)
nums.sort()
del nums[0]
print(nums, len(nums), 2 in nums)
"#;
        assert_eq!(
            output(code),
            "[('a', 1), ('b', 1), ('g', 1)]\n[1, 9, 25] 25 [25, 9, 1]\n2 1\n[1, 2, 3] 3 True\n"
        );
    }

    #[test]
    fn test_list_plus_equals_is_in_place() {
        assert_eq!(output("a = [1]\nb = a\na += [2]\nprint(b)"), "[1, 2]\n");
    }

    #[test]
    fn test_methods() {
        assert_eq!(output("print('a,b,,c'.split(','))"), "['a', 'b', '', 'c']\n");
        assert_eq!(output("print('  hi  '.strip(), '-'.join(['a', 'b']))"), "hi a-b\n");
        assert_eq!(
            output("print('hello world'.title(), 'abc'.find('c'), 'aaa'.count('a'))"),
            "Hello World 2 3\n"
        );
        assert_eq!(
            output("print('abc'.startswith(('x', 'a')), 'abc'.replace('b', 'B'))"),
            "True aBc\n"
        );
        assert_eq!(output("l = [1, 2, 3]\nprint(l.pop(), l.index(2), l)"), "3 1 [1, 2]\n");

        let code = "d = {'a': 1}\nd.update(b=2)\nd.setdefault('c', 3)\nprint(d.pop('a'), sorted(d.keys()), d.get('z'))";
        assert_eq!(output(code), "1 ['b', 'c'] None\n");

        assert!(matches!(error("[].pop()"), RuntimeError::Index(_)));
        assert!(matches!(error("x = 1\nx.append(2)"), RuntimeError::Attribute(_)));
    }

    #[test]
    fn test_slice_assignment_and_deletion() {
        assert_eq!(output("a = [0, 1, 2, 3, 4]\na[1:3] = ['x']\nprint(a)"), "[0, 'x', 3, 4]\n");
        assert_eq!(output("a = list(range(6))\ndel a[::2]\nprint(a)"), "[1, 3, 5]\n");
    }

    #[test]
    fn test_runtime_errors() {
        assert!(matches!(error("x = 1 / 0"), RuntimeError::ZeroDivision(_)));
        assert!(matches!(error("print(undefined)"), RuntimeError::Name(_)));
        assert!(matches!(error("[1][5]"), RuntimeError::Index(_)));
        assert!(matches!(error("{}['k']"), RuntimeError::Key(_)));
        assert!(matches!(error("1 + 'a'"), RuntimeError::Type(_)));
        assert!(matches!(error("int('abc')"), RuntimeError::Value(_)));
        assert!(matches!(error("x = 9223372036854775807\nx += 1"), RuntimeError::Overflow(_)));
        assert_eq!(
            error("assert 1 == 2, 'nope'"),
            RuntimeError::Assertion("nope".to_string())
        );
        assert!(matches!(error("'abc'.upper.lower"), RuntimeError::Attribute(_)));
    }

    #[test]
    fn test_unknown_names_do_not_fall_through() {
        // allowed by the grammar but absent from the environment
        for name in ["os", "sys", "math", "hash", "iter", "next", "map", "filter"] {
            assert_eq!(
                error(name),
                RuntimeError::Name(name.to_string())
            );
        }
    }

    #[test]
    fn test_runtime_rejects_forbidden_names_independently() {
        let env = CapabilityEnvironment::build(DataHandle::new("/nonexistent", 0));
        let limits = ExecutionLimits::default();
        let interrupt = Interrupt::new();
        let interp = Interpreter::new(&env, &limits, &interrupt);
        assert_eq!(
            interp.lookup("open").unwrap_err(),
            RuntimeError::Name("open".to_string())
        );
        assert_eq!(
            interp.lookup("__import__").unwrap_err(),
            RuntimeError::Name("__import__".to_string())
        );
        assert!(matches!(
            interp.attribute(Value::str("x"), "__class__"),
            Err(RuntimeError::CapabilityDenied(_))
        ));
    }

    #[test]
    fn test_step_budget() {
        let limits = ExecutionLimits {
            max_steps: 1_000,
            ..Default::default()
        };
        let (result, _) = run_with("while True:\n    pass\n", b"", limits);
        assert!(matches!(result, Err(RuntimeError::ResourceExhausted(_))));
    }

    #[test]
    fn test_call_depth_limit() {
        let (result, _) = run("def f(n):\n    return f(n + 1)\nf(0)\n");
        match result {
            Err(RuntimeError::ResourceExhausted(msg)) => assert!(msg.contains("call depth")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sequence_limit() {
        let limits = ExecutionLimits {
            max_sequence_len: 100,
            ..Default::default()
        };
        let (result, _) = run_with("x = [0] * 1000", b"", limits.clone());
        assert!(matches!(result, Err(RuntimeError::ResourceExhausted(_))));
        let (result, _) = run_with("x = list(range(1000))", b"", limits.clone());
        assert!(matches!(result, Err(RuntimeError::ResourceExhausted(_))));
        let (result, _) = run_with("x = data_file.read()", &[b'a'; 500], limits);
        assert!(matches!(result, Err(RuntimeError::ResourceExhausted(_))));
    }

    #[test]
    fn test_string_indexing_is_charged() {
        let limits = ExecutionLimits {
            max_steps: 5_000,
            ..Default::default()
        };
        let data = vec![b'a'; 64 * 1024];
        let code = "s = data_file.read()\nfor i in range(10):\n    c = s[i]";
        let (result, _) = run_with(code, &data, limits.clone());
        assert!(matches!(result, Err(RuntimeError::ResourceExhausted(_))));

        let (result, _) = run_with("s = 'abc'\nassert s[1] == 'b'", b"", limits);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_repeating_empty_sequences_is_immediate() {
        let limits = ExecutionLimits {
            max_steps: 1_000,
            ..Default::default()
        };
        let code = "a = [] * 10**18\nb = () * 10**18\nc = '' * 10**18\nprint(a, b, len(c))";
        let (result, out) = run_with(code, b"", limits);
        assert_eq!(result, Ok(()));
        assert_eq!(out, "[] () 0\n");
    }

    #[test]
    fn test_interrupt() {
        let unit = validate("while True:\n    pass\n").unwrap();
        let env = CapabilityEnvironment::build(DataHandle::new("/nonexistent", 0));
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let executor = Executor::default().with_interrupt(interrupt);
        assert_eq!(executor.run(&unit, env), Err(RuntimeError::Interrupted));
    }

    #[test]
    fn test_cyclic_structures_are_released() {
        assert_eq!(output("a = []\na.append(a)\nprint(len(a))"), "1\n");
        assert_eq!(output("a = [1]\na.append(a)\nprint(a)"), "[1, [...]]\n");
    }

    #[test]
    fn test_builtin_arity_errors() {
        assert!(matches!(error("len()"), RuntimeError::Type(_)));
        assert!(matches!(error("len([], [])"), RuntimeError::Type(_)));
        assert!(matches!(error("data_file.read(10)"), RuntimeError::Type(_)));
    }

    #[test]
    fn test_scopes() {
        let code = r#"
x = 1
def f():
    x = 2
    return x
def g():
    return x
print(f(), g(), x)
"#;
        assert_eq!(output(code), "2 1 1\n");
    }
}
