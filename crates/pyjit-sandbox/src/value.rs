//! Runtime values and the operators defined on them

use crate::ast::{BinOp, FunctionDef};
use crate::capabilities::DataHandle;
use crate::runtime::RuntimeError;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

type RtResult<T> = Result<T, RuntimeError>;

/// Maximum nesting walked by equality, ordering, hashing and repr.
pub const MAX_VALUE_DEPTH: usize = 200;

/// Maximum nodes visited by one comparison or hash.
pub const MAX_WALK_NODES: usize = 1_000_000;

/// Maximum length of a single `repr`.
pub const MAX_REPR_LEN: usize = 1 << 24;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListObj>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<DictObj>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(&'static str),
    Method(Rc<BoundMethod>),
    Data(DataHandle),
}

pub struct ListObj {
    pub items: RefCell<Vec<Value>>,
}

pub struct TupleObj {
    pub items: Vec<Value>,
}

pub struct DictObj {
    pub entries: RefCell<IndexMap<Key, Value>>,
}

pub struct Function {
    pub def: Arc<FunctionDef>,
    pub defaults: Vec<Value>,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Hashable projection of a value, used for dict keys and `in` on dicts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
}

// Containers release their children iteratively so that a deeply nested
// structure cannot exhaust the stack when it is dropped.

fn release(mut stack: Vec<Value>) {
    while let Some(value) = stack.pop() {
        match value {
            Value::List(rc) => {
                if let Ok(list) = Rc::try_unwrap(rc) {
                    stack.extend(list.items.take());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    stack.append(&mut tuple.items);
                }
            }
            Value::Dict(rc) => {
                if let Ok(dict) = Rc::try_unwrap(rc) {
                    stack.extend(dict.entries.take().into_values());
                }
            }
            _ => {}
        }
    }
}

/// Containers created while a [`HeapScope`] is active on this thread.
#[derive(Default)]
struct Heap {
    lists: Vec<Weak<ListObj>>,
    dicts: Vec<Weak<DictObj>>,
    compact_at: usize,
}

thread_local! {
    static HEAP: RefCell<Option<Heap>> = const { RefCell::new(None) };
}

fn track(register: impl FnOnce(&mut Heap)) {
    HEAP.with(|heap| {
        if let Some(heap) = heap.borrow_mut().as_mut() {
            register(heap);
            if heap.lists.len() + heap.dicts.len() > heap.compact_at {
                heap.lists.retain(|w| w.strong_count() > 0);
                heap.dicts.retain(|w| w.strong_count() > 0);
                heap.compact_at = 1024.max(2 * (heap.lists.len() + heap.dicts.len()));
            }
        }
    });
}

/// Tracks every list and dict created on this thread until dropped, then
/// empties the ones still alive.
///
/// Scripts can build reference cycles (`a.append(a)`) that reference
/// counting alone never frees; emptying the containers breaks them.
pub(crate) struct HeapScope {
    _private: (),
}

impl HeapScope {
    pub(crate) fn enter() -> Self {
        HEAP.with(|heap| *heap.borrow_mut() = Some(Heap::default()));
        Self { _private: () }
    }
}

impl Drop for HeapScope {
    fn drop(&mut self) {
        let Some(heap) = HEAP.with(|heap| heap.borrow_mut().take()) else {
            return;
        };
        let mut orphans = Vec::new();
        for list in heap.lists.iter().filter_map(Weak::upgrade) {
            orphans.extend(list.items.take());
        }
        for dict in heap.dicts.iter().filter_map(Weak::upgrade) {
            orphans.extend(dict.entries.take().into_values());
        }
        release(orphans);
    }
}

impl Drop for ListObj {
    fn drop(&mut self) {
        release(self.items.take());
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.items));
    }
}

impl Drop for DictObj {
    fn drop(&mut self) {
        release(self.entries.take().into_values().collect());
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::None => Value::None,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(i) => Value::Int(*i),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::Str(s) => Value::Str(s.clone()),
            Key::Tuple(items) => Value::tuple(items.iter().map(Key::to_value).collect()),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        let list = Rc::new(ListObj {
            items: RefCell::new(items),
        });
        track(|heap| heap.lists.push(Rc::downgrade(&list)));
        Value::List(list)
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(TupleObj { items }))
    }

    pub fn dict(entries: IndexMap<Key, Value>) -> Value {
        let dict = Rc::new(DictObj {
            entries: RefCell::new(entries),
        });
        track(|heap| heap.dicts.push(Rc::downgrade(&dict)));
        Value::Dict(dict)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Data(_) => "data_file",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.items.borrow().is_empty(),
            Value::Tuple(t) => !t.items.is_empty(),
            Value::Dict(d) => !d.entries.borrow().is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Integer view, with `bool` counting as an int.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_key(&self) -> RtResult<Key> {
        self.to_key_at(0, &mut Walk::default())
    }

    fn to_key_at(&self, depth: usize, walk: &mut Walk) -> RtResult<Key> {
        walk.visit(depth)?;
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Bool(*b),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Key::Int(*f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(t) => Key::Tuple(
                t.items
                    .iter()
                    .map(|v| v.to_key_at(depth + 1, walk))
                    .collect::<RtResult<_>>()?,
            ),
            other => {
                return Err(RuntimeError::Type(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// `str(value)`
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// `active` holds the containers currently being written, so that a
    /// container reached again through itself prints as `[...]`.
    fn write_repr(&self, out: &mut String, active: &mut Vec<usize>) {
        if active.len() > MAX_VALUE_DEPTH || out.len() > MAX_REPR_LEN {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(l) => {
                let id = Rc::as_ptr(l) as usize;
                if active.contains(&id) {
                    out.push_str("[...]");
                    return;
                }
                active.push(id);
                out.push('[');
                write_items(&l.items.borrow(), out, active);
                out.push(']');
                active.pop();
            }
            Value::Tuple(t) => {
                active.push(Rc::as_ptr(t) as usize);
                out.push('(');
                write_items(&t.items, out, active);
                if t.items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                active.pop();
            }
            Value::Dict(d) => {
                let id = Rc::as_ptr(d) as usize;
                if active.contains(&id) {
                    out.push_str("{...}");
                    return;
                }
                active.push(id);
                out.push('{');
                for (i, (k, v)) in d.entries.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.to_value().write_repr(out, active);
                    out.push_str(": ");
                    v.write_repr(out, active);
                }
                out.push('}');
                active.pop();
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(name) => out.push_str(&format!("<built-in function {}>", name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Data(_) => out.push_str("<data_file>"),
        }
    }

    pub fn equals(&self, other: &Value) -> RtResult<bool> {
        self.equals_at(other, 0, &mut Walk::default())
    }

    fn equals_at(&self, other: &Value, depth: usize, walk: &mut Walk) -> RtResult<bool> {
        walk.visit(depth)?;
        if let (Some(a), Some(b)) = (self.number(), other.number()) {
            return Ok(match (a, b) {
                (Num::Int(a), Num::Int(b)) => a == b,
                (a, b) => a.to_f64() == b.to_f64(),
            });
        }
        Ok(match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_equal(&a.items.borrow(), &b.items.borrow(), depth, walk)?
            }
            (Value::Tuple(a), Value::Tuple(b)) => {
                Rc::ptr_eq(a, b) || seq_equal(&a.items, &b.items, depth, walk)?
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                let (a, b) = (a.entries.borrow(), b.entries.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (k, v) in a.iter() {
                    match b.get(k) {
                        Some(w) if v.equals_at(w, depth + 1, walk)? => {}
                        _ => return Ok(false),
                    }
                }
                true
            }
            (
                Value::Range { start, stop, step },
                Value::Range {
                    start: s2,
                    stop: e2,
                    step: st2,
                },
            ) => start == s2 && stop == e2 && step == st2,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Data(a), Value::Data(b)) => a.same_handle(b),
            _ => false,
        })
    }

    /// Ordering for `<`, `<=`, `>`, `>=` and sorting. `None` when the
    /// operands are unordered (NaN).
    pub fn compare(&self, other: &Value) -> RtResult<Option<Ordering>> {
        self.compare_at(other, 0, &mut Walk::default())
    }

    fn compare_at(
        &self,
        other: &Value,
        depth: usize,
        walk: &mut Walk,
    ) -> RtResult<Option<Ordering>> {
        walk.visit(depth)?;
        if let (Some(a), Some(b)) = (self.number(), other.number()) {
            return Ok(match (a, b) {
                (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
                (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
            });
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => {
                seq_compare(&a.items.borrow(), &b.items.borrow(), depth, walk)
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_compare(&a.items, &b.items, depth, walk),
            _ => Err(RuntimeError::Type(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Identity as far as it is observable from a script.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Data(a), Value::Data(b)) => a.same_handle(b),
            _ => false,
        }
    }

    /// `item in self`
    pub fn contains(&self, item: &Value) -> RtResult<bool> {
        match self {
            Value::Str(s) => match item {
                Value::Str(sub) => Ok(s.contains(&**sub)),
                other => Err(RuntimeError::Type(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(l) => {
                for v in l.items.borrow().iter() {
                    if v.equals(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Tuple(t) => {
                for v in t.items.iter() {
                    if v.equals(item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(d) => Ok(d.entries.borrow().contains_key(&item.to_key()?)),
            Value::Range { start, stop, step } => {
                let Some(i) = item.as_int() else {
                    return Ok(false);
                };
                let in_bounds = if *step > 0 {
                    i >= *start && i < *stop
                } else {
                    i <= *start && i > *stop
                };
                Ok(in_bounds && (i as i128 - *start as i128) % *step as i128 == 0)
            }
            other => Err(RuntimeError::Type(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    fn number(&self) -> Option<Num> {
        match self {
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Bounds one recursive walk over nested values, both in depth and in the
/// number of nodes visited (shared sub-structures are visited every time).
#[derive(Default)]
struct Walk {
    nodes: usize,
}

impl Walk {
    fn visit(&mut self, depth: usize) -> RtResult<()> {
        if depth > MAX_VALUE_DEPTH {
            return Err(RuntimeError::ResourceExhausted(
                "maximum recursion depth exceeded while walking a value".to_string(),
            ));
        }
        self.nodes += 1;
        if self.nodes > MAX_WALK_NODES {
            return Err(RuntimeError::ResourceExhausted(
                "value is too large to compare or hash".to_string(),
            ));
        }
        Ok(())
    }
}

fn write_items(items: &[Value], out: &mut String, active: &mut Vec<usize>) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, active);
    }
}

fn seq_equal(a: &[Value], b: &[Value], depth: usize, walk: &mut Walk) -> RtResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.equals_at(y, depth + 1, walk)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn seq_compare(
    a: &[Value],
    b: &[Value],
    depth: usize,
    walk: &mut Walk,
) -> RtResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.equals_at(y, depth + 1, walk)? {
            return x.compare_at(y, depth + 1, walk);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

pub fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let n = if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    };
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Resolve a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize, what: &str) -> RtResult<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    if i < 0 || i >= len {
        return Err(RuntimeError::Index(format!("{} index out of range", what)));
    }
    Ok(i as usize)
}

/// Positions selected by a Python slice over a sequence of `len` items.
pub fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> RtResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::Value("slice step cannot be zero".to_string()));
    }
    let len = len as i64;
    let adjust = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(b) if b < 0 => {
                let b = b.saturating_add(len);
                if b < 0 {
                    if step < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    b
                }
            }
            Some(b) if b >= len => {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            }
            Some(b) => b,
        }
    };

    let (start, stop) = if step > 0 {
        (adjust(lower, 0), adjust(upper, len))
    } else {
        (adjust(lower, len - 1), adjust(upper, -1))
    };

    let mut out = Vec::new();
    let mut i = start;
    if step > 0 {
        while i < stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    } else {
        while i > stop {
            out.push(i as usize);
            i = i.saturating_add(step);
        }
    }
    Ok(out)
}

/// Apply an arithmetic operator. `max_len` bounds sequence results.
pub fn binary_op(op: BinOp, left: &Value, right: &Value, max_len: usize) -> RtResult<Value> {
    if let (Some(a), Some(b)) = (left.number(), right.number()) {
        return numeric_op(op, a, b);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), max_len)?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::str(s))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.items.borrow().clone();
            check_len(items.len() + b.items.borrow().len(), max_len)?;
            items.extend(b.items.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.items.len() + b.items.len(), max_len)?;
            let mut items = a.items.clone();
            items.extend(b.items.iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
            if n.as_int().is_some()
                && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            let count = usize::try_from(n.as_int().unwrap_or(0).max(0)).unwrap_or(0);
            repeat(seq, count, max_len)
        }
        _ => Err(RuntimeError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn check_len(len: usize, max_len: usize) -> RtResult<()> {
    if len > max_len {
        return Err(RuntimeError::ResourceExhausted(format!(
            "sequence of {} items exceeds the limit of {}",
            len, max_len
        )));
    }
    Ok(())
}

fn repeat(seq: &Value, count: usize, max_len: usize) -> RtResult<Value> {
    match seq {
        Value::Str(s) => {
            check_len(s.len().saturating_mul(count), max_len)?;
            Ok(Value::str(s.repeat(count)))
        }
        Value::List(l) => {
            let items = l.items.borrow();
            check_len(items.len().saturating_mul(count), max_len)?;
            Ok(Value::list(repeat_items(&items, count)))
        }
        Value::Tuple(t) => {
            check_len(t.items.len().saturating_mul(count), max_len)?;
            Ok(Value::tuple(repeat_items(&t.items, count)))
        }
        _ => Err(RuntimeError::Internal("repeat on non-sequence".to_string())),
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    // Bounded by `check_len` only when there is something to copy.
    if items.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn overflow() -> RuntimeError {
    RuntimeError::Overflow("integer result out of range".to_string())
}

fn numeric_op(op: BinOp, a: Num, b: Num) -> RtResult<Value> {
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        return int_op(op, a, b);
    }
    let (a, b) = (a.to_f64(), b.to_f64());
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(RuntimeError::ZeroDivision("float division by zero".to_string()));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(RuntimeError::ZeroDivision(
                    "float floor division by zero".to_string(),
                ));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(RuntimeError::ZeroDivision("float modulo".to_string()));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(RuntimeError::ZeroDivision(
                    "0.0 cannot be raised to a negative power".to_string(),
                ));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(v))
}

fn int_op(op: BinOp, a: i64, b: i64) -> RtResult<Value> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(RuntimeError::ZeroDivision("division by zero".to_string()));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => floor_div(a, b)?,
        BinOp::Mod => floor_mod(a, b)?,
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(RuntimeError::ZeroDivision(
                        "0 cannot be raised to a negative power".to_string(),
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(v))
}

pub fn floor_div(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(RuntimeError::ZeroDivision(
            "integer division or modulo by zero".to_string(),
        ));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

pub fn floor_mod(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(RuntimeError::ZeroDivision(
            "integer division or modulo by zero".to_string(),
        ));
    }
    let r = a.checked_rem(b).ok_or_else(overflow)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1_000;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_python_floor_semantics() {
        assert_eq!(floor_div(7, 2).unwrap(), 3);
        assert_eq!(floor_div(-7, 2).unwrap(), -4);
        assert_eq!(floor_div(7, -2).unwrap(), -4);
        assert_eq!(floor_mod(-7, 3).unwrap(), 2);
        assert_eq!(floor_mod(7, -3).unwrap(), -2);
        assert!(floor_div(i64::MIN, -1).is_err());
    }

    #[test]
    fn test_division_by_zero() {
        for op in [BinOp::Div, BinOp::FloorDiv, BinOp::Mod] {
            assert!(matches!(
                binary_op(op, &int(1), &int(0), MAX),
                Err(RuntimeError::ZeroDivision(_))
            ));
        }
        assert!(matches!(
            binary_op(BinOp::Div, &Value::Float(1.0), &Value::Float(0.0), MAX),
            Err(RuntimeError::ZeroDivision(_))
        ));
    }

    #[test]
    fn test_overflow_is_an_error() {
        assert!(matches!(
            binary_op(BinOp::Mul, &int(i64::MAX), &int(2), MAX),
            Err(RuntimeError::Overflow(_))
        ));
        assert!(matches!(
            binary_op(BinOp::Pow, &int(10), &int(100), MAX),
            Err(RuntimeError::Overflow(_))
        ));
    }

    #[test]
    fn test_mixed_arithmetic() {
        let v = binary_op(BinOp::Add, &int(1), &Value::Float(0.5), MAX).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 1.5));
        let v = binary_op(BinOp::Div, &int(3), &int(2), MAX).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 1.5));
        let v = binary_op(BinOp::Add, &Value::Bool(true), &int(1), MAX).unwrap();
        assert!(matches!(v, Value::Int(2)));
    }

    #[test]
    fn test_sequence_repetition_is_bounded() {
        let s = Value::str("ab");
        let v = binary_op(BinOp::Mul, &s, &int(3), MAX).unwrap();
        assert_eq!(v.as_str(), Some("ababab"));
        assert!(matches!(
            binary_op(BinOp::Mul, &s, &int(1_000_000), MAX),
            Err(RuntimeError::ResourceExhausted(_))
        ));
        let v = binary_op(BinOp::Mul, &int(-1), &s, MAX).unwrap();
        assert_eq!(v.as_str(), Some(""));
    }

    #[test]
    fn test_type_errors() {
        let err = binary_op(BinOp::Add, &Value::str("a"), &int(1), MAX).unwrap_err();
        assert!(err.to_string().contains("unsupported operand"));
    }

    #[test]
    fn test_repr() {
        let v = Value::list(vec![
            int(1),
            Value::str("it's"),
            Value::Float(2.0),
            Value::None,
            Value::tuple(vec![Value::Bool(true)]),
        ]);
        assert_eq!(v.repr(), "[1, \"it's\", 2.0, None, (True,)]");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::str("plain").to_display(), "plain");
    }

    #[test]
    fn test_self_referential_list_repr_terminates() {
        let list = Value::list(vec![int(1)]);
        if let Value::List(l) = &list {
            l.items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        assert!(list.equals(&list).unwrap());
        if let Value::List(l) = &list {
            l.items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_shared_structure_walks_are_bounded() {
        let (mut t, mut u) = (Value::tuple(vec![int(1)]), Value::tuple(vec![int(1)]));
        for _ in 0..60 {
            t = Value::tuple(vec![t.clone(), t.clone()]);
            u = Value::tuple(vec![u.clone(), u.clone()]);
        }
        assert!(t.equals(&t).unwrap());
        assert!(matches!(t.equals(&u), Err(RuntimeError::ResourceExhausted(_))));
        assert!(matches!(t.to_key(), Err(RuntimeError::ResourceExhausted(_))));
        assert!(t.repr().len() < MAX_REPR_LEN + 4096);
    }

    #[test]
    fn test_heap_scope_frees_orphaned_cycles() {
        let weak = {
            let _scope = HeapScope::enter();
            let list = Value::list(vec![]);
            let dict = Value::dict(IndexMap::new());
            let (Value::List(l), Value::Dict(d)) = (&list, &dict) else {
                unreachable!()
            };
            l.items.borrow_mut().push(dict.clone());
            d.entries
                .borrow_mut()
                .insert(Key::Str("self".into()), list.clone());
            Rc::downgrade(l)
        };
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_untracked_without_scope() {
        let list = Value::list(vec![int(1)]);
        drop(HeapScope::enter());
        assert_eq!(list.repr(), "[1]");
    }

    #[test]
    fn test_deep_nesting_drops_without_overflow() {
        let mut v = Value::list(vec![]);
        for _ in 0..200_000 {
            v = Value::list(vec![v]);
        }
        drop(v);
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(int(1).equals(&Value::Float(1.0)).unwrap());
        assert!(!int(1).equals(&Value::str("1")).unwrap());
        assert_eq!(
            Value::str("a").compare(&Value::str("b")).unwrap(),
            Some(Ordering::Less)
        );
        assert!(Value::str("a").compare(&int(1)).is_err());
        let a = Value::tuple(vec![int(1), int(2)]);
        let b = Value::tuple(vec![int(1), int(3)]);
        assert_eq!(a.compare(&b).unwrap(), Some(Ordering::Less));
        assert_eq!(Value::Float(f64::NAN).compare(&int(1)).unwrap(), None);
    }

    #[test]
    fn test_contains() {
        assert!(Value::str("hello").contains(&Value::str("ell")).unwrap());
        assert!(Value::str("hello").contains(&int(1)).is_err());
        let r = Value::Range {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert!(r.contains(&int(9)).unwrap());
        assert!(!r.contains(&int(8)).unwrap());
    }

    #[test]
    fn test_keys() {
        assert_eq!(Value::Float(2.0).to_key().unwrap(), Key::Int(2));
        assert!(Value::list(vec![]).to_key().is_err());
        let k = Value::tuple(vec![int(1), Value::str("a")]).to_key().unwrap();
        assert!(matches!(k.to_value(), Value::Tuple(_)));
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert_eq!(slice_indices(5, None, None, Some(2)).unwrap(), vec![0, 2, 4]);
        assert!(slice_indices(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 10, 1), 10);
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(5, 0, 1), 0);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
