//! Builtin functions and methods available to scripts
//!
//! Names are resolved through the [`CapabilityEnvironment`] first; this
//! registry only maps an already-permitted name to its implementation.
//!
//! [`CapabilityEnvironment`]: crate::capabilities::CapabilityEnvironment

mod conversion;
mod math;
mod methods;
mod sequence;

use crate::capabilities::{DATA_METHODS, DICT_METHODS, LIST_METHODS, STR_METHODS};
use crate::runtime::{Interpreter, RuntimeError};
use crate::value::Value;
use std::cmp::Ordering;
use std::rc::Rc;

type RtResult<T> = Result<T, RuntimeError>;

/// Signature shared by every builtin.
pub(crate) type BuiltinFn = fn(&mut Interpreter<'_>, CallArgs) -> RtResult<Value>;

/// Resolve a builtin implementation by name.
pub(crate) fn lookup(name: &str) -> Option<BuiltinFn> {
    let builtin: BuiltinFn = match name {
        "abs" => math::abs,
        "divmod" => math::divmod,
        "max" => math::max,
        "min" => math::min,
        "pow" => math::pow,
        "round" => math::round,
        "sum" => math::sum,
        "bool" => conversion::bool,
        "chr" => conversion::chr,
        "float" => conversion::float,
        "int" => conversion::int,
        "ord" => conversion::ord,
        "repr" => conversion::repr,
        "str" => conversion::str,
        "all" => sequence::all,
        "any" => sequence::any,
        "dict" => sequence::dict,
        "enumerate" => sequence::enumerate,
        "len" => sequence::len,
        "list" => sequence::list,
        "print" => sequence::print,
        "range" => sequence::range,
        "reversed" => sequence::reversed,
        "sorted" => sequence::sorted,
        "tuple" => sequence::tuple,
        "zip" => sequence::zip,
        _ => return None,
    };
    Some(builtin)
}

/// The allow-listed method called `attr` on `receiver`, if any.
pub(crate) fn method_name(receiver: &Value, attr: &str) -> Option<&'static str> {
    let methods: &[&'static str] = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Data(_) => DATA_METHODS,
        _ => return None,
    };
    methods.iter().copied().find(|m| *m == attr)
}

pub(crate) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &'static str,
    args: CallArgs,
) -> RtResult<Value> {
    match receiver {
        Value::Str(s) => methods::str_method(interp, s, name, args),
        Value::List(l) => methods::list_method(interp, l, name, args),
        Value::Dict(d) => methods::dict_method(interp, d, name, args),
        Value::Data(_) => methods::data_method(interp, receiver, name, args),
        other => Err(RuntimeError::Internal(format!(
            "no methods on '{}'",
            other.type_name()
        ))),
    }
}

/// Read the staged data through its handle, as lossy UTF-8 text.
pub(crate) fn read_data(interp: &mut Interpreter<'_>, handle: &Value) -> RtResult<String> {
    let Value::Data(handle) = handle else {
        return Err(RuntimeError::Internal("expected the data handle".to_string()));
    };
    let bytes = handle.read(interp.max_sequence_len())?;
    interp.charge_bytes(bytes.len())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Arguments of one call.
pub(crate) struct CallArgs {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub(crate) fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub(crate) fn positional(values: Vec<Value>) -> Self {
        Self::new(values, Vec::new())
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, Vec<(String, Value)>) {
        (self.positional, self.keywords)
    }

    fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Reject leftover keywords and positional counts outside `min..=max`.
    fn finish(self, func: &str, min: usize, max: usize) -> RtResult<Vec<Value>> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(RuntimeError::Type(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        let given = self.positional.len();
        if given < min || given > max {
            let (qualifier, count) = if min == max {
                ("exactly", min)
            } else if given < min {
                ("at least", min)
            } else {
                ("at most", max)
            };
            return Err(RuntimeError::Type(format!(
                "{}() takes {} {} argument{} ({} given)",
                func,
                qualifier,
                count,
                if count == 1 { "" } else { "s" },
                given
            )));
        }
        Ok(self.positional)
    }
}

fn int_arg(func: &str, value: &Value) -> RtResult<i64> {
    value.as_int().ok_or_else(|| {
        RuntimeError::Type(format!(
            "{}() argument must be int, not '{}'",
            func,
            value.type_name()
        ))
    })
}

fn str_arg(func: &str, value: &Value) -> RtResult<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(RuntimeError::Type(format!(
            "{}() argument must be str, not '{}'",
            func,
            other.type_name()
        ))),
    }
}

/// `None` and a missing argument both mean "not given".
fn given(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !matches!(v, Value::None))
}

/// Stable sort shared by `sorted()` and `list.sort()`.
fn sort_values(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> RtResult<Vec<Value>> {
    let keys = match given(key) {
        Some(func) => items
            .iter()
            .map(|item| interp.call_value(&func, CallArgs::positional(vec![item.clone()])))
            .collect::<RtResult<Vec<_>>>()?,
        None => items.clone(),
    };

    let mut order: Vec<usize> = (0..items.len()).collect();
    merge_sort(interp, &mut order, |a, b| {
        let (a, b) = if reverse { (b, a) } else { (a, b) };
        Ok(keys[a].compare(&keys[b])? == Some(Ordering::Less))
    })?;

    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Bottom-up merge sort over indices with a fallible `less` comparator.
/// Elements only move past each other when strictly less, so equal
/// elements keep their original order.
fn merge_sort(
    interp: &mut Interpreter<'_>,
    order: &mut Vec<usize>,
    mut less: impl FnMut(usize, usize) -> RtResult<bool>,
) -> RtResult<()> {
    let n = order.len();
    let mut merged = Vec::with_capacity(n);
    let mut width = 1;
    while width < n {
        interp.charge(n as u64)?;
        merged.clear();
        let mut start = 0;
        while start < n {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j) = (start, mid);
            while i < mid && j < end {
                if less(order[j], order[i])? {
                    merged.push(order[j]);
                    j += 1;
                } else {
                    merged.push(order[i]);
                    i += 1;
                }
            }
            merged.extend_from_slice(&order[i..mid]);
            merged.extend_from_slice(&order[j..end]);
            start = end;
        }
        std::mem::swap(order, &mut merged);
        width *= 2;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ALLOWED_BUILTINS;

    #[test]
    fn test_every_allowed_builtin_is_implemented() {
        for name in ALLOWED_BUILTINS {
            assert!(lookup(name).is_some(), "{} has no implementation", name);
        }
    }

    #[test]
    fn test_registry_has_nothing_outside_allow_list() {
        for name in ["open", "eval", "exec", "getattr", "__import__", "type"] {
            assert!(lookup(name).is_none(), "{} must not be registered", name);
        }
    }

    #[test]
    fn test_method_names() {
        assert_eq!(method_name(&Value::str("x"), "upper"), Some("upper"));
        assert_eq!(method_name(&Value::str("x"), "append"), None);
        assert_eq!(method_name(&Value::list(vec![]), "append"), Some("append"));
        assert_eq!(method_name(&Value::Int(1), "real"), None);
    }

    #[test]
    fn test_finish_reports_arity() {
        let args = CallArgs::positional(vec![Value::Int(1), Value::Int(2)]);
        let err = args.finish("len", 1, 1).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Type("len() takes exactly 1 argument (2 given)".to_string())
        );

        let args = CallArgs::new(vec![], vec![("bogus".to_string(), Value::None)]);
        assert!(args.finish("f", 0, 1).is_err());
    }
}
