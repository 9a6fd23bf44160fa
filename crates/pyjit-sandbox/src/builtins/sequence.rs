//! Collection, iteration and output builtins

use super::{given, int_arg, sort_values, CallArgs, RtResult};
use crate::runtime::{Interpreter, RuntimeError};
use crate::value::{range_len, Key, Value};
use indexmap::IndexMap;

pub(super) fn len(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("len", 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.items.borrow().len(),
        Value::Tuple(t) => t.items.len(),
        Value::Dict(d) => d.entries.borrow().len(),
        Value::Range { start, stop, step } => range_len(*start, *stop, *step),
        other => {
            return Err(RuntimeError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Value::Int(len as i64))
}

pub(super) fn list(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("list", 0, 1)?;
    let items = collect(interp, args.first())?;
    Ok(Value::list(items))
}

pub(super) fn tuple(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("tuple", 0, 1)?;
    let items = collect(interp, args.first())?;
    Ok(Value::tuple(items))
}

fn collect(interp: &mut Interpreter<'_>, iterable: Option<&Value>) -> RtResult<Vec<Value>> {
    let Some(iterable) = iterable else {
        return Ok(Vec::new());
    };
    let items = interp.iterate(iterable)?;
    interp.charge(items.len() as u64)?;
    Ok(items)
}

pub(super) fn dict(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let (positional, keywords) = args.into_parts();
    let source = CallArgs::positional(positional).finish("dict", 0, 1)?;

    let mut entries = IndexMap::new();
    if let Some(source) = source.first() {
        entries.extend(pairs_of(interp, source)?);
    }
    for (name, value) in keywords {
        entries.insert(Key::Str(name.into()), value);
    }
    interp.check_len(entries.len())?;
    Ok(Value::dict(entries))
}

/// Key/value pairs from a dict or from an iterable of 2-item sequences.
pub(super) fn pairs_of(interp: &mut Interpreter<'_>, source: &Value) -> RtResult<Vec<(Key, Value)>> {
    if let Value::Dict(d) = source {
        let entries = d.entries.borrow();
        interp.charge(entries.len() as u64)?;
        return Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }

    let items = interp.iterate(source)?;
    interp.charge(items.len() as u64)?;
    let mut pairs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let pair = interp.iterate(item).map_err(|_| {
            RuntimeError::Type(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                i
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            RuntimeError::Value(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            ))
        })?;
        pairs.push((key.to_key()?, value));
    }
    Ok(pairs)
}

pub(super) fn range(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("range", 1, 3)?;
    let ints = args
        .iter()
        .map(|v| int_arg("range", v))
        .collect::<RtResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked above"),
    };
    if step == 0 {
        return Err(RuntimeError::Value(
            "range() arg 3 must not be zero".to_string(),
        ));
    }
    Ok(Value::Range { start, stop, step })
}

pub(super) fn enumerate(interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let start = args.take_keyword("start");
    let mut args = args.finish("enumerate", 1, 2)?;
    let start = if args.len() == 2 { args.pop() } else { start };
    let start = match start {
        Some(s) => int_arg("enumerate", &s)?,
        None => 0,
    };

    let items = interp.iterate(&args[0])?;
    interp.charge(items.len() as u64)?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let index = start.checked_add(i as i64).ok_or_else(|| {
            RuntimeError::Overflow("integer result out of range".to_string())
        })?;
        out.push(Value::tuple(vec![Value::Int(index), item]));
    }
    Ok(Value::list(out))
}

pub(super) fn zip(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("zip", 0, usize::MAX)?;
    let mut columns = Vec::with_capacity(args.len());
    for arg in &args {
        columns.push(interp.iterate(arg)?.into_iter());
    }
    let rows = columns.iter().map(|c| c.len()).min().unwrap_or(0);
    interp.charge((rows * columns.len()) as u64)?;

    let mut out = Vec::with_capacity(rows);
    for _ in 0..rows {
        let row = columns.iter_mut().filter_map(Iterator::next).collect();
        out.push(Value::tuple(row));
    }
    Ok(Value::list(out))
}

pub(super) fn reversed(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("reversed", 1, 1)?;
    if !matches!(
        args[0],
        Value::Str(_) | Value::List(_) | Value::Tuple(_) | Value::Range { .. } | Value::Dict(_)
    ) {
        return Err(RuntimeError::Type(format!(
            "'{}' object is not reversible",
            args[0].type_name()
        )));
    }
    let mut items = interp.iterate(&args[0])?;
    interp.charge(items.len() as u64)?;
    items.reverse();
    Ok(Value::list(items))
}

pub(super) fn sorted(interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let key = args.take_keyword("key");
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
    let args = args.finish("sorted", 1, 1)?;
    let items = interp.iterate(&args[0])?;
    let sorted = sort_values(interp, items, key, reverse)?;
    Ok(Value::list(sorted))
}

pub(super) fn all(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("all", 1, 1)?;
    let items = interp.iterate(&args[0])?;
    interp.charge(items.len() as u64)?;
    Ok(Value::Bool(items.iter().all(Value::truthy)))
}

pub(super) fn any(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("any", 1, 1)?;
    let items = interp.iterate(&args[0])?;
    interp.charge(items.len() as u64)?;
    Ok(Value::Bool(items.iter().any(Value::truthy)))
}

/// `print` writes to the invocation's console, never to the host's stdout.
pub(super) fn print(interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let sep = separator(args.take_keyword("sep"), " ", "sep")?;
    let end = separator(args.take_keyword("end"), "\n", "end")?;
    let args = args.finish("print", 0, usize::MAX)?;

    let mut line = args
        .iter()
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(&sep);
    line.push_str(&end);
    interp.charge_bytes(line.len())?;
    interp.console().write(&line);
    Ok(Value::None)
}

fn separator(value: Option<Value>, default: &str, name: &str) -> RtResult<String> {
    match given(value) {
        None => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(RuntimeError::Type(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}
