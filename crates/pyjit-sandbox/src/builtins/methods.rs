//! Methods on strings, lists, dicts and the data handle

use super::sequence::pairs_of;
use super::{given, int_arg, read_data, sort_values, str_arg, CallArgs, RtResult};
use crate::runtime::{Interpreter, RuntimeError};
use crate::value::{normalize_index, DictObj, Key, ListObj, Value};
use std::rc::Rc;

pub(super) fn str_method(
    interp: &mut Interpreter<'_>,
    s: &Rc<str>,
    name: &'static str,
    args: CallArgs,
) -> RtResult<Value> {
    interp.charge_bytes(s.len())?;
    match name {
        "upper" => {
            args.finish("upper", 0, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "lower" => {
            args.finish("lower", 0, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "title" => {
            args.finish("title", 0, 0)?;
            Ok(Value::str(title_case(s)))
        }
        "strip" | "lstrip" | "rstrip" => {
            let args = args.finish(name, 0, 1)?;
            let chars = match given(args.into_iter().next()) {
                Some(c) => Some(str_arg(name, &c)?),
                None => None,
            };
            let matches = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::str(stripped))
        }
        "split" => split(interp, s, args),
        "splitlines" => {
            args.finish("splitlines", 0, 0)?;
            let lines: Vec<Value> = split_lines(s).into_iter().map(Value::str).collect();
            interp.charge(lines.len() as u64)?;
            Ok(Value::list(lines))
        }
        "join" => {
            let args = args.finish("join", 1, 1)?;
            let items = interp.iterate(&args[0])?;
            interp.charge(items.len() as u64)?;
            let mut parts = Vec::with_capacity(items.len());
            let mut total = 0usize;
            for (i, item) in items.iter().enumerate() {
                let Value::Str(part) = item else {
                    return Err(RuntimeError::Type(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        item.type_name()
                    )));
                };
                total = total.saturating_add(part.len()).saturating_add(s.len());
                interp.check_len(total)?;
                parts.push(part.clone());
            }
            let joined = parts.iter().map(|p| &**p).collect::<Vec<_>>().join(&**s);
            interp.charge_bytes(joined.len())?;
            Ok(Value::str(joined))
        }
        "replace" => {
            let args = args.finish("replace", 2, 2)?;
            let old = str_arg("replace", &args[0])?;
            let new = str_arg("replace", &args[1])?;
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*old).count()
            };
            let estimate = s
                .len()
                .saturating_add(occurrences.saturating_mul(new.len()));
            interp.check_len(estimate)?;
            interp.charge_bytes(estimate)?;
            Ok(Value::str(s.replace(&*old, &new)))
        }
        "startswith" | "endswith" => {
            let args = args.finish(name, 1, 1)?;
            let candidates = match &args[0] {
                Value::Str(p) => vec![p.clone()],
                Value::Tuple(t) => t
                    .items
                    .iter()
                    .map(|p| str_arg(name, p))
                    .collect::<RtResult<Vec<_>>>()?,
                other => {
                    return Err(RuntimeError::Type(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        other.type_name()
                    )))
                }
            };
            let hit = candidates.iter().any(|p| {
                if name == "startswith" {
                    s.starts_with(&**p)
                } else {
                    s.ends_with(&**p)
                }
            });
            Ok(Value::Bool(hit))
        }
        "find" => {
            let args = args.finish("find", 1, 1)?;
            let needle = str_arg("find", &args[0])?;
            let index = s
                .find(&*needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "count" => {
            let args = args.finish("count", 1, 1)?;
            let needle = str_arg("count", &args[0])?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&*needle).count()
            };
            Ok(Value::Int(count as i64))
        }
        "isdigit" | "isalpha" | "isspace" => {
            args.finish(name, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c: char| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
        }
        other => Err(unknown_method("str", other)),
    }
}

fn split(interp: &mut Interpreter<'_>, s: &str, mut args: CallArgs) -> RtResult<Value> {
    let sep = args.take_keyword("sep");
    let maxsplit = args.take_keyword("maxsplit");
    let mut args = args.finish("split", 0, 2)?;
    let maxsplit = if args.len() == 2 { args.pop() } else { maxsplit };
    let sep = if args.len() == 1 { args.pop() } else { sep };

    let limit = match given(maxsplit) {
        Some(m) => usize::try_from(int_arg("split", &m)?).ok(),
        None => None,
    };
    let parts: Vec<&str> = match given(sep) {
        Some(sep) => {
            let sep = str_arg("split", &sep)?;
            if sep.is_empty() {
                return Err(RuntimeError::Value("empty separator".to_string()));
            }
            match limit {
                Some(n) => s.splitn(n + 1, &*sep).collect(),
                None => s.split(&*sep).collect(),
            }
        }
        None => split_whitespace(s, limit),
    };
    interp.charge(parts.len() as u64)?;
    Ok(Value::list(parts.into_iter().map(Value::str).collect()))
}

/// Whitespace split with an optional cap; the remainder is kept verbatim.
fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit.is_some_and(|n| parts.len() == n) {
            parts.push(rest);
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    parts
}

fn split_lines(s: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        match rest.find(['\n', '\r']) {
            Some(i) => {
                lines.push(&rest[..i]);
                let skip = if rest[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[i + skip..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

pub(super) fn list_method(
    interp: &mut Interpreter<'_>,
    l: &Rc<ListObj>,
    name: &'static str,
    args: CallArgs,
) -> RtResult<Value> {
    match name {
        "append" => {
            let mut args = args.finish("append", 1, 1)?;
            interp.check_len(l.items.borrow().len() + 1)?;
            l.items.borrow_mut().extend(args.pop());
            Ok(Value::None)
        }
        "extend" => {
            let args = args.finish("extend", 1, 1)?;
            let extra = interp.iterate(&args[0])?;
            interp.charge(extra.len() as u64)?;
            interp.check_len(l.items.borrow().len() + extra.len())?;
            l.items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            let mut args = args.finish("insert", 2, 2)?;
            let item = args.pop().unwrap_or(Value::None);
            let index = int_arg("insert", &args[0])?;
            let len = l.items.borrow().len();
            interp.check_len(len + 1)?;
            let position = if index < 0 {
                (len as i64 + index).max(0) as usize
            } else {
                (index as usize).min(len)
            };
            l.items.borrow_mut().insert(position, item);
            Ok(Value::None)
        }
        "pop" => {
            let args = args.finish("pop", 0, 1)?;
            let index = match args.first() {
                Some(i) => int_arg("pop", i)?,
                None => -1,
            };
            let mut items = l.items.borrow_mut();
            if items.is_empty() {
                return Err(RuntimeError::Index("pop from empty list".to_string()));
            }
            let i = normalize_index(index, items.len(), "pop")?;
            Ok(items.remove(i))
        }
        "remove" => {
            let args = args.finish("remove", 1, 1)?;
            let position = position_of(interp, l, &args[0])?
                .ok_or_else(|| RuntimeError::Value("list.remove(x): x not in list".to_string()))?;
            l.items.borrow_mut().remove(position);
            Ok(Value::None)
        }
        "index" => {
            let args = args.finish("index", 1, 1)?;
            let position = position_of(interp, l, &args[0])?.ok_or_else(|| {
                RuntimeError::Value(format!("{} is not in list", args[0].repr()))
            })?;
            Ok(Value::Int(position as i64))
        }
        "count" => {
            let args = args.finish("count", 1, 1)?;
            let items = l.items.borrow().clone();
            interp.charge(items.len() as u64)?;
            let mut count = 0;
            for item in &items {
                if item.equals(&args[0])? {
                    count += 1;
                }
            }
            Ok(Value::Int(count))
        }
        "sort" => {
            let mut args = args;
            let key = args.take_keyword("key");
            let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
            args.finish("sort", 0, 0)?;
            let items = l.items.take();
            match sort_values(interp, items.clone(), key, reverse) {
                Ok(sorted) => {
                    *l.items.borrow_mut() = sorted;
                    Ok(Value::None)
                }
                Err(e) => {
                    *l.items.borrow_mut() = items;
                    Err(e)
                }
            }
        }
        "reverse" => {
            args.finish("reverse", 0, 0)?;
            interp.charge(l.items.borrow().len() as u64)?;
            l.items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            args.finish("copy", 0, 0)?;
            let items = l.items.borrow().clone();
            interp.charge(items.len() as u64)?;
            Ok(Value::list(items))
        }
        "clear" => {
            args.finish("clear", 0, 0)?;
            let old = l.items.take();
            drop(old);
            Ok(Value::None)
        }
        other => Err(unknown_method("list", other)),
    }
}

/// Index of the first item equal to `needle`.
///
/// Works on a snapshot so comparisons never hold a borrow of the list.
fn position_of(interp: &mut Interpreter<'_>, l: &ListObj, needle: &Value) -> RtResult<Option<usize>> {
    let items = l.items.borrow().clone();
    interp.charge(items.len() as u64)?;
    for (i, item) in items.iter().enumerate() {
        if item.equals(needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

pub(super) fn dict_method(
    interp: &mut Interpreter<'_>,
    d: &Rc<DictObj>,
    name: &'static str,
    args: CallArgs,
) -> RtResult<Value> {
    match name {
        "get" => {
            let mut args = args.finish("get", 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let key = args[0].to_key()?;
            let found = d.entries.borrow().get(&key).cloned();
            Ok(found.or(default).unwrap_or(Value::None))
        }
        "keys" | "values" | "items" => {
            args.finish(name, 0, 0)?;
            let entries = d.entries.borrow();
            interp.charge(entries.len() as u64)?;
            let out = match name {
                "keys" => entries.keys().map(|k| k.to_value()).collect(),
                "values" => entries.values().cloned().collect(),
                _ => entries
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                    .collect(),
            };
            Ok(Value::list(out))
        }
        "pop" => {
            let mut args = args.finish("pop", 1, 2)?;
            let default = if args.len() == 2 { args.pop() } else { None };
            let key = args[0].to_key()?;
            let removed = d.entries.borrow_mut().shift_remove(&key);
            removed
                .or(default)
                .ok_or_else(|| RuntimeError::Key(args[0].repr()))
        }
        "setdefault" => {
            let mut args = args.finish("setdefault", 1, 2)?;
            let default = if args.len() == 2 {
                args.pop().unwrap_or(Value::None)
            } else {
                Value::None
            };
            let key = args[0].to_key()?;
            let existing = d.entries.borrow().get(&key).cloned();
            if let Some(value) = existing {
                return Ok(value);
            }
            interp.check_len(d.entries.borrow().len() + 1)?;
            d.entries.borrow_mut().insert(key, default.clone());
            Ok(default)
        }
        "update" => {
            let (positional, keywords) = args.into_parts();
            let source = CallArgs::positional(positional).finish("update", 0, 1)?;
            let mut pairs = match source.first() {
                Some(source) => pairs_of(interp, source)?,
                None => Vec::new(),
            };
            pairs.extend(keywords.into_iter().map(|(k, v)| (Key::Str(k.into()), v)));
            interp.check_len(d.entries.borrow().len() + pairs.len())?;
            d.entries.borrow_mut().extend(pairs);
            Ok(Value::None)
        }
        "copy" => {
            args.finish("copy", 0, 0)?;
            let entries = d.entries.borrow().clone();
            interp.charge(entries.len() as u64)?;
            Ok(Value::dict(entries))
        }
        "clear" => {
            args.finish("clear", 0, 0)?;
            let old = d.entries.take();
            drop(old);
            Ok(Value::None)
        }
        other => Err(unknown_method("dict", other)),
    }
}

pub(super) fn data_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &'static str,
    args: CallArgs,
) -> RtResult<Value> {
    let Value::Data(handle) = receiver else {
        return Err(RuntimeError::Internal("expected the data handle".to_string()));
    };
    match name {
        "read" => {
            args.finish("read", 0, 0)?;
            read_data(interp, receiver).map(Value::str)
        }
        "lines" => {
            args.finish("lines", 0, 0)?;
            let text = read_data(interp, receiver)?;
            let lines: Vec<Value> = text.lines().map(Value::str).collect();
            interp.charge(lines.len() as u64)?;
            Ok(Value::list(lines))
        }
        "size" => {
            args.finish("size", 0, 0)?;
            i64::try_from(handle.byte_length())
                .map(Value::Int)
                .map_err(|_| RuntimeError::Overflow("data size out of range".to_string()))
        }
        other => Err(unknown_method("data_file", other)),
    }
}

fn unknown_method(type_name: &str, name: &str) -> RuntimeError {
    RuntimeError::Attribute(format!(
        "'{}' object has no attribute '{}'",
        type_name, name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace() {
        assert_eq!(split_whitespace("  a  b c ", None), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a  b  c", Some(1)), vec!["a", "b  c"]);
        assert_eq!(split_whitespace("a b", Some(0)), vec!["a b"]);
        assert!(split_whitespace("   ", None).is_empty());
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\nb\r\nc\rd"), vec!["a", "b", "c", "d"]);
        assert_eq!(split_lines("a\n\nb\n"), vec!["a", "", "b"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hello world"), "Hello World");
        assert_eq!(title_case("they're BILL's"), "They'Re Bill'S");
        assert_eq!(title_case("x1y"), "X1Y");
    }
}
