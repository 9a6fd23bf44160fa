//! Type conversion builtins

use super::{int_arg, CallArgs, RtResult};
use crate::runtime::{Interpreter, RuntimeError};
use crate::value::Value;
use std::num::IntErrorKind;

pub(super) fn bool(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("bool", 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
}

pub(super) fn str(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("str", 0, 1)?;
    let text = args.first().map(Value::to_display).unwrap_or_default();
    interp.charge_bytes(text.len())?;
    Ok(Value::str(text))
}

pub(super) fn repr(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("repr", 1, 1)?;
    let text = args[0].repr();
    interp.charge_bytes(text.len())?;
    Ok(Value::str(text))
}

pub(super) fn int(_interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let base_keyword = args.take_keyword("base");
    let mut args = args.finish("int", 0, 2)?;
    let base = if args.len() == 2 {
        args.pop()
    } else {
        base_keyword
    };
    let Some(value) = args.pop() else {
        return Ok(Value::Int(0));
    };

    match (value, base) {
        (Value::Str(s), base) => {
            let radix = match base {
                Some(b) => int_arg("int", &b)?,
                None => 10,
            };
            parse_int(&s, radix).map(Value::Int)
        }
        (_, Some(_)) => Err(RuntimeError::Type(
            "int() can't convert non-string with explicit base".to_string(),
        )),
        (Value::Float(f), None) => float_to_int(f).map(Value::Int),
        (other, None) => other.as_int().map(Value::Int).ok_or_else(|| {
            RuntimeError::Type(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

pub(super) fn float(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("float", 0, 1)?;
    let Some(value) = args.first() else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| {
                RuntimeError::Value(format!(
                    "could not convert string to float: {}",
                    value.repr()
                ))
            }),
        other => other.as_float().map(Value::Float).ok_or_else(|| {
            RuntimeError::Type(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

pub(super) fn chr(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("chr", 1, 1)?;
    let code = int_arg("chr", &args[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.to_string()))
        .ok_or_else(|| RuntimeError::Value("chr() arg not in range(0x110000)".to_string()))
}

pub(super) fn ord(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("ord", 1, 1)?;
    let Value::Str(s) = &args[0] else {
        return Err(RuntimeError::Type(format!(
            "ord() expected string of length 1, but {} found",
            args[0].type_name()
        )));
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(RuntimeError::Type(format!(
            "ord() expected a character, but string of length {} found",
            s.chars().count()
        ))),
    }
}

fn parse_int(text: &str, radix: i64) -> RtResult<i64> {
    let invalid = || {
        RuntimeError::Value(format!(
            "invalid literal for int() with base {}: {}",
            radix,
            Value::str(text).repr()
        ))
    };
    if !(2..=36).contains(&radix) {
        return Err(RuntimeError::Value(
            "int() base must be >= 2 and <= 36".to_string(),
        ));
    }

    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let prefix = match radix {
        16 => Some(["0x", "0X"]),
        8 => Some(["0o", "0O"]),
        2 => Some(["0b", "0B"]),
        _ => None,
    };
    let unsigned = prefix
        .and_then(|p| p.iter().find_map(|p| unsigned.strip_prefix(p)))
        .unwrap_or(unsigned);
    if unsigned.is_empty()
        || unsigned.starts_with('_')
        || unsigned.ends_with('_')
        || unsigned.contains("__")
        || unsigned.starts_with(['+', '-'])
    {
        return Err(invalid());
    }

    let digits = format!(
        "{}{}",
        if negative { "-" } else { "" },
        unsigned.replace('_', "")
    );
    i64::from_str_radix(&digits, radix as u32).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            RuntimeError::Overflow("int too large to convert".to_string())
        }
        _ => invalid(),
    })
}

pub(super) fn float_to_int(f: f64) -> RtResult<i64> {
    if f.is_nan() {
        return Err(RuntimeError::Value(
            "cannot convert float NaN to integer".to_string(),
        ));
    }
    if f.is_infinite() {
        return Err(RuntimeError::Overflow(
            "cannot convert float infinity to integer".to_string(),
        ));
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_775_8e18 || truncated >= 9.223_372_036_854_775_8e18 {
        return Err(RuntimeError::Overflow("int too large to convert".to_string()));
    }
    Ok(truncated as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("ff", 16).unwrap(), 255);
        assert_eq!(parse_int("0x1F", 16).unwrap(), 31);
        assert_eq!(parse_int("101", 2).unwrap(), 5);
        assert!(matches!(parse_int("abc", 10), Err(RuntimeError::Value(_))));
        assert!(matches!(parse_int("", 10), Err(RuntimeError::Value(_))));
        assert!(matches!(parse_int("--1", 10), Err(RuntimeError::Value(_))));
        assert!(matches!(parse_int("1", 1), Err(RuntimeError::Value(_))));
        assert!(matches!(
            parse_int("99999999999999999999", 10),
            Err(RuntimeError::Overflow(_))
        ));
    }

    #[test]
    fn test_float_to_int() {
        assert_eq!(float_to_int(3.9).unwrap(), 3);
        assert_eq!(float_to_int(-3.9).unwrap(), -3);
        assert!(matches!(float_to_int(f64::NAN), Err(RuntimeError::Value(_))));
        assert!(matches!(float_to_int(f64::INFINITY), Err(RuntimeError::Overflow(_))));
        assert!(matches!(float_to_int(1e19), Err(RuntimeError::Overflow(_))));
    }
}
