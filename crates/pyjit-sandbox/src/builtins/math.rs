//! Numeric builtins

use super::conversion::float_to_int;
use super::{given, int_arg, CallArgs, RtResult};
use crate::ast::BinOp;
use crate::runtime::{Interpreter, RuntimeError};
use crate::value::{floor_div, floor_mod, Value};
use std::cmp::Ordering;

pub(super) fn abs(_interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("abs", 1, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                RuntimeError::Overflow("integer result out of range".to_string())
            }),
            None => Err(RuntimeError::Type(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

pub(super) fn divmod(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    let args = args.finish("divmod", 2, 2)?;
    let (a, b) = (&args[0], &args[1]);
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Ok(Value::tuple(vec![
            Value::Int(floor_div(x, y)?),
            Value::Int(floor_mod(x, y)?),
        ]));
    }
    if a.as_float().is_none() || b.as_float().is_none() {
        return Err(RuntimeError::Type(format!(
            "unsupported operand type(s) for divmod(): '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )));
    }
    let quotient = interp.binary(BinOp::FloorDiv, a, b)?;
    let remainder = interp.binary(BinOp::Mod, a, b)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

pub(super) fn pow(interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let modulus = args.take_keyword("mod");
    let mut args = args.finish("pow", 2, 3)?;
    let modulus = if args.len() == 3 { args.pop() } else { modulus };

    let Some(modulus) = given(modulus) else {
        return interp.binary(BinOp::Pow, &args[0], &args[1]);
    };
    let (base, exp, m) = match (args[0].as_int(), args[1].as_int(), modulus.as_int()) {
        (Some(b), Some(e), Some(m)) => (b, e, m),
        _ => {
            return Err(RuntimeError::Type(
                "pow() 3rd argument not allowed unless all arguments are integers".to_string(),
            ))
        }
    };
    if m == 0 {
        return Err(RuntimeError::Value("pow() 3rd argument cannot be 0".to_string()));
    }
    if exp < 0 {
        return Err(RuntimeError::Value(
            "pow() 2nd argument cannot be negative when 3rd argument specified".to_string(),
        ));
    }
    Ok(Value::Int(mod_pow(base, exp, m)))
}

/// `base ** exp % m` with the sign of `m`, as Python computes it.
fn mod_pow(base: i64, mut exp: i64, m: i64) -> i64 {
    let m = m as i128;
    let mut result: i128 = 1 % m.abs();
    let mut base = (base as i128).rem_euclid(m.abs());
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m.abs();
        }
        base = base * base % m.abs();
        exp >>= 1;
    }
    if m < 0 && result != 0 {
        result += m;
    }
    result as i64
}

pub(super) fn round(_interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let ndigits = args.take_keyword("ndigits");
    let mut args = args.finish("round", 1, 2)?;
    let ndigits = if args.len() == 2 { args.pop() } else { ndigits };
    let ndigits = match given(ndigits) {
        Some(n) => Some(int_arg("round", &n)?),
        None => None,
    };

    match (&args[0], ndigits) {
        (Value::Float(f), None) => float_to_int(round_half_even(*f)).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            let n = n.clamp(-308, 308) as i32;
            let scale = 10f64.powi(n.abs());
            let rounded = if n >= 0 {
                round_half_even(f * scale) / scale
            } else {
                round_half_even(f / scale) * scale
            };
            Ok(Value::Float(if rounded.is_finite() { rounded } else { *f }))
        }
        (other, ndigits) => {
            let i = other.as_int().ok_or_else(|| {
                RuntimeError::Type(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))
            })?;
            match ndigits {
                Some(n) if n < 0 => round_int(i, n).map(Value::Int),
                _ => Ok(Value::Int(i)),
            }
        }
    }
}

fn round_half_even(f: f64) -> f64 {
    let floor = f.floor();
    let diff = f - floor;
    if diff > 0.5 || (diff == 0.5 && floor % 2.0 != 0.0) {
        floor + 1.0
    } else {
        floor
    }
}

/// Round an integer to `-ndigits` tens, ties to even.
fn round_int(i: i64, ndigits: i64) -> RtResult<i64> {
    let Some(p) = u32::try_from(-ndigits).ok().and_then(|e| 10i64.checked_pow(e)) else {
        return Ok(0);
    };
    let mut q = floor_div(i, p)?;
    let r = i - q * p;
    if 2 * r as i128 > p as i128 || (2 * r as i128 == p as i128 && q % 2 != 0) {
        q += 1;
    }
    q.checked_mul(p)
        .ok_or_else(|| RuntimeError::Overflow("integer result out of range".to_string()))
}

pub(super) fn sum(interp: &mut Interpreter<'_>, mut args: CallArgs) -> RtResult<Value> {
    let start = args.take_keyword("start");
    let mut args = args.finish("sum", 1, 2)?;
    let start = if args.len() == 2 { args.pop() } else { start };
    let mut total = start.unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(RuntimeError::Type(
            "sum() can't sum strings [use ''.join(seq) instead]".to_string(),
        ));
    }

    let items = interp.iterate(&args[0])?;
    interp.charge(items.len() as u64)?;
    for item in items {
        total = interp.binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

pub(super) fn max(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    extremum(interp, args, "max", Ordering::Greater)
}

pub(super) fn min(interp: &mut Interpreter<'_>, args: CallArgs) -> RtResult<Value> {
    extremum(interp, args, "min", Ordering::Less)
}

fn extremum(
    interp: &mut Interpreter<'_>,
    mut args: CallArgs,
    func: &str,
    wanted: Ordering,
) -> RtResult<Value> {
    let key = given(args.take_keyword("key"));
    let default = args.take_keyword("default");
    let args = args.finish(func, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        interp.iterate(&args[0])?
    } else {
        args
    };
    interp.charge(items.len() as u64)?;

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(f) => interp.call_value(f, CallArgs::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank.compare(best_rank)? == Some(wanted),
        };
        if replace {
            best = Some((rank, item));
        }
    }

    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(RuntimeError::Value(format!(
            "{}() arg is an empty sequence",
            func
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(0.5), 0.0);
        assert_eq!(round_half_even(1.5), 2.0);
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(-0.5), -0.0);
        assert_eq!(round_half_even(-1.5), -2.0);
        assert_eq!(round_half_even(2.6), 3.0);
    }

    #[test]
    fn test_round_int() {
        assert_eq!(round_int(1234, -2).unwrap(), 1200);
        assert_eq!(round_int(1250, -2).unwrap(), 1200);
        assert_eq!(round_int(1350, -2).unwrap(), 1400);
        assert_eq!(round_int(-1260, -2).unwrap(), -1300);
        assert_eq!(round_int(5, -30).unwrap(), 0);
    }

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(2, 10, 1000), 24);
        assert_eq!(mod_pow(3, 0, 7), 1);
        assert_eq!(mod_pow(-2, 3, 5), 2);
        assert_eq!(mod_pow(2, 3, -5), -2);
        assert_eq!(mod_pow(i64::MAX, 2, i64::MAX - 1), 1);
    }
}
