//! Math functions

use cellgraph_core::ErrorCode;
use rand::Rng;

use crate::value::{EvalResult, Value};

use super::criteria::{anchored, select, shape_of};
use super::{collect_numbers, unary_math, EvaluationContext};

/// Strip binary noise below 15 significant digits, so 2.675*100 is 267.5
fn denoise(x: f64) -> f64 {
    format!("{:.14e}", x).parse().unwrap_or(x)
}

fn digits_arg(args: &[Value], index: usize, ctx: &mut EvaluationContext<'_>) -> EvalResult<i32> {
    Ok(ctx.number_or(args.get(index), 0.0)?.trunc().clamp(-308.0, 308.0) as i32)
}

/// Round |n| at `digits` with `f`, then restore the sign
fn round_with(n: f64, digits: i32, f: impl Fn(f64) -> f64) -> Value {
    let factor = 10_f64.powi(digits.abs());
    let magnitude = if digits >= 0 {
        f(denoise(n.abs() * factor)) / factor
    } else {
        f(denoise(n.abs() / factor)) * factor
    };
    Value::number(magnitude.copysign(n))
}

/// SUM(number1, [number2], ...)
pub fn fn_sum(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    Ok(Value::number(numbers.iter().sum()))
}

/// PRODUCT(number1, [number2], ...)
pub fn fn_product(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    if numbers.is_empty() {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::number(numbers.iter().product()))
}

/// SUMSQ(number1, [number2], ...)
pub fn fn_sumsq(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    Ok(Value::number(numbers.iter().map(|n| n * n).sum()))
}

/// ABS(number)
pub fn fn_abs(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::abs)
}

/// SIGN(number) - 1, -1 or 0
pub fn fn_sign(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, |n| {
        if n > 0.0 {
            1.0
        } else if n < 0.0 {
            -1.0
        } else {
            0.0
        }
    })
}

/// INT(number) - rounds toward negative infinity
pub fn fn_int(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, |n| denoise(n).floor())
}

/// TRUNC(number, [num_digits]) - rounds toward zero
pub fn fn_trunc(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let digits = digits_arg(args, 1, ctx)?;
    Ok(round_with(n, digits, f64::floor))
}

/// ROUND(number, num_digits)
/// Rounds half away from zero; negative digits round left of the point.
pub fn fn_round(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let digits = digits_arg(args, 1, ctx)?;
    Ok(round_with(n, digits, f64::round))
}

/// ROUNDUP(number, num_digits) - away from zero
pub fn fn_roundup(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let digits = digits_arg(args, 1, ctx)?;
    Ok(round_with(n, digits, f64::ceil))
}

/// ROUNDDOWN(number, num_digits) - toward zero
pub fn fn_rounddown(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let digits = digits_arg(args, 1, ctx)?;
    Ok(round_with(n, digits, f64::floor))
}

/// CEILING(number, significance)
pub fn fn_ceiling(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let significance = ctx.number(&args[1])?;
    if significance == 0.0 {
        return Ok(Value::Number(0.0));
    }
    if n > 0.0 && significance < 0.0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    Ok(Value::number(denoise(n / significance).ceil() * significance))
}

/// FLOOR(number, significance)
pub fn fn_floor(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?;
    let significance = ctx.number(&args[1])?;
    if significance == 0.0 {
        return Ok(Value::Error(ErrorCode::Div0));
    }
    if n > 0.0 && significance < 0.0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    Ok(Value::number(denoise(n / significance).floor() * significance))
}

/// MOD(number, divisor)
/// The result has the sign of the divisor: number - divisor * floor(number/divisor)
pub fn fn_mod(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let number = ctx.number(&args[0])?;
    let divisor = ctx.number(&args[1])?;
    if divisor == 0.0 {
        return Ok(Value::Error(ErrorCode::Div0));
    }
    Ok(Value::number(number - divisor * denoise(number / divisor).floor()))
}

/// POWER(number, power)
pub fn fn_power(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let base = ctx.number(&args[0])?;
    let exponent = ctx.number(&args[1])?;
    Ok(power(base, exponent))
}

/// `base ^ exponent` with spreadsheet error rules
pub(crate) fn power(base: f64, exponent: f64) -> Value {
    if base == 0.0 && exponent == 0.0 {
        return Value::Error(ErrorCode::Num);
    }
    if base == 0.0 && exponent < 0.0 {
        return Value::Error(ErrorCode::Div0);
    }
    Value::number(base.powf(exponent))
}

/// SQRT(number)
pub fn fn_sqrt(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::sqrt)
}

/// EXP(number)
pub fn fn_exp(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::exp)
}

fn positive(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<f64> {
    let n = ctx.number(&args[0])?;
    if n <= 0.0 {
        return Err(ErrorCode::Num.into());
    }
    Ok(n)
}

/// LN(number)
pub fn fn_ln(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::number(positive(args, ctx)?.ln()))
}

/// LOG(number, [base]) - base 10 by default
pub fn fn_log(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = positive(args, ctx)?;
    let base = ctx.number_or(args.get(1), 10.0)?;
    if base <= 0.0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    if base == 1.0 {
        return Ok(Value::Error(ErrorCode::Div0));
    }
    Ok(Value::number(n.ln() / base.ln()))
}

/// LOG10(number)
pub fn fn_log10(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::number(positive(args, ctx)?.log10()))
}

/// PI()
pub fn fn_pi(_args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Number(std::f64::consts::PI))
}

pub fn fn_sin(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::sin)
}

pub fn fn_cos(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::cos)
}

pub fn fn_tan(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::tan)
}

/// ASIN(number) - #NUM! outside [-1, 1]
pub fn fn_asin(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::asin)
}

/// ACOS(number) - #NUM! outside [-1, 1]
pub fn fn_acos(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::acos)
}

pub fn fn_atan(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::atan)
}

/// ATAN2(x_num, y_num) - note the argument order is x first
pub fn fn_atan2(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let x = ctx.number(&args[0])?;
    let y = ctx.number(&args[1])?;
    if x == 0.0 && y == 0.0 {
        return Ok(Value::Error(ErrorCode::Div0));
    }
    Ok(Value::number(y.atan2(x)))
}

pub fn fn_radians(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::to_radians)
}

pub fn fn_degrees(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, f64::to_degrees)
}

/// EVEN(number) - away from zero to the next even integer
pub fn fn_even(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, |n| {
        let up = (denoise(n.abs()) / 2.0).ceil() * 2.0;
        up.copysign(n)
    })
}

/// ODD(number) - away from zero to the next odd integer
pub fn fn_odd(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    unary_math(args, ctx, |n| {
        let up = denoise(n.abs()).ceil();
        let odd = if up % 2.0 == 0.0 { up + 1.0 } else { up };
        if n < 0.0 {
            -odd
        } else {
            odd
        }
    })
}

/// FACT(number)
pub fn fn_fact(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let n = ctx.number(&args[0])?.trunc();
    if n < 0.0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    Ok(Value::number((1..=n as u64).map(|i| i as f64).product()))
}

/// RAND() - Returns a random number between 0 and 1
/// This is a volatile function that returns a different value on each calculation.
pub fn fn_rand(_args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let mut rng = rand::thread_rng();
    Ok(Value::Number(rng.gen::<f64>()))
}

/// RANDBETWEEN(bottom, top) - Returns a random integer between bottom and top (inclusive)
/// This is a volatile function that returns a different value on each calculation.
pub fn fn_randbetween(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let bottom = ctx.number(&args[0])?.ceil() as i64;
    let top = ctx.number(&args[1])?.floor() as i64;
    if bottom > top {
        return Ok(Value::Error(ErrorCode::Num));
    }
    let mut rng = rand::thread_rng();
    Ok(Value::Number(rng.gen_range(bottom..=top) as f64))
}

/// SUMPRODUCT(array1, [array2], ...)
/// Arrays must share a shape; non-numeric elements count as zero.
pub fn fn_sumproduct(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let shape = shape_of(&args[0]);
    let mut grids = Vec::with_capacity(args.len());
    for arg in args {
        if shape_of(arg) != shape {
            return Ok(Value::Error(ErrorCode::Value));
        }
        grids.push(ctx.grid(arg)?);
    }
    let rows = grids.iter().map(|g| g.height()).min().unwrap_or(0);
    let cols = grids.iter().map(|g| g.width()).min().unwrap_or(0);
    let mut total = 0.0;
    for r in 0..rows {
        for c in 0..cols {
            let mut product = 1.0;
            for grid in &grids {
                match grid.get(r, c) {
                    Some(Value::Number(n)) => product *= n,
                    Some(Value::Error(e)) => return Err((*e).into()),
                    _ => product = 0.0,
                }
            }
            total += product;
        }
    }
    Ok(Value::number(total))
}

/// Sum of the numbers of `target` at the selected offsets
pub(crate) fn sum_selected(
    target: &Value,
    positions: &[(usize, usize)],
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<(f64, usize)> {
    let grid = ctx.grid(target)?;
    let mut sum = 0.0;
    let mut count = 0;
    for &(r, c) in positions {
        match grid.get(r, c) {
            Some(Value::Number(n)) => {
                sum += n;
                count += 1;
            }
            Some(Value::Error(e)) => return Err((*e).into()),
            _ => {}
        }
    }
    Ok((sum, count))
}

/// SUMIF(range, criteria, [sum_range])
pub fn fn_sumif(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let selection = select(&args[..2], ctx)?;
    let target = match args.get(2) {
        Some(Value::Blank) | None => args[0].clone(),
        Some(sum_range) => anchored(sum_range, shape_of(&args[0]), ctx),
    };
    let (sum, _) = sum_selected(&target, &selection.positions, ctx)?;
    Ok(Value::number(sum))
}

/// SUMIFS(sum_range, criteria_range1, criteria1, ...)
pub fn fn_sumifs(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    if shape_of(&args[0]) != shape_of(&args[1]) {
        return Ok(Value::Error(ErrorCode::Value));
    }
    let selection = select(&args[1..], ctx)?;
    let (sum, _) = sum_selected(&args[0], &selection.positions, ctx)?;
    Ok(Value::number(sum))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::value::Value;
    use cellgraph_core::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rounding() {
        assert_eq!(num("=ROUND(2.5,0)"), 3.0);
        assert_eq!(num("=ROUND(-2.5,0)"), -3.0);
        assert_eq!(num("=ROUND(2.675,2)"), 2.68);
        assert_eq!(num("=ROUND(1234.5,-2)"), 1200.0);
        assert_eq!(num("=ROUNDUP(3.21,1)"), 3.3);
        assert_eq!(num("=ROUNDUP(-3.21,1)"), -3.3);
        assert_eq!(num("=ROUNDDOWN(3.29,1)"), 3.2);
        assert_eq!(num("=TRUNC(-8.9)"), -8.0);
        assert_eq!(num("=INT(-8.9)"), -9.0);
        assert_eq!(num("=CEILING(2.1,0.5)"), 2.5);
        assert_eq!(num("=FLOOR(2.9,0.5)"), 2.5);
        assert_eq!(eval("=FLOOR(1,0)"), Value::Error(ErrorCode::Div0));
    }

    #[test]
    fn test_mod_sign_follows_divisor() {
        assert_eq!(num("=MOD(3,2)"), 1.0);
        assert_eq!(num("=MOD(-3,2)"), 1.0);
        assert_eq!(num("=MOD(3,-2)"), -1.0);
        assert_eq!(eval("=MOD(1,0)"), Value::Error(ErrorCode::Div0));
    }

    #[test]
    fn test_domain_errors() {
        assert_eq!(eval("=SQRT(-1)"), Value::Error(ErrorCode::Num));
        assert_eq!(eval("=LN(0)"), Value::Error(ErrorCode::Num));
        assert_eq!(eval("=LOG(8,1)"), Value::Error(ErrorCode::Div0));
        assert_eq!(eval("=ASIN(2)"), Value::Error(ErrorCode::Num));
        assert_eq!(eval("=POWER(0,0)"), Value::Error(ErrorCode::Num));
        assert_eq!(eval("=POWER(0,-1)"), Value::Error(ErrorCode::Div0));
        assert_eq!(eval("=ATAN2(0,0)"), Value::Error(ErrorCode::Div0));
        assert_eq!(eval("=FACT(-1)"), Value::Error(ErrorCode::Num));
    }

    #[test]
    fn test_misc_math() {
        assert!((num("=LOG(8,2)") - 3.0).abs() < 1e-12);
        assert!((num("=LOG10(1000)") - 3.0).abs() < 1e-12);
        assert_eq!(num("=EVEN(1.5)"), 2.0);
        assert_eq!(num("=EVEN(-3)"), -4.0);
        assert_eq!(num("=ODD(2)"), 3.0);
        assert_eq!(num("=ODD(-1.5)"), -3.0);
        assert_eq!(num("=FACT(5)"), 120.0);
        assert_eq!(num("=SIGN(-0.1)"), -1.0);
        assert_eq!(num("=ROUND(DEGREES(PI()),9)"), 180.0);
        assert_eq!(num("=PRODUCT(2,3,4)"), 24.0);
        assert_eq!(num("=SUMSQ(3,4)"), 25.0);
    }

    #[test]
    fn test_random() {
        for _ in 0..20 {
            let r = num("=RAND()");
            assert!((0.0..1.0).contains(&r));
            let n = num("=RANDBETWEEN(1,3)");
            assert!([1.0, 2.0, 3.0].contains(&n));
        }
        assert_eq!(eval("=RANDBETWEEN(5,1)"), Value::Error(ErrorCode::Num));
    }

    #[test]
    fn test_sumproduct() {
        let cells = [("A1", "1"), ("A2", "2"), ("A3", "3"), ("B1", "4"), ("B2", "x"), ("B3", "6")];
        assert_eq!(eval_with(&cells, "=SUMPRODUCT(A1:A3,B1:B3)"), Value::Number(22.0));
        assert_eq!(eval_with(&cells, "=SUMPRODUCT(A1:A3,B1:B2)"), Value::Error(ErrorCode::Value));
        assert_eq!(eval("=SUMPRODUCT({1,2},{3,4})"), Value::Number(11.0));
    }

    #[test]
    fn test_sumif_family() {
        let cells = [
            ("A1", "apple"),
            ("A2", "pear"),
            ("A3", "apple"),
            ("B1", "10"),
            ("B2", "20"),
            ("B3", "30"),
            ("C1", "1"),
            ("C2", "2"),
            ("C3", "3"),
        ];
        assert_eq!(eval_with(&cells, "=SUMIF(A1:A3,\"apple\",B1:B3)"), Value::Number(40.0));
        assert_eq!(eval_with(&cells, "=SUMIF(A1:A3,\"apple\",B1)"), Value::Number(40.0));
        assert_eq!(eval_with(&cells, "=SUMIF(B1:B3,\">15\")"), Value::Number(50.0));
        assert_eq!(
            eval_with(&cells, "=SUMIFS(B1:B3,A1:A3,\"a*\",C1:C3,\">1\")"),
            Value::Number(30.0)
        );
        assert_eq!(
            eval_with(&cells, "=SUMIFS(B1:B3,A1:A2,\"a*\")"),
            Value::Error(ErrorCode::Value)
        );
        assert_eq!(eval_with(&cells, "=SUMIF(A:A,\"pear\",B:B)"), Value::Number(20.0));
    }
}
