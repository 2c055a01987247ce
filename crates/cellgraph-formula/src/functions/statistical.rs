//! Statistical functions

use std::cmp::Ordering;

use cellgraph_core::ErrorCode;

use crate::operand::to_number;
use crate::value::{EvalResult, Value};

use super::criteria::{anchored, select, shape_of};
use super::math::sum_selected;
use super::{collect_numbers, EvaluationContext};

fn is_reference_like(v: &Value) -> bool {
    matches!(v, Value::Reference(_) | Value::Area(_) | Value::RefList(_) | Value::Array(_))
}

/// COUNT(value1, ...) - numbers in references, plus direct arguments that
/// read as numbers. Errors are not counted and do not propagate.
pub fn fn_count(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let mut count = 0usize;
    for arg in args {
        if is_reference_like(arg) {
            count += ctx
                .referenced_values(arg)?
                .iter()
                .filter(|v| matches!(v, Value::Number(_)))
                .count();
        } else if !matches!(arg, Value::Blank) && to_number(arg).is_ok() {
            count += 1;
        }
    }
    Ok(Value::Number(count as f64))
}

/// COUNTA(value1, ...) - every non-blank value, errors included
pub fn fn_counta(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let mut count = 0usize;
    for arg in args {
        if is_reference_like(arg) {
            count += ctx
                .referenced_values(arg)?
                .iter()
                .filter(|v| !matches!(v, Value::Blank))
                .count();
        } else if !matches!(arg, Value::Blank) {
            count += 1;
        }
    }
    Ok(Value::Number(count as f64))
}

/// COUNTBLANK(range) - empty cells and cells holding empty text
pub fn fn_countblank(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let sheets = match &args[0] {
        Value::Area(area) => area.sheets.iter().count(),
        Value::Reference(r) => r.sheets.iter().count(),
        _ => return Ok(Value::Error(ErrorCode::Value)),
    };
    let (height, width) = shape_of(&args[0]);
    let filled = ctx
        .referenced_values(&args[0])?
        .iter()
        .filter(|v| match v {
            Value::Blank => false,
            Value::Text(s) => !s.is_empty(),
            _ => true,
        })
        .count();
    Ok(Value::Number((height * width * sheets - filled) as f64))
}

/// COUNTIF(range, criteria)
pub fn fn_countif(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let selection = select(args, ctx)?;
    Ok(Value::Number((selection.positions.len() + selection.blank_matches) as f64))
}

/// COUNTIFS(criteria_range1, criteria1, ...)
pub fn fn_countifs(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    fn_countif(args, ctx)
}

/// AVERAGE(number1, ...)
pub fn fn_average(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    if numbers.is_empty() {
        return Ok(Value::Error(ErrorCode::Div0));
    }
    Ok(Value::number(numbers.iter().sum::<f64>() / numbers.len() as f64))
}

fn mean(sum: f64, count: usize) -> Value {
    if count == 0 {
        Value::Error(ErrorCode::Div0)
    } else {
        Value::number(sum / count as f64)
    }
}

/// AVERAGEIF(range, criteria, [average_range])
pub fn fn_averageif(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let selection = select(&args[..2], ctx)?;
    let target = match args.get(2) {
        Some(Value::Blank) | None => args[0].clone(),
        Some(range) => anchored(range, shape_of(&args[0]), ctx),
    };
    let (sum, count) = sum_selected(&target, &selection.positions, ctx)?;
    Ok(mean(sum, count))
}

/// AVERAGEIFS(average_range, criteria_range1, criteria1, ...)
pub fn fn_averageifs(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    if shape_of(&args[0]) != shape_of(&args[1]) {
        return Ok(Value::Error(ErrorCode::Value));
    }
    let selection = select(&args[1..], ctx)?;
    let (sum, count) = sum_selected(&args[0], &selection.positions, ctx)?;
    Ok(mean(sum, count))
}

/// MIN(number1, ...) - 0 when there are no numbers
pub fn fn_min(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    Ok(Value::Number(numbers.into_iter().reduce(f64::min).unwrap_or(0.0)))
}

/// MAX(number1, ...) - 0 when there are no numbers
pub fn fn_max(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = collect_numbers(args, ctx)?;
    Ok(Value::Number(numbers.into_iter().reduce(f64::max).unwrap_or(0.0)))
}

fn sorted_numbers(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Vec<f64>> {
    let mut numbers = collect_numbers(args, ctx)?;
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Ok(numbers)
}

/// MEDIAN(number1, ...)
pub fn fn_median(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = sorted_numbers(args, ctx)?;
    let n = numbers.len();
    if n == 0 {
        return Ok(Value::Error(ErrorCode::Num));
    }
    if n % 2 == 1 {
        Ok(Value::Number(numbers[n / 2]))
    } else {
        Ok(Value::Number((numbers[n / 2 - 1] + numbers[n / 2]) / 2.0))
    }
}

/// k as a 1-based rank into `len` values
fn rank(k: &Value, len: usize, ctx: &mut EvaluationContext<'_>) -> EvalResult<usize> {
    let k = ctx.number(k)?.ceil();
    if k < 1.0 || k as usize > len {
        return Err(ErrorCode::Num.into());
    }
    Ok(k as usize)
}

/// LARGE(array, k)
pub fn fn_large(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = sorted_numbers(&args[..1], ctx)?;
    let k = rank(&args[1], numbers.len(), ctx)?;
    Ok(Value::Number(numbers[numbers.len() - k]))
}

/// SMALL(array, k)
pub fn fn_small(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let numbers = sorted_numbers(&args[..1], ctx)?;
    let k = rank(&args[1], numbers.len(), ctx)?;
    Ok(Value::Number(numbers[k - 1]))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::value::Value;
    use cellgraph_core::ErrorCode;
    use pretty_assertions::assert_eq;

    const DATA: [(&str, &str); 7] = [
        ("A1", "3"),
        ("A2", "text"),
        ("A3", "TRUE"),
        ("A4", "9"),
        ("A5", "=\"\""),
        ("A6", "#N/A"),
        ("B1", "1"),
    ];

    #[test]
    fn test_counting() {
        assert_eq!(eval_with(&DATA, "=COUNT(A1:A6)"), Value::Number(2.0));
        assert_eq!(eval_with(&DATA, "=COUNT(A1:A4,\"5\",\"x\",#DIV/0!)"), Value::Number(3.0));
        assert_eq!(eval_with(&DATA, "=COUNTA(A1:A7)"), Value::Number(6.0));
        assert_eq!(eval_with(&DATA, "=COUNTBLANK(A1:A8)"), Value::Number(3.0));
        assert_eq!(eval_with(&DATA, "=COUNTBLANK(B1:B1048576)"), Value::Number(1048575.0));
    }

    #[test]
    fn test_conditional_counts() {
        assert_eq!(eval_with(&DATA, "=COUNTIF(A1:A6,\">2\")"), Value::Number(2.0));
        assert_eq!(eval_with(&DATA, "=COUNTIF(A1:A6,\"t*\")"), Value::Number(1.0));
        assert_eq!(eval_with(&DATA, "=COUNTIF(A:A,\"<>\")"), Value::Number(6.0));
        assert_eq!(eval_with(&DATA, "=COUNTIFS(A1:A2,\">0\",B1:B2,1)"), Value::Number(1.0));
        assert_eq!(
            eval_with(&DATA, "=COUNTIFS(A1:A2,\">0\",B1:B3,1)"),
            Value::Error(ErrorCode::Value)
        );
    }

    #[test]
    fn test_averages() {
        assert_eq!(eval_with(&DATA, "=AVERAGE(A1:A4)"), Value::Number(6.0));
        assert_eq!(eval_with(&DATA, "=AVERAGE(A2)"), Value::Error(ErrorCode::Div0));
        assert_eq!(eval_with(&DATA, "=AVERAGE(A1:A6)"), Value::Error(ErrorCode::Na));
        assert_eq!(eval_with(&DATA, "=AVERAGEIF(A1:A4,\">5\")"), Value::Number(9.0));
        assert_eq!(eval_with(&DATA, "=AVERAGEIF(A1:A4,\"none\")"), Value::Error(ErrorCode::Div0));
        let cells = [("A1", "x"), ("A2", "y"), ("A3", "x"), ("B1", "2"), ("B2", "5"), ("B3", "4")];
        assert_eq!(eval_with(&cells, "=AVERAGEIF(A1:A3,\"x\",B1)"), Value::Number(3.0));
        assert_eq!(
            eval_with(&cells, "=AVERAGEIFS(B1:B3,A1:A3,\"x\",B1:B3,\">2\")"),
            Value::Number(4.0)
        );
    }

    #[test]
    fn test_order_statistics() {
        assert_eq!(eval("=MIN(4,2,8)"), Value::Number(2.0));
        assert_eq!(eval("=MAX({4,2,8},\"9\")"), Value::Number(9.0));
        assert_eq!(eval_with(&DATA, "=MAX(A2:A3)"), Value::Number(0.0));
        assert_eq!(eval("=MEDIAN(5,1,3,2)"), Value::Number(2.5));
        assert_eq!(eval("=LARGE({5,1,3},1)"), Value::Number(5.0));
        assert_eq!(eval("=SMALL({5,1,3},2)"), Value::Number(3.0));
        assert_eq!(eval("=SMALL({5,1,3},4)"), Value::Error(ErrorCode::Num));
    }
}
