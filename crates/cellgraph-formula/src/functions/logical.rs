//! Logical functions
//!
//! `IF` and `CHOOSE` are evaluated lazily: the evaluator only computes the
//! branch that the first argument selects and passes `Blank` for the rest.
//! An array condition (in an array formula) evaluates every branch and
//! picks element by element.

use cellgraph_core::ErrorCode;

use crate::operand::to_bool;
use crate::value::{ArrayValue, EvalResult, Interrupt, Value};

use super::EvaluationContext;

/// Booleans for AND/OR/XOR. References contribute their booleans and
/// numbers; text inside references is skipped. Direct text must read as
/// TRUE/FALSE.
fn collect_booleans(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Vec<bool>> {
    let mut values = Vec::new();
    for arg in args {
        match arg {
            Value::Reference(_) | Value::Area(_) | Value::RefList(_) | Value::Array(_) => {
                for v in ctx.referenced_values(arg)? {
                    match v {
                        Value::Boolean(b) => values.push(b),
                        Value::Number(n) => values.push(n != 0.0),
                        Value::Error(e) => return Err(e.into()),
                        _ => {}
                    }
                }
            }
            Value::Blank => {}
            scalar => values.push(to_bool(scalar)?),
        }
    }
    if values.is_empty() {
        return Err(ErrorCode::Value.into());
    }
    Ok(values)
}

/// IF(condition, [value_if_true], [value_if_false])
pub fn fn_if(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    if let Some(condition) = array_condition(&args[0], ctx)? {
        return Ok(Value::Array(ArrayValue::from_fn(
            condition.height(),
            condition.width(),
            |r, c| {
                let pick = match condition.get(r, c) {
                    Some(Value::Error(e)) => return Value::Error(*e),
                    Some(v) => to_bool(v),
                    None => Err(ErrorCode::Na.into()),
                };
                match pick {
                    Ok(true) => element(args.get(1), r, c, Value::Boolean(true)),
                    Ok(false) => element(args.get(2), r, c, Value::Boolean(false)),
                    Err(Interrupt::Error(e)) => Value::Error(e),
                    Err(Interrupt::Fault(_)) => Value::Error(ErrorCode::Value),
                }
            },
        )));
    }

    if ctx.boolean(&args[0])? {
        Ok(args.get(1).cloned().unwrap_or(Value::Boolean(true)))
    } else {
        Ok(args.get(2).cloned().unwrap_or(Value::Boolean(false)))
    }
}

fn array_condition(
    condition: &Value,
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<Option<ArrayValue>> {
    match condition {
        Value::Array(a) => Ok(Some(a.clone())),
        Value::Area(_) if ctx.array_mode => Ok(Some(ctx.grid(condition)?)),
        _ => Ok(None),
    }
}

/// Element (r, c) of a branch: arrays are indexed, one-row or one-column
/// arrays are replicated, scalars are repeated.
fn element(branch: Option<&Value>, r: usize, c: usize, missing: Value) -> Value {
    match branch {
        None => missing,
        Some(Value::Array(a)) => {
            let r = if a.height() == 1 { 0 } else { r };
            let c = if a.width() == 1 { 0 } else { c };
            a.get(r, c).cloned().unwrap_or(Value::Error(ErrorCode::Na))
        }
        Some(v) => v.clone(),
    }
}

/// AND(logical1, ...)
pub fn fn_and(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let values = collect_booleans(args, ctx)?;
    Ok(Value::Boolean(values.iter().all(|b| *b)))
}

/// OR(logical1, ...)
pub fn fn_or(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let values = collect_booleans(args, ctx)?;
    Ok(Value::Boolean(values.iter().any(|b| *b)))
}

/// XOR(logical1, ...) - TRUE when an odd number of arguments are TRUE
pub fn fn_xor(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let values = collect_booleans(args, ctx)?;
    Ok(Value::Boolean(values.iter().filter(|b| **b).count() % 2 == 1))
}

/// NOT(logical)
pub fn fn_not(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(!ctx.boolean(&args[0])?))
}

pub fn fn_true(_args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(true))
}

pub fn fn_false(_args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(false))
}

/// IFERROR(value, value_if_error)
pub fn fn_iferror(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.deref(&args[0]) {
        Ok(Value::Error(_)) | Err(Interrupt::Error(_)) => ctx.deref(&args[1]),
        other => other,
    }
}

/// IFNA(value, value_if_na)
pub fn fn_ifna(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.deref(&args[0]) {
        Ok(Value::Error(ErrorCode::Na)) | Err(Interrupt::Error(ErrorCode::Na)) => {
            ctx.deref(&args[1])
        }
        Ok(v) => Ok(v),
        Err(other) => Err(other),
    }
}

/// CHOOSE(index, value1, [value2], ...)
pub fn fn_choose(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let index = ctx.number(&args[0])?.trunc();
    if index < 1.0 || index as usize >= args.len() {
        return Ok(Value::Error(ErrorCode::Value));
    }
    Ok(args[index as usize].clone())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::value::Value;
    use cellgraph_core::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_if() {
        assert_eq!(eval("=IF(1>0,\"yes\",\"no\")"), Value::text("yes"));
        assert_eq!(eval("=IF(FALSE,1)"), Value::Boolean(false));
        assert_eq!(eval("=IF(TRUE,,2)"), Value::Number(0.0));
        assert_eq!(eval("=IF(\"maybe\",1,2)"), Value::Error(ErrorCode::Value));
        assert_eq!(eval("=IF(#N/A,1,2)"), Value::Error(ErrorCode::Na));
    }

    #[test]
    fn test_if_skips_unselected_branch() {
        assert_eq!(eval("=IF(TRUE,1,1/0)"), Value::Number(1.0));
        let cells = [("A1", "=A1+1")];
        assert_eq!(eval_with(&cells, "=IF(FALSE,A1,5)"), Value::Number(5.0));
    }

    #[test]
    fn test_if_array_condition() {
        assert_eq!(eval("=SUM(IF({1,0,1},{10,20,30},{1,2,3}))"), Value::Number(42.0));
    }

    #[test]
    fn test_and_or_not() {
        let cells = [("A1", "TRUE"), ("A2", "text"), ("A3", "0")];
        assert_eq!(eval_with(&cells, "=AND(A1:A2)"), Value::Boolean(true));
        assert_eq!(eval_with(&cells, "=AND(A1:A3)"), Value::Boolean(false));
        assert_eq!(eval_with(&cells, "=OR(A3,FALSE)"), Value::Boolean(false));
        assert_eq!(eval_with(&cells, "=AND(A2)"), Value::Error(ErrorCode::Value));
        assert_eq!(eval("=XOR(TRUE,TRUE,TRUE)"), Value::Boolean(true));
        assert_eq!(eval("=NOT(0)"), Value::Boolean(true));
        assert_eq!(eval("=AND(TRUE,#DIV/0!,#N/A)"), Value::Error(ErrorCode::Div0));
    }

    #[test]
    fn test_error_catchers() {
        assert_eq!(eval("=IFERROR(1/0,\"caught\")"), Value::text("caught"));
        assert_eq!(eval("=IFERROR(4,\"caught\")"), Value::Number(4.0));
        assert_eq!(eval("=IFNA(#N/A,0)"), Value::Number(0.0));
        assert_eq!(eval("=IFNA(#REF!,0)"), Value::Error(ErrorCode::Ref));
        let cells = [("A1", "#N/A"), ("A2", "3")];
        assert_eq!(eval_with(&cells, "=IFERROR(A1,A2)"), Value::Number(3.0));
        assert_eq!(eval_with(&cells, "=IFERROR(A2,0)"), Value::Number(3.0));
    }

    #[test]
    fn test_choose() {
        assert_eq!(eval("=CHOOSE(2,\"a\",\"b\",\"c\")"), Value::text("b"));
        assert_eq!(eval("=CHOOSE(4,\"a\",\"b\",\"c\")"), Value::Error(ErrorCode::Value));
        assert_eq!(eval("=CHOOSE(1,7,1/0)"), Value::Number(7.0));
    }
}
