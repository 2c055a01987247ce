//! Information functions

use cellgraph_core::ErrorCode;

use crate::value::{EvalResult, Interrupt, Value};

use super::EvaluationContext;

/// The argument reduced to one value, with an interrupting error turned
/// back into a value so the IS* functions can inspect it
fn inspect(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.deref(&args[0]) {
        Err(Interrupt::Error(e)) => Ok(Value::Error(e)),
        other => other,
    }
}

/// ISBLANK(value)
pub fn fn_isblank(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Blank)))
}

/// ISERROR(value)
pub fn fn_iserror(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Error(_))))
}

/// ISERR(value) - any error except #N/A
pub fn fn_iserr(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let v = inspect(args, ctx)?;
    Ok(Value::Boolean(matches!(v, Value::Error(e) if e != ErrorCode::Na)))
}

/// ISNA(value)
pub fn fn_isna(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Error(ErrorCode::Na))))
}

/// ISNUMBER(value)
pub fn fn_isnumber(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Number(_))))
}

/// ISTEXT(value)
pub fn fn_istext(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Text(_))))
}

/// ISNONTEXT(value)
pub fn fn_isnontext(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(!matches!(inspect(args, ctx)?, Value::Text(_))))
}

/// ISLOGICAL(value)
pub fn fn_islogical(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(matches!(inspect(args, ctx)?, Value::Boolean(_))))
}

/// ISREF(value) - looks at the argument itself, not what it points to
pub fn fn_isref(args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Boolean(args[0].is_reference()))
}

/// NA()
pub fn fn_na(_args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Error(ErrorCode::Na))
}

/// ERROR.TYPE(error_val) - 1 for #NULL! through 7 for #N/A; #N/A for
/// anything that is not an error
pub fn fn_error_type(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match inspect(args, ctx)? {
        Value::Error(e) => Ok(e
            .type_number()
            .map_or(Value::Error(ErrorCode::Na), |n| Value::Number(f64::from(n)))),
        _ => Ok(Value::Error(ErrorCode::Na)),
    }
}

/// N(value) - numbers pass, TRUE is 1, everything else is 0
pub fn fn_n(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.scalar(&args[0])? {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::Boolean(b) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
        _ => Ok(Value::Number(0.0)),
    }
}

/// T(value) - text passes, everything else is ""
pub fn fn_t(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.scalar(&args[0])? {
        Value::Text(s) => Ok(Value::Text(s)),
        _ => Ok(Value::text("")),
    }
}
