//! Text functions
//!
//! Positions and lengths count characters, not bytes.

use cellgraph_core::ErrorCode;
use regex::Regex;

use crate::operand::{parse_number, to_text};
use crate::value::{EvalResult, Value};

use super::criteria::wildcard_source;
use super::EvaluationContext;

fn take_left(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn take_right(s: &str, n: usize) -> String {
    let len = s.chars().count();
    if n >= len {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

fn take_mid(s: &str, start_1based: usize, n: usize) -> String {
    s.chars().skip(start_1based - 1).take(n).collect()
}

/// Optional character count; defaults to 1 and must not be negative
fn char_count(arg: Option<&Value>, ctx: &mut EvaluationContext<'_>) -> EvalResult<usize> {
    let n = ctx.number_or(arg, 1.0)?.trunc();
    if n < 0.0 {
        return Err(ErrorCode::Value.into());
    }
    Ok(n as usize)
}

/// CONCATENATE(text1, ...)
pub fn fn_concatenate(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let mut out = String::new();
    for arg in args {
        out.push_str(&ctx.text(arg)?);
    }
    Ok(Value::Text(out))
}

/// LEN(text)
pub fn fn_len(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Number(ctx.text(&args[0])?.chars().count() as f64))
}

/// LEFT(text, [num_chars])
pub fn fn_left(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    let n = char_count(args.get(1), ctx)?;
    Ok(Value::Text(take_left(&s, n)))
}

/// RIGHT(text, [num_chars])
pub fn fn_right(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    let n = char_count(args.get(1), ctx)?;
    Ok(Value::Text(take_right(&s, n)))
}

/// MID(text, start_num, num_chars)
pub fn fn_mid(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    let start = ctx.number(&args[1])?.trunc();
    let count = ctx.number(&args[2])?.trunc();
    if start < 1.0 || count < 0.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    Ok(Value::Text(take_mid(&s, start as usize, count as usize)))
}

/// UPPER(text)
pub fn fn_upper(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Text(ctx.text(&args[0])?.to_uppercase()))
}

/// LOWER(text)
pub fn fn_lower(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    Ok(Value::Text(ctx.text(&args[0])?.to_lowercase()))
}

/// PROPER(text) - capitalize the first letter of every word
pub fn fn_proper(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    let mut out = String::with_capacity(s.len());
    let mut after_letter = false;
    for c in s.chars() {
        if after_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        after_letter = c.is_alphabetic();
    }
    Ok(Value::Text(out))
}

/// TRIM(text) - strip outer spaces and collapse inner runs to one
pub fn fn_trim(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    Ok(Value::Text(s.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")))
}

/// CLEAN(text) - drop non-printable characters
pub fn fn_clean(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    Ok(Value::Text(s.chars().filter(|c| (*c as u32) >= 32).collect()))
}

/// REPT(text, number_times)
pub fn fn_rept(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let s = ctx.text(&args[0])?;
    let times = ctx.number(&args[1])?.trunc();
    if times < 0.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    if s.chars().count() as f64 * times > 32767.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    Ok(Value::Text(s.repeat(times as usize)))
}

/// EXACT(text1, text2) - case-sensitive equality
pub fn fn_exact(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let a = ctx.text(&args[0])?;
    let b = ctx.text(&args[1])?;
    Ok(Value::Boolean(a == b))
}

/// Start position (1-based, in characters) and the haystack it applies to
fn search_window(
    args: &[Value],
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<(String, String, usize)> {
    let needle = ctx.text(&args[0])?;
    let haystack = ctx.text(&args[1])?;
    let start = ctx.number_or(args.get(2), 1.0)?.trunc();
    if start < 1.0 || start as usize > haystack.chars().count() + 1 {
        return Err(ErrorCode::Value.into());
    }
    Ok((needle, haystack, start as usize))
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

/// FIND(find_text, within_text, [start_num]) - case-sensitive, no wildcards
pub fn fn_find(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let (needle, haystack, start) = search_window(args, ctx)?;
    let from = byte_offset(&haystack, start - 1);
    match haystack[from..].find(&needle) {
        Some(pos) => Ok(Value::Number((haystack[..from + pos].chars().count() + 1) as f64)),
        None => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// SEARCH(find_text, within_text, [start_num]) - case-insensitive, with
/// `*` and `?` wildcards
pub fn fn_search(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let (needle, haystack, start) = search_window(args, ctx)?;
    let from = byte_offset(&haystack, start - 1);
    let Ok(pattern) = Regex::new(&format!("(?is){}", wildcard_source(&needle))) else {
        return Ok(Value::Error(ErrorCode::Value));
    };
    match pattern.find(&haystack[from..]) {
        Some(m) => Ok(Value::Number(
            (haystack[..from + m.start()].chars().count() + 1) as f64,
        )),
        None => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// SUBSTITUTE(text, old_text, new_text, [instance_num])
pub fn fn_substitute(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let text = ctx.text(&args[0])?;
    let old = ctx.text(&args[1])?;
    let new = ctx.text(&args[2])?;
    if old.is_empty() {
        return Ok(Value::Text(text));
    }
    let Some(instance) = args.get(3) else {
        return Ok(Value::Text(text.replace(&old, &new)));
    };
    let instance = ctx.number(instance)?.trunc();
    if instance < 1.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    match text.match_indices(&old).nth(instance as usize - 1) {
        Some((pos, _)) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..pos]);
            out.push_str(&new);
            out.push_str(&text[pos + old.len()..]);
            Ok(Value::Text(out))
        }
        None => Ok(Value::Text(text)),
    }
}

/// VALUE(text)
pub fn fn_value(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.scalar(&args[0])? {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::Blank => Ok(Value::Number(0.0)),
        Value::Text(s) => {
            Ok(parse_number(&s).map_or(Value::Error(ErrorCode::Value), Value::Number))
        }
        _ => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// CHAR(number) - character for a code 1..=255
pub fn fn_char(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let code = ctx.number(&args[0])?.trunc();
    if !(1.0..=255.0).contains(&code) {
        return Ok(Value::Error(ErrorCode::Value));
    }
    Ok(char::from_u32(code as u32)
        .map_or(Value::Error(ErrorCode::Value), |c| Value::Text(c.to_string())))
}

/// CODE(text) - code of the first character
pub fn fn_code(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.text(&args[0])?.chars().next() {
        Some(c) => Ok(Value::Number(f64::from(c as u32))),
        None => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// TEXTJOIN(delimiter, ignore_empty, text1, ...)
pub fn fn_textjoin(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let delimiter = ctx.text(&args[0])?;
    let ignore_empty = ctx.boolean(&args[1])?;
    let mut parts = Vec::new();
    for arg in &args[2..] {
        for v in ctx.referenced_values(arg)? {
            let s = to_text(&v)?;
            if !(ignore_empty && s.is_empty()) {
                parts.push(s);
            }
        }
    }
    Ok(Value::Text(parts.join(&delimiter)))
}
