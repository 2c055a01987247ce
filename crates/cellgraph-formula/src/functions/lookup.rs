//! Lookup and reference functions
//!
//! Approximate matching scans the whole vector and settles on the last
//! value of the key's type that does not pass the key, which is what a
//! binary search finds on sorted data and stays predictable on unsorted
//! data. Exact text matching is case-insensitive and understands the `*`
//! and `?` wildcards.

use std::cmp::Ordering;

use cellgraph_core::ErrorCode;
use regex::Regex;

use crate::compare::compare;
use crate::value::{AreaValue, ArrayValue, EvalResult, RefValue, Value};

use super::criteria::{shape_of, wildcard_source};
use super::EvaluationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Exact,
    /// Largest value not above the key
    AtMost,
    /// Smallest value not below the key
    AtLeast,
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::Text(_), Value::Text(_))
            | (Value::Boolean(_), Value::Boolean(_))
    )
}

/// Position of `key` among `values`
fn position<'v>(
    key: &Value,
    values: impl Iterator<Item = &'v Value>,
    mode: MatchMode,
) -> Option<usize> {
    let pattern = match (key, mode) {
        (Value::Text(s), MatchMode::Exact) if s.contains(['*', '?', '~']) => {
            Regex::new(&format!("(?is)^{}$", wildcard_source(s))).ok()
        }
        _ => None,
    };
    let mut found = None;
    for (i, v) in values.enumerate() {
        if !same_kind(key, v) {
            continue;
        }
        if let (Some(pattern), Value::Text(s)) = (&pattern, v) {
            if pattern.is_match(s) {
                return Some(i);
            }
            continue;
        }
        let Ok(ord) = compare(v, key) else {
            continue;
        };
        match mode {
            MatchMode::Exact if ord == Ordering::Equal => return Some(i),
            MatchMode::AtMost if ord != Ordering::Greater => found = Some(i),
            MatchMode::AtLeast if ord != Ordering::Less => found = Some(i),
            _ => {}
        }
    }
    found
}

/// The lookup key: errors interrupt, a blank key finds nothing
fn lookup_key(arg: &Value, ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match ctx.scalar(arg)? {
        Value::Blank => Err(ErrorCode::Na.into()),
        key => Ok(key),
    }
}

/// Value at (row, col) of a range argument, counted from its top-left
/// corner. Positions outside the declared shape are `#REF!`.
fn element_at(
    target: &Value,
    row: usize,
    col: usize,
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<Value> {
    let (height, width) = shape_of(target);
    if row >= height || col >= width {
        return Err(ErrorCode::Ref.into());
    }
    match target {
        Value::Area(area) => {
            if area.sheets.is_3d() {
                return Err(ErrorCode::Value.into());
            }
            ctx.cell(area.sheets.first, area.first_row + row as u32, area.first_col + col as u16)
        }
        Value::Reference(r) => ctx.reference(r),
        Value::Array(array) => Ok(array.get(row, col).cloned().unwrap_or(Value::Blank)),
        Value::RefList(_) => Err(ErrorCode::Value.into()),
        plain => Ok(plain.clone()),
    }
}

fn range_lookup_mode(
    arg: Option<&Value>,
    ctx: &mut EvaluationContext<'_>,
) -> EvalResult<MatchMode> {
    let approximate = match arg {
        None => true,
        Some(v) => ctx.boolean(v)?,
    };
    Ok(if approximate { MatchMode::AtMost } else { MatchMode::Exact })
}

/// VLOOKUP(lookup_value, table_array, col_index_num, [range_lookup])
pub fn fn_vlookup(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let key = lookup_key(&args[0], ctx)?;
    let table = ctx.grid(&args[1])?;
    let index = ctx.number(&args[2])?.trunc();
    let mode = range_lookup_mode(args.get(3), ctx)?;
    if index < 1.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    if index as usize > shape_of(&args[1]).1 {
        return Ok(Value::Error(ErrorCode::Ref));
    }
    let first_column = (0..table.height()).filter_map(|r| table.get(r, 0));
    match position(&key, first_column, mode) {
        Some(row) => element_at(&args[1], row, index as usize - 1, ctx),
        None => Ok(Value::Error(ErrorCode::Na)),
    }
}

/// HLOOKUP(lookup_value, table_array, row_index_num, [range_lookup])
pub fn fn_hlookup(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let key = lookup_key(&args[0], ctx)?;
    let table = ctx.grid(&args[1])?;
    let index = ctx.number(&args[2])?.trunc();
    let mode = range_lookup_mode(args.get(3), ctx)?;
    if index < 1.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    if index as usize > shape_of(&args[1]).0 {
        return Ok(Value::Error(ErrorCode::Ref));
    }
    let first_row = (0..table.width()).filter_map(|c| table.get(0, c));
    match position(&key, first_row, mode) {
        Some(col) => element_at(&args[1], index as usize - 1, col, ctx),
        None => Ok(Value::Error(ErrorCode::Na)),
    }
}

/// MATCH(lookup_value, lookup_array, [match_type])
pub fn fn_match(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let key = lookup_key(&args[0], ctx)?;
    let (height, width) = shape_of(&args[1]);
    if height > 1 && width > 1 {
        return Ok(Value::Error(ErrorCode::Na));
    }
    let vector = ctx.grid(&args[1])?;
    let match_type = ctx.number_or(args.get(2), 1.0)?;
    let mode = match match_type.partial_cmp(&0.0) {
        Some(Ordering::Greater) => MatchMode::AtMost,
        Some(Ordering::Less) => MatchMode::AtLeast,
        _ => MatchMode::Exact,
    };
    match position(&key, vector.values().iter(), mode) {
        Some(i) => Ok(Value::Number((i + 1) as f64)),
        None => Ok(Value::Error(ErrorCode::Na)),
    }
}

/// LOOKUP(lookup_value, lookup_vector, [result_vector])
///
/// Without a result vector a two-dimensional range is searched along its
/// longer side and the answer comes from its last row or column.
pub fn fn_lookup(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let key = lookup_key(&args[0], ctx)?;
    let (height, width) = shape_of(&args[1]);
    let grid = ctx.grid(&args[1])?;
    let horizontal = width > height;
    let candidates: Vec<&Value> = if horizontal {
        (0..grid.width()).filter_map(|c| grid.get(0, c)).collect()
    } else {
        (0..grid.height()).filter_map(|r| grid.get(r, 0)).collect()
    };
    let Some(i) = position(&key, candidates.into_iter(), MatchMode::AtMost) else {
        return Ok(Value::Error(ErrorCode::Na));
    };
    match args.get(2) {
        Some(result) => {
            let (rh, _) = shape_of(result);
            if rh == 1 {
                element_at(result, 0, i, ctx)
            } else {
                element_at(result, i, 0, ctx)
            }
        }
        None if horizontal => element_at(&args[1], height - 1, i, ctx),
        None => element_at(&args[1], i, width - 1, ctx),
    }
}

/// INDEX(array, row_num, [column_num], [area_num])
///
/// A zero row or column selects the whole column or row. On references
/// the result is itself a reference, so `INDEX(...):B9` works.
pub fn fn_index(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let row_num = ctx.number_or(args.get(1), 0.0)?.trunc();
    let col_num = ctx.number_or(args.get(2), 0.0)?.trunc();
    let area_num = ctx.number_or(args.get(3), 1.0)?.trunc();
    if area_num < 1.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    let target = match &args[0] {
        Value::RefList(items) => match items.get(area_num as usize - 1) {
            Some(item) => item.clone(),
            None => return Ok(Value::Error(ErrorCode::Ref)),
        },
        _ if area_num > 1.0 => return Ok(Value::Error(ErrorCode::Ref)),
        other => other.clone(),
    };
    let (height, width) = shape_of(&target);
    let (mut row, mut col) = (row_num, col_num);
    if args.get(2).is_none() && height == 1 {
        col = row;
        row = if col == 0.0 { 0.0 } else { 1.0 };
    }
    if row < 0.0 || col < 0.0 {
        return Ok(Value::Error(ErrorCode::Value));
    }
    let (row, col) = (row as usize, col as usize);
    if row > height || col > width {
        return Ok(Value::Error(ErrorCode::Ref));
    }
    let rows = if row == 0 { 0..height } else { row - 1..row };
    let cols = if col == 0 { 0..width } else { col - 1..col };

    match &target {
        Value::Area(area) => Ok(reference_value(AreaValue {
            sheets: area.sheets,
            first_row: area.first_row + rows.start as u32,
            first_col: area.first_col + cols.start as u16,
            last_row: area.first_row + rows.end as u32 - 1,
            last_col: area.first_col + cols.end as u16 - 1,
        })),
        Value::Reference(r) => Ok(Value::Reference(*r)),
        Value::Array(array) => {
            let picked = ArrayValue::from_fn(rows.len(), cols.len(), |r, c| {
                array.get(rows.start + r, cols.start + c).cloned().unwrap_or(Value::Blank)
            });
            if picked.height() == 1 && picked.width() == 1 {
                Ok(picked.get(0, 0).cloned().unwrap_or(Value::Blank))
            } else {
                Ok(Value::Array(picked))
            }
        }
        Value::RefList(_) => Ok(Value::Error(ErrorCode::Value)),
        plain => Ok(plain.clone()),
    }
}

/// A single-cell area collapses to a plain reference
fn reference_value(area: AreaValue) -> Value {
    if area.height() == 1 && area.width() == 1 {
        Value::Reference(RefValue {
            sheets: area.sheets,
            row: area.first_row,
            col: area.first_col,
        })
    } else {
        Value::Area(area)
    }
}

/// OFFSET(reference, rows, cols, [height], [width])
pub fn fn_offset(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    let base = match &args[0] {
        Value::Reference(r) => AreaValue {
            sheets: r.sheets,
            first_row: r.row,
            first_col: r.col,
            last_row: r.row,
            last_col: r.col,
        },
        Value::Area(area) => *area,
        _ => return Ok(Value::Error(ErrorCode::Value)),
    };
    let rows = ctx.number(&args[1])?.trunc() as i64;
    let cols = ctx.number(&args[2])?.trunc() as i64;
    let height = ctx.number_or(args.get(3), f64::from(base.height()))?.trunc() as i64;
    let width = ctx.number_or(args.get(4), f64::from(base.width()))?.trunc() as i64;
    if height == 0 || width == 0 {
        return Ok(Value::Error(ErrorCode::Ref));
    }

    let span = |start: i64, len: i64| {
        if len > 0 {
            (start, start + len - 1)
        } else {
            (start + len + 1, start)
        }
    };
    let (first_row, last_row) = span(i64::from(base.first_row) + rows, height);
    let (first_col, last_col) = span(i64::from(base.first_col) + cols, width);

    let version = ctx.version();
    if first_row < 0
        || first_col < 0
        || last_row > i64::from(version.last_row_index())
        || last_col > i64::from(version.last_column_index())
    {
        return Ok(Value::Error(ErrorCode::Ref));
    }
    Ok(reference_value(AreaValue {
        sheets: base.sheets,
        first_row: first_row as u32,
        first_col: first_col as u16,
        last_row: last_row as u32,
        last_col: last_col as u16,
    }))
}

/// ROW([reference])
pub fn fn_row(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match args.first() {
        None | Some(Value::Blank) => Ok(Value::Number(f64::from(ctx.row) + 1.0)),
        Some(Value::Reference(r)) => Ok(Value::Number(f64::from(r.row) + 1.0)),
        Some(Value::Area(area)) if ctx.array_mode && area.height() > 1 => {
            Ok(Value::Array(ArrayValue::from_fn(area.height() as usize, 1, |r, _| {
                Value::Number(f64::from(area.first_row) + r as f64 + 1.0)
            })))
        }
        Some(Value::Area(area)) => Ok(Value::Number(f64::from(area.first_row) + 1.0)),
        Some(_) => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// COLUMN([reference])
pub fn fn_column(args: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match args.first() {
        None | Some(Value::Blank) => Ok(Value::Number(f64::from(ctx.col) + 1.0)),
        Some(Value::Reference(r)) => Ok(Value::Number(f64::from(r.col) + 1.0)),
        Some(Value::Area(area)) if ctx.array_mode && area.width() > 1 => {
            Ok(Value::Array(ArrayValue::from_fn(1, area.width() as usize, |_, c| {
                Value::Number(f64::from(area.first_col) + c as f64 + 1.0)
            })))
        }
        Some(Value::Area(area)) => Ok(Value::Number(f64::from(area.first_col) + 1.0)),
        Some(_) => Ok(Value::Error(ErrorCode::Value)),
    }
}

/// ROWS(array)
pub fn fn_rows(args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match &args[0] {
        Value::RefList(_) => Ok(Value::Error(ErrorCode::Ref)),
        other => Ok(Value::Number(shape_of(other).0 as f64)),
    }
}

/// COLUMNS(array)
pub fn fn_columns(args: &[Value], _ctx: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match &args[0] {
        Value::RefList(_) => Ok(Value::Error(ErrorCode::Ref)),
        other => Ok(Value::Number(shape_of(other).1 as f64)),
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::value::Value;
    use cellgraph_core::ErrorCode;
    use pretty_assertions::assert_eq;

    const PRICES: [(&str, &str); 8] = [
        ("A1", "apple"),
        ("B1", "1.5"),
        ("A2", "banana"),
        ("B2", "0.25"),
        ("A3", "cherry"),
        ("B3", "4"),
        ("D1", "10"),
        ("D2", "20"),
    ];

    #[test]
    fn test_vlookup_exact() {
        assert_eq!(eval_with(&PRICES, "=VLOOKUP(\"BANANA\",A1:B3,2,FALSE)"), Value::Number(0.25));
        assert_eq!(eval_with(&PRICES, "=VLOOKUP(\"ch*\",A1:B3,2,FALSE)"), Value::Number(4.0));
        let lookup = |formula: &str| eval_with(&PRICES, formula);
        assert_eq!(lookup("=VLOOKUP(\"kiwi\",A1:B3,2,FALSE)"), Value::Error(ErrorCode::Na));
        assert_eq!(lookup("=VLOOKUP(\"apple\",A1:B3,3,FALSE)"), Value::Error(ErrorCode::Ref));
        assert_eq!(lookup("=VLOOKUP(\"apple\",A1:B3,0,FALSE)"), Value::Error(ErrorCode::Value));
    }

    #[test]
    fn test_approximate_takes_last_not_above() {
        let cells = [
            ("A1", "0"),
            ("B1", "F"),
            ("A2", "60"),
            ("B2", "D"),
            ("A3", "80"),
            ("B3", "B"),
        ];
        assert_eq!(eval_with(&cells, "=VLOOKUP(75,A1:B3,2)"), Value::text("D"));
        assert_eq!(eval_with(&cells, "=VLOOKUP(80,A1:B3,2,TRUE)"), Value::text("B"));
        assert_eq!(eval_with(&cells, "=VLOOKUP(-1,A1:B3,2)"), Value::Error(ErrorCode::Na));
        assert_eq!(eval_with(&cells, "=LOOKUP(99,A1:A3,B1:B3)"), Value::text("B"));
        assert_eq!(eval_with(&cells, "=LOOKUP(61,A1:B3)"), Value::text("D"));
    }

    #[test]
    fn test_hlookup() {
        let cells = [("A1", "x"), ("B1", "y"), ("A2", "1"), ("B2", "2")];
        assert_eq!(eval_with(&cells, "=HLOOKUP(\"y\",A1:B2,2,FALSE)"), Value::Number(2.0));
    }

    #[test]
    fn test_match() {
        assert_eq!(eval_with(&PRICES, "=MATCH(\"cherry\",A1:A3,0)"), Value::Number(3.0));
        assert_eq!(eval_with(&PRICES, "=MATCH(15,D1:D2)"), Value::Number(1.0));
        assert_eq!(eval_with(&PRICES, "=MATCH(5,D1:D2)"), Value::Error(ErrorCode::Na));
        assert_eq!(eval("=MATCH(3,{5,4,3,2},-1)"), Value::Number(3.0));
        assert_eq!(eval_with(&PRICES, "=MATCH(1,A1:B3,0)"), Value::Error(ErrorCode::Na));
    }

    #[test]
    fn test_index() {
        assert_eq!(eval_with(&PRICES, "=INDEX(A1:B3,2,2)"), Value::Number(0.25));
        assert_eq!(eval_with(&PRICES, "=INDEX(B1:B3,3)"), Value::Number(4.0));
        assert_eq!(eval_with(&PRICES, "=SUM(INDEX(A1:B3,0,2))"), Value::Number(5.75));
        assert_eq!(eval_with(&PRICES, "=INDEX(A1:B3,4,1)"), Value::Error(ErrorCode::Ref));
        assert_eq!(eval_with(&PRICES, "=SUM(B1:INDEX(B1:B3,2))"), Value::Number(1.75));
        assert_eq!(eval("=INDEX({1,2;3,4},2,1)"), Value::Number(3.0));
        assert_eq!(eval_with(&PRICES, "=INDEX((A1:A3,B1:B3),1,1,2)"), Value::Number(1.5));
    }

    #[test]
    fn test_offset() {
        assert_eq!(eval_with(&PRICES, "=OFFSET(A1,1,1)"), Value::Number(0.25));
        assert_eq!(eval_with(&PRICES, "=SUM(OFFSET(A1,0,1,3,1))"), Value::Number(5.75));
        assert_eq!(eval_with(&PRICES, "=OFFSET(A1,-1,0)"), Value::Error(ErrorCode::Ref));
        assert_eq!(eval_with(&PRICES, "=OFFSET(A1,0,0,0,1)"), Value::Error(ErrorCode::Ref));
    }

    #[test]
    fn test_row_and_column() {
        assert_eq!(eval("=ROW()"), Value::Number(100.0));
        assert_eq!(eval("=COLUMN()"), Value::Number(26.0));
        assert_eq!(eval("=ROW(C7)+COLUMN(C7)"), Value::Number(10.0));
        assert_eq!(eval("=ROWS(A1:C7)*COLUMNS(A1:C7)"), Value::Number(21.0));
        assert_eq!(eval("=ROWS({1;2;3})"), Value::Number(3.0));
    }
}
