//! Criteria matching for SUMIF, COUNTIF, AVERAGEIF and related functions
//!
//! A criterion can be:
//! - a number or boolean: equal values match
//! - a comparison expression: ">5", ">=10", "<100", "<=50", "<>0", "=5",
//!   also against text (">m") or booleans ("<>TRUE")
//! - text with wildcards: "*" matches any run, "?" one character, "~"
//!   escapes either
//! - "" matches blank cells and empty text, "=" only blank cells, "<>" any
//!   non-blank cell

use std::cmp::Ordering;

use cellgraph_core::ErrorCode;
use regex::Regex;

use crate::compare::{compare_numbers, compare_text};
use crate::operand::parse_number;
use crate::value::{AreaValue, EvalResult, Value};

use super::EvaluationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
}

impl ComparisonOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            ComparisonOp::Equal => ord == Ordering::Equal,
            ComparisonOp::NotEqual => ord != Ordering::Equal,
            ComparisonOp::LessThan => ord == Ordering::Less,
            ComparisonOp::LessEqual => ord != Ordering::Greater,
            ComparisonOp::GreaterThan => ord == Ordering::Greater,
            ComparisonOp::GreaterEqual => ord != Ordering::Less,
        }
    }
}

#[derive(Debug)]
enum Criterion {
    Number(ComparisonOp, f64),
    Boolean(ComparisonOp, bool),
    Error(ComparisonOp, ErrorCode),
    /// Case-insensitive pattern for `=` / `<>`
    Pattern { negate: bool, pattern: Regex },
    /// Ordering against text for `<`, `>` and friends
    Text(ComparisonOp, String),
    /// "" (blank or empty text), "=" (blank only) or "<>" (anything else)
    Empty { op: Option<ComparisonOp> },
    /// A blank criteria cell matches nothing
    Nothing,
}

/// Compiled criterion
#[derive(Debug)]
pub struct CriteriaMatcher {
    criterion: Criterion,
}

impl CriteriaMatcher {
    /// Compile a criterion from a plain (dereferenced) value
    pub fn new(criteria: &Value) -> Self {
        let criterion = match criteria {
            Value::Number(n) => Criterion::Number(ComparisonOp::Equal, *n),
            Value::Boolean(b) => Criterion::Boolean(ComparisonOp::Equal, *b),
            Value::Error(e) => Criterion::Error(ComparisonOp::Equal, *e),
            Value::Text(s) => Self::parse_text(s),
            _ => Criterion::Nothing,
        };
        Self { criterion }
    }

    fn parse_text(s: &str) -> Criterion {
        let (op, rest) = split_operator(s);
        if rest.is_empty() {
            return Criterion::Empty { op };
        }
        let op_or_eq = op.unwrap_or(ComparisonOp::Equal);
        if let Some(n) = parse_number(rest) {
            return Criterion::Number(op_or_eq, n);
        }
        if rest.eq_ignore_ascii_case("TRUE") || rest.eq_ignore_ascii_case("FALSE") {
            return Criterion::Boolean(op_or_eq, rest.eq_ignore_ascii_case("TRUE"));
        }
        if let Some(e) = ErrorCode::from_str(rest) {
            return Criterion::Error(op_or_eq, e);
        }
        match op_or_eq {
            ComparisonOp::Equal | ComparisonOp::NotEqual => match wildcard_regex(rest) {
                Some(pattern) => Criterion::Pattern {
                    negate: op_or_eq == ComparisonOp::NotEqual,
                    pattern,
                },
                None => Criterion::Text(op_or_eq, rest.to_string()),
            },
            other => Criterion::Text(other, rest.to_string()),
        }
    }

    /// Check if a value matches the criterion
    pub fn matches(&self, value: &Value) -> bool {
        match &self.criterion {
            Criterion::Number(op, n) => match value {
                Value::Number(v) => op.holds(compare_numbers(*v, *n)),
                _ => *op == ComparisonOp::NotEqual,
            },
            Criterion::Boolean(op, b) => match value {
                Value::Boolean(v) => op.holds(v.cmp(b)),
                _ => *op == ComparisonOp::NotEqual,
            },
            Criterion::Error(op, e) => match value {
                Value::Error(v) => op.holds(if v == e { Ordering::Equal } else { Ordering::Less }),
                _ => *op == ComparisonOp::NotEqual,
            },
            Criterion::Pattern { negate, pattern } => {
                let hit = matches!(value, Value::Text(s) if pattern.is_match(s));
                hit != *negate
            }
            Criterion::Text(op, text) => match value {
                Value::Text(s) => op.holds(compare_text(s, text)),
                _ => *op == ComparisonOp::NotEqual,
            },
            Criterion::Empty { op } => {
                let blank = matches!(value, Value::Blank);
                let empty_text = matches!(value, Value::Text(s) if s.is_empty());
                match op {
                    None => blank || empty_text,
                    Some(ComparisonOp::Equal) => blank,
                    Some(ComparisonOp::NotEqual) => !blank,
                    Some(_) => false,
                }
            }
            Criterion::Nothing => false,
        }
    }
}

fn split_operator(s: &str) -> (Option<ComparisonOp>, &str) {
    for (prefix, op) in [
        (">=", ComparisonOp::GreaterEqual),
        ("<=", ComparisonOp::LessEqual),
        ("<>", ComparisonOp::NotEqual),
        (">", ComparisonOp::GreaterThan),
        ("<", ComparisonOp::LessThan),
        ("=", ComparisonOp::Equal),
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return (Some(op), rest);
        }
    }
    (None, s)
}

/// Whole-string, case-insensitive regex for a wildcard pattern
fn wildcard_regex(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?is)^{}$", wildcard_source(pattern))).ok()
}

/// Regex source for a wildcard pattern: `*` is any run, `?` any single
/// character and `~` escapes the next character.
pub(crate) fn wildcard_source(pattern: &str) -> String {
    let mut source = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '~' => match chars.next() {
                Some(escaped) => source.push_str(&regex::escape(&escaped.to_string())),
                None => source.push('~'),
            },
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source
}

/// Rows and columns covered by a range argument
pub(crate) fn shape_of(value: &Value) -> (usize, usize) {
    match value {
        Value::Area(area) => (area.height() as usize, area.width() as usize),
        Value::Array(array) => (array.height(), array.width()),
        _ => (1, 1),
    }
}

/// `target` stretched or shrunk to `shape`, keeping its top-left corner.
/// Areas and single-cell references can be reshaped; other values are
/// returned unchanged.
pub(crate) fn anchored(
    target: &Value,
    shape: (usize, usize),
    ctx: &EvaluationContext<'_>,
) -> Value {
    match target {
        Value::Area(area) if shape != shape_of(target) => {
            Value::Area(reshape(area, shape, ctx))
        }
        Value::Reference(r) => Value::Area(reshape(
            &AreaValue {
                sheets: r.sheets,
                first_row: r.row,
                first_col: r.col,
                last_row: r.row,
                last_col: r.col,
            },
            shape,
            ctx,
        )),
        other => other.clone(),
    }
}

fn reshape(
    area: &AreaValue,
    (rows, cols): (usize, usize),
    ctx: &EvaluationContext<'_>,
) -> AreaValue {
    let version = ctx.version();
    let last_row =
        (area.first_row as u64 + rows as u64 - 1).min(version.last_row_index() as u64);
    let last_col =
        (area.first_col as u64 + cols as u64 - 1).min(version.last_column_index() as u64);
    AreaValue {
        last_row: last_row as u32,
        last_col: last_col as u16,
        ..*area
    }
}

/// Cells picked by a list of (range, criteria) pairs
#[derive(Debug, Default)]
pub(crate) struct Selection {
    /// Matching (row, col) offsets inside the visited cells
    pub positions: Vec<(usize, usize)>,
    /// Matching offsets beyond the last used row or column; all blank
    pub blank_matches: usize,
}

/// Evaluate `pairs` = [range1, criteria1, range2, criteria2, ...]. Every
/// range must have the same shape.
pub(crate) fn select(pairs: &[Value], ctx: &mut EvaluationContext<'_>) -> EvalResult<Selection> {
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(ErrorCode::Value.into());
    }
    let shape = shape_of(&pairs[0]);
    let mut tests = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks(2) {
        if shape_of(&pair[0]) != shape {
            return Err(ErrorCode::Value.into());
        }
        let grid = ctx.grid(&pair[0])?;
        let matcher = CriteriaMatcher::new(&ctx.deref(&pair[1])?);
        tests.push((grid, matcher));
    }

    let window_rows = tests.iter().map(|(g, _)| g.height()).max().unwrap_or(0).min(shape.0);
    let window_cols = tests.iter().map(|(g, _)| g.width()).max().unwrap_or(0).min(shape.1);
    let mut selection = Selection::default();
    for r in 0..window_rows {
        for c in 0..window_cols {
            let hit = tests
                .iter()
                .all(|(grid, m)| m.matches(grid.get(r, c).unwrap_or(&Value::Blank)));
            if hit {
                selection.positions.push((r, c));
            }
        }
    }
    if tests.iter().all(|(_, m)| m.matches(&Value::Blank)) {
        selection.blank_matches = shape.0 * shape.1 - window_rows * window_cols;
    }
    Ok(selection)
}
