//! Coercion of scalar operands and implicit intersection

use cellgraph_core::ErrorCode;

use crate::value::{AreaValue, EvalResult, RefValue, Value};

/// Coerce a scalar to a number.
///
/// Blank is 0, booleans are 1/0, and text must parse as a number. Anything
/// else is `#VALUE!`. Error values interrupt with themselves.
pub fn to_number(value: &Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Blank => Ok(0.0),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => parse_number(s).ok_or_else(|| ErrorCode::Value.into()),
        Value::Error(e) => Err((*e).into()),
        _ => Err(ErrorCode::Value.into()),
    }
}

/// Coerce a scalar to text
pub fn to_text(value: &Value) -> EvalResult<String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Number(n) => Ok(number_to_text(*n)),
        Value::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Blank => Ok(String::new()),
        Value::Error(e) => Err((*e).into()),
        _ => Err(ErrorCode::Value.into()),
    }
}

/// Coerce a scalar to a boolean. Text must read TRUE or FALSE.
pub fn to_bool(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Blank => Ok(false),
        Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        Value::Error(e) => Err((*e).into()),
        _ => Err(ErrorCode::Value.into()),
    }
}

/// Read text as a number: optional sign, digits, optional fraction and
/// exponent, optional trailing `%`. Surrounding spaces are ignored.
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (body, scale) = match trimmed.strip_suffix('%') {
        Some(rest) => (rest.trim_end(), 0.01),
        None => (trimmed, 1.0),
    };
    let mut digits = 0;
    for (i, c) in body.char_indices() {
        match c {
            '0'..='9' => digits += 1,
            '.' => {}
            '+' | '-' if i == 0 => {}
            'e' | 'E' if digits > 0 => {}
            '+' | '-' if matches!(body[..i].chars().last(), Some('e' | 'E')) => {}
            _ => return None,
        }
    }
    if digits == 0 {
        return None;
    }
    body.parse::<f64>().ok().map(|n| n * scale)
}

/// Render a number the way a cell shows it in General format: at most 15
/// significant digits, integers without a decimal point, and scientific
/// notation for very large or very small magnitudes.
pub fn number_to_text(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return ErrorCode::Num.as_str().to_string();
    }
    let sci = format!("{:.14e}", n);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if !(-9..21).contains(&exponent) {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{}E{}{}", mantissa, sign, exponent.abs());
    }
    let decimals = (14 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, n)).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Pick the single cell of `area` that lines up with the calling cell.
///
/// A one-column area takes the caller's row, a one-row area takes the
/// caller's column, and a larger area needs to contain the caller. Anything
/// else is `#VALUE!`, as is an area spanning several sheets.
pub fn implicit_intersection(area: &AreaValue, row: u32, col: u16) -> EvalResult<RefValue> {
    if area.sheets.is_3d() {
        return Err(ErrorCode::Value.into());
    }
    let single_col = area.first_col == area.last_col;
    let single_row = area.first_row == area.last_row;
    let (r, c) = match (single_row, single_col) {
        (true, true) => (area.first_row, area.first_col),
        (false, true) if (area.first_row..=area.last_row).contains(&row) => (row, area.first_col),
        (true, false) if (area.first_col..=area.last_col).contains(&col) => (area.first_row, col),
        (false, false) if area.contains(row, col) => (row, col),
        _ => return Err(ErrorCode::Value.into()),
    };
    Ok(RefValue {
        sheets: area.sheets,
        row: r,
        col: c,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Interrupt, SheetRange};
    use cellgraph_core::CellRange;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&Value::Blank), Ok(0.0));
        assert_eq!(to_number(&Value::Boolean(true)), Ok(1.0));
        assert_eq!(to_number(&Value::text(" 12.5 ")), Ok(12.5));
        assert_eq!(to_number(&Value::text("50%")), Ok(0.5));
        assert_eq!(to_number(&Value::text("abc")), Err(Interrupt::Error(ErrorCode::Value)));
        assert_eq!(
            to_number(&Value::Error(ErrorCode::Na)),
            Err(Interrupt::Error(ErrorCode::Na))
        );
    }

    #[test]
    fn test_parse_number_rejects_words() {
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("-2.5E-1"), Some(-0.25));
        assert_eq!(parse_number("1-2"), None);
    }

    #[test]
    fn test_to_bool() {
        assert_eq!(to_bool(&Value::text("true")), Ok(true));
        assert_eq!(to_bool(&Value::Number(0.0)), Ok(false));
        assert!(to_bool(&Value::text("yes")).is_err());
    }

    #[test]
    fn test_number_to_text() {
        assert_eq!(number_to_text(10.0), "10");
        assert_eq!(number_to_text(-3.25), "-3.25");
        assert_eq!(number_to_text(0.1 + 0.2), "0.3");
        assert_eq!(number_to_text(1.0 / 3.0), "0.333333333333333");
        assert_eq!(number_to_text(1e21), "1E+21");
        assert_eq!(number_to_text(1.5e-10), "1.5E-10");
        assert_eq!(number_to_text(0.000000001), "0.000000001");
        assert_eq!(number_to_text(123456789012345.0), "123456789012345");
    }

    #[test]
    fn test_implicit_intersection() {
        let column =
            AreaValue::from_range(SheetRange::single(0), &CellRange::parse("B1:B10").unwrap());
        assert_eq!(implicit_intersection(&column, 4, 7).map(|r| (r.row, r.col)), Ok((4, 1)));
        assert!(implicit_intersection(&column, 20, 7).is_err());

        let row = AreaValue::from_range(SheetRange::single(0), &CellRange::parse("A3:F3").unwrap());
        assert_eq!(implicit_intersection(&row, 0, 2).map(|r| (r.row, r.col)), Ok((2, 2)));

        let block =
            AreaValue::from_range(SheetRange::single(0), &CellRange::parse("A1:C3").unwrap());
        assert_eq!(implicit_intersection(&block, 1, 1).map(|r| (r.row, r.col)), Ok((1, 1)));
        assert!(implicit_intersection(&block, 5, 1).is_err());
    }
}
