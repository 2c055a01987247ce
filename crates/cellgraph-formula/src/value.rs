//! Operand values produced while evaluating formulas

use std::fmt;

use cellgraph_core::{CellRange, CellValue, ErrorCode};

use crate::error::FormulaError;
use crate::operand::number_to_text;

/// Inclusive range of sheet indices. Single-sheet references have
/// `first == last`; 3-D references (`Sheet1:Sheet3!A1`) span several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetRange {
    /// First sheet index
    pub first: usize,
    /// Last sheet index (inclusive)
    pub last: usize,
}

impl SheetRange {
    /// A range covering one sheet
    pub fn single(sheet: usize) -> Self {
        Self {
            first: sheet,
            last: sheet,
        }
    }

    /// Build a range, swapping the ends if needed
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            first: a.min(b),
            last: a.max(b),
        }
    }

    /// Whether more than one sheet is covered
    pub fn is_3d(&self) -> bool {
        self.first != self.last
    }

    /// Sheet indices in order
    pub fn iter(&self) -> std::ops::RangeInclusive<usize> {
        self.first..=self.last
    }
}

/// A resolved reference to one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefValue {
    /// Sheets the reference covers
    pub sheets: SheetRange,
    /// Zero-based row
    pub row: u32,
    /// Zero-based column
    pub col: u16,
}

/// A resolved rectangular area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaValue {
    /// Sheets the area covers
    pub sheets: SheetRange,
    /// First row (inclusive)
    pub first_row: u32,
    /// First column (inclusive)
    pub first_col: u16,
    /// Last row (inclusive)
    pub last_row: u32,
    /// Last column (inclusive)
    pub last_col: u16,
}

impl AreaValue {
    /// Area on `sheets` covering `range`
    pub fn from_range(sheets: SheetRange, range: &CellRange) -> Self {
        Self {
            sheets,
            first_row: range.start.row,
            first_col: range.start.col,
            last_row: range.end.row,
            last_col: range.end.col,
        }
    }

    /// The covered rows and columns as a core range
    pub fn range(&self) -> CellRange {
        CellRange::from_indices(self.first_row, self.first_col, self.last_row, self.last_col)
    }

    /// Number of rows
    pub fn height(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    /// Number of columns
    pub fn width(&self) -> u16 {
        self.last_col - self.first_col + 1
    }

    /// Whether the cell lies inside the area
    pub fn contains(&self, row: u32, col: u16) -> bool {
        self.range().contains(row, col)
    }
}

/// A two-dimensional block of plain values, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    rows: usize,
    cols: usize,
    values: Vec<Value>,
}

impl ArrayValue {
    /// Build from rows. Short rows are padded with `#N/A`.
    pub fn from_rows(rows: Vec<Vec<Value>>) -> Self {
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        let height = rows.len();
        let mut values = Vec::with_capacity(height * cols);
        for mut row in rows {
            row.resize(cols, Value::Error(ErrorCode::Na));
            values.extend(row);
        }
        Self {
            rows: height,
            cols,
            values,
        }
    }

    /// Build from a generator called for every (row, col)
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> Value) -> Self {
        let mut values = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                values.push(f(r, c));
            }
        }
        Self { rows, cols, values }
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.cols
    }

    /// Element at (row, col)
    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        if row < self.rows && col < self.cols {
            self.values.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// All elements, row-major
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Rows as slices
    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.values.chunks(self.cols.max(1)).take(self.rows)
    }
}

/// A formula operand or result.
///
/// `Reference`, `Area` and `RefList` only occur while evaluating; the public
/// evaluation boundary always dereferences them to a plain value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Number (dates are serial numbers)
    Number(f64),
    /// Text
    Text(String),
    /// TRUE / FALSE
    Boolean(bool),
    /// Error value
    Error(ErrorCode),
    /// Empty cell or missing argument
    #[default]
    Blank,
    /// Reference to a single cell
    Reference(RefValue),
    /// Reference to an area
    Area(AreaValue),
    /// Result of the union operator
    RefList(Vec<Value>),
    /// Constant array or array-formula result
    Array(ArrayValue),
}

impl Value {
    /// Text value from anything string-like
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Number value, turning NaN and infinities into `#NUM!`
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            Value::Number(n)
        } else {
            Value::Error(ErrorCode::Num)
        }
    }

    /// Whether this is an error value
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Whether this is a reference, area or reference list
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_) | Value::Area(_) | Value::RefList(_))
    }

    /// Name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Error(_) => "error",
            Value::Blank => "blank",
            Value::Reference(_) => "reference",
            Value::Area(_) => "area",
            Value::RefList(_) => "reference list",
            Value::Array(_) => "array",
        }
    }

    /// Value of a non-formula cell
    pub fn from_cell(cell: &CellValue) -> Self {
        match cell.effective_value() {
            CellValue::Empty => Value::Blank,
            CellValue::Boolean(b) => Value::Boolean(*b),
            CellValue::Number(n) => Value::Number(*n),
            CellValue::String(s) => Value::Text(s.as_str().to_string()),
            CellValue::Error(e) => Value::Error(*e),
            CellValue::Formula { .. } => Value::Blank,
        }
    }

    /// Convert a plain result to a storable cell value. References are not
    /// storable and become `#VALUE!`; arrays store their top-left element.
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            Value::Number(n) => CellValue::Number(*n),
            Value::Text(s) => CellValue::string(s.as_str()),
            Value::Boolean(b) => CellValue::Boolean(*b),
            Value::Error(e) => CellValue::Error(*e),
            Value::Blank => CellValue::Empty,
            Value::Array(a) => a.get(0, 0).map_or(CellValue::Empty, Value::to_cell_value),
            Value::Reference(_) | Value::Area(_) | Value::RefList(_) => {
                CellValue::Error(ErrorCode::Value)
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ErrorCode> for Value {
    fn from(e: ErrorCode) -> Self {
        Value::Error(e)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => f.write_str(&number_to_text(*n)),
            Value::Text(s) => f.write_str(s),
            Value::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Value::Error(e) => write!(f, "{}", e),
            Value::Blank => Ok(()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

/// Why evaluation of a sub-expression stopped early.
///
/// `Error` carries a spreadsheet error value upward so `?` can be used
/// inside operators and functions; the driver turns it back into
/// [`Value::Error`]. `Fault` is a structural failure that aborts the whole
/// evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// Spreadsheet error value
    Error(ErrorCode),
    /// Structural fault
    Fault(FormulaError),
}

impl From<ErrorCode> for Interrupt {
    fn from(e: ErrorCode) -> Self {
        Interrupt::Error(e)
    }
}

impl From<FormulaError> for Interrupt {
    fn from(e: FormulaError) -> Self {
        Interrupt::Fault(e)
    }
}

/// Result of evaluating a sub-expression
pub type EvalResult<T> = std::result::Result<T, Interrupt>;

/// Turn an interrupted evaluation into a value, passing faults through
pub fn settle(result: EvalResult<Value>) -> Result<Value, FormulaError> {
    match result {
        Ok(v) => Ok(v),
        Err(Interrupt::Error(e)) => Ok(Value::Error(e)),
        Err(Interrupt::Fault(f)) => Err(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_number_guards_non_finite() {
        assert_eq!(Value::number(f64::INFINITY), Value::Error(ErrorCode::Num));
        assert_eq!(Value::number(f64::NAN), Value::Error(ErrorCode::Num));
        assert_eq!(Value::number(1.5), Value::Number(1.5));
    }

    #[test]
    fn test_array_padding() {
        let array = ArrayValue::from_rows(vec![
            vec![Value::Number(1.0), Value::Number(2.0)],
            vec![Value::Number(3.0)],
        ]);
        assert_eq!(array.width(), 2);
        assert_eq!(array.get(1, 1), Some(&Value::Error(ErrorCode::Na)));
        assert_eq!(array.get(2, 0), None);
        assert_eq!(array.rows().count(), 2);
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(Value::from_cell(&CellValue::Empty), Value::Blank);
        assert_eq!(Value::from_cell(&CellValue::from("x")), Value::text("x"));
        assert_eq!(Value::Number(2.0).to_cell_value(), CellValue::Number(2.0));
        let area = Value::Area(AreaValue::from_range(
            SheetRange::single(0),
            &CellRange::from_indices(0, 0, 1, 1),
        ));
        assert_eq!(area.to_cell_value(), CellValue::Error(ErrorCode::Value));
    }

    #[test]
    fn test_settle() {
        assert_eq!(
            settle(Err(Interrupt::Error(ErrorCode::Ref))),
            Ok(Value::Error(ErrorCode::Ref))
        );
        assert!(settle(Err(Interrupt::Fault(FormulaError::SheetNotFound("X".into())))).is_err());
    }
}
