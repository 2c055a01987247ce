//! Resolution of references into other workbooks

use ahash::AHashMap;

use crate::error::{FormulaError, FormulaResult};
use crate::value::Value;
use crate::workbook::cell_label;

/// Supplies values for references such as `[1]Rates!B2`.
///
/// `book` is the workbook number written in the reference. Implementations
/// may load files, query a registry of open workbooks, or anything else;
/// they return [`FormulaError::ExternalWorkbook`] when the value cannot be
/// produced.
pub trait ExternalWorkbookResolver: Send + Sync {
    /// Value of one cell in an external workbook
    fn resolve(&self, book: u16, sheet: &str, row: u32, col: u16) -> FormulaResult<Value>;
}

/// Fixed table of external cell values, keyed by workbook number, sheet name
/// and position
#[derive(Debug, Clone, Default)]
pub struct StaticExternalValues {
    values: AHashMap<(u16, String, u32, u16), Value>,
}

impl StaticExternalValues {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; sheet names match case-insensitively
    pub fn insert(&mut self, book: u16, sheet: &str, row: u32, col: u16, value: impl Into<Value>) {
        self.values
            .insert((book, sheet.to_lowercase(), row, col), value.into());
    }
}

impl ExternalWorkbookResolver for StaticExternalValues {
    fn resolve(&self, book: u16, sheet: &str, row: u32, col: u16) -> FormulaResult<Value> {
        self.values
            .get(&(book, sheet.to_lowercase(), row, col))
            .cloned()
            .ok_or_else(|| unresolved(book, sheet, row, col))
    }
}

/// The fault raised when an external cell cannot be resolved
pub fn unresolved(book: u16, sheet: &str, row: u32, col: u16) -> FormulaError {
    FormulaError::ExternalWorkbook {
        book,
        sheet: sheet.to_string(),
        cell: cell_label(row, col),
    }
}
