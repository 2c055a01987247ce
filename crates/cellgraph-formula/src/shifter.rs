//! Rewriting formulas when rows are inserted or deleted

use cellgraph_core::{ErrorCode, SpreadsheetVersion};

use crate::ast::{FormulaExpr, RangeKind, SheetRef};
use crate::error::FormulaResult;
use crate::parser::{parse_formula_with, ParseContext};

/// A row insertion or deletion on one sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShift {
    /// `count` new rows appear before row `at`
    Insert { at: u32, count: u32 },
    /// Rows `at..at + count` disappear
    Delete { at: u32, count: u32 },
}

/// Moves the references of formulas so they keep pointing at the same
/// cells after rows of `sheet` move.
///
/// References into deleted rows become `#REF!`, as do references pushed
/// past the last row of the format. Ranges that lose some of their rows
/// shrink. Whole-column ranges never change.
#[derive(Debug, Clone)]
pub struct FormulaShifter {
    sheet: String,
    shift: RowShift,
    version: SpreadsheetVersion,
}

impl FormulaShifter {
    pub fn new(sheet: &str, shift: RowShift, version: SpreadsheetVersion) -> Self {
        Self {
            sheet: sheet.to_string(),
            shift,
            version,
        }
    }

    /// Shift references in formula text held by a cell of `formula_sheet`.
    /// Returns `None` when nothing changed.
    pub fn shift_formula(&self, text: &str, formula_sheet: &str) -> FormulaResult<Option<String>> {
        let mut expr = parse_formula_with(text, &ParseContext::new(self.version))?;
        Ok(self.adjust(&mut expr, formula_sheet).then(|| expr.to_string()))
    }

    /// Shift the references of a parsed formula in place. Returns whether
    /// anything changed.
    pub fn adjust(&self, expr: &mut FormulaExpr, formula_sheet: &str) -> bool {
        match expr {
            FormulaExpr::CellRef(cell) => {
                if !self.applies(&cell.sheet, formula_sheet) {
                    return false;
                }
                match self.shift_row(cell.address.row) {
                    Some(row) if row == cell.address.row => false,
                    Some(row) => {
                        cell.address.row = row;
                        true
                    }
                    None => {
                        *expr = FormulaExpr::Error(ErrorCode::Ref);
                        true
                    }
                }
            }
            FormulaExpr::RangeRef(range) => {
                if range.kind == RangeKind::Columns || !self.applies(&range.sheet, formula_sheet) {
                    return false;
                }
                let (start, end) = (range.range.start.row, range.range.end.row);
                match self.shift_span(start, end) {
                    Some((s, e)) if (s, e) == (start, end) => false,
                    Some((s, e)) => {
                        range.range.start.row = s;
                        range.range.end.row = e;
                        true
                    }
                    None => {
                        *expr = FormulaExpr::Error(ErrorCode::Ref);
                        true
                    }
                }
            }
            FormulaExpr::BinaryOp { left, right, .. } => {
                let l = self.adjust(left, formula_sheet);
                let r = self.adjust(right, formula_sheet);
                l || r
            }
            FormulaExpr::UnaryOp { operand, .. } => self.adjust(operand, formula_sheet),
            FormulaExpr::Paren(inner) => self.adjust(inner, formula_sheet),
            FormulaExpr::Function { args, .. } => args
                .iter_mut()
                .fold(false, |changed, arg| self.adjust(arg, formula_sheet) | changed),
            _ => false,
        }
    }

    /// Only single-sheet references into this workbook move
    fn applies(&self, sheet: &Option<SheetRef>, formula_sheet: &str) -> bool {
        match sheet {
            None => formula_sheet.eq_ignore_ascii_case(&self.sheet),
            Some(SheetRef {
                workbook: None,
                first,
                last: None,
            }) => first.eq_ignore_ascii_case(&self.sheet),
            Some(_) => false,
        }
    }

    fn shift_row(&self, row: u32) -> Option<u32> {
        match self.shift {
            RowShift::Insert { at, count } if row >= at => {
                row.checked_add(count).filter(|r| *r <= self.version.last_row_index())
            }
            RowShift::Delete { at, count } if row >= at => {
                if row - at < count {
                    None
                } else {
                    Some(row - count)
                }
            }
            _ => Some(row),
        }
    }

    fn shift_span(&self, start: u32, end: u32) -> Option<(u32, u32)> {
        match self.shift {
            RowShift::Insert { at, count } => {
                let last = self.version.last_row_index();
                let start = if start >= at { start.checked_add(count)? } else { start };
                if start > last {
                    return None;
                }
                let end = if end >= at { end.saturating_add(count).min(last) } else { end };
                Some((start, end))
            }
            RowShift::Delete { at, count } => {
                let after = at.saturating_add(count);
                if start >= at && end < after {
                    return None;
                }
                let start = match start {
                    s if s < at => s,
                    s if s < after => at,
                    s => s - count,
                };
                let end = match end {
                    e if e < at => e,
                    e if e < after => at - 1,
                    e => e - count,
                };
                Some((start, end))
            }
        }
    }
}
