//! The narrow views of a workbook the evaluator works through
//!
//! Cell storage lives outside this crate. The evaluator only needs to read
//! raw cell content, map sheet names to indices, look up names and tables,
//! and (for write-back) store values. [`cellgraph_core::Workbook`]
//! implements all of these.

use cellgraph_core::{
    CellAddress, CellRange, CellValue, FormulaSource, SpreadsheetVersion, Table, Workbook,
};

use crate::error::{FormulaError, FormulaResult};
use crate::ptg::LinkTable;
use crate::value::Value;

/// Raw content of an existing cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent<'a> {
    /// A literal value (`Blank` for a cell that exists but is empty)
    Value(Value),
    /// Formula text without the leading `=`
    Formula {
        text: &'a str,
        array_range: Option<CellRange>,
        cached: Option<Value>,
    },
    /// Encoded token stream
    Tokens {
        bytes: &'a [u8],
        array_range: Option<CellRange>,
        cached: Option<Value>,
    },
}

impl CellContent<'_> {
    /// Whether the cell holds a formula in either form
    pub fn is_formula(&self) -> bool {
        !matches!(self, CellContent::Value(_))
    }

    /// The last stored formula result, or the literal value
    pub fn cached_value(&self) -> Option<Value> {
        match self {
            CellContent::Value(v) => Some(v.clone()),
            CellContent::Formula { cached, .. } | CellContent::Tokens { cached, .. } => {
                cached.clone()
            }
        }
    }
}

/// Table registry used by structured references
pub trait TableLookup {
    /// Table by name (case-insensitive) with the name of its sheet
    fn table(&self, name: &str) -> Option<(&str, &Table)>;
}

/// Read access to cell storage
pub trait EvaluationWorkbook: TableLookup {
    /// Format version fixing the grid bounds
    fn version(&self) -> SpreadsheetVersion;

    /// Number of sheets
    fn sheet_count(&self) -> usize;

    /// Index of a sheet by name (case-insensitive)
    fn sheet_index(&self, name: &str) -> Option<usize>;

    /// Name of a sheet by index
    fn sheet_name(&self, index: usize) -> Option<&str>;

    /// Content of a cell, `None` when the cell does not exist
    fn cell(&self, sheet: usize, row: u32, col: u16) -> Option<CellContent<'_>>;

    /// Positions of every formula cell on a sheet
    fn formula_cells(&self, sheet: usize) -> Vec<(u32, u16)>;

    /// Bounding box of the cells that exist on a sheet
    fn used_extent(&self, sheet: usize) -> Option<CellRange>;

    /// Formula text a defined name refers to, as seen from `sheet`
    fn name(&self, name: &str, sheet: usize) -> Option<&str>;

    /// Whether dates use the 1904 system
    fn date_1904(&self) -> bool {
        false
    }

    /// Extern sheets and names that stored token streams index into
    fn link_table(&self) -> LinkTable {
        LinkTable::new()
    }
}

impl<T: TableLookup + ?Sized> TableLookup for &T {
    fn table(&self, name: &str) -> Option<(&str, &Table)> {
        (**self).table(name)
    }
}

impl<T: EvaluationWorkbook + ?Sized> EvaluationWorkbook for &T {
    fn version(&self) -> SpreadsheetVersion {
        (**self).version()
    }

    fn sheet_count(&self) -> usize {
        (**self).sheet_count()
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        (**self).sheet_index(name)
    }

    fn sheet_name(&self, index: usize) -> Option<&str> {
        (**self).sheet_name(index)
    }

    fn cell(&self, sheet: usize, row: u32, col: u16) -> Option<CellContent<'_>> {
        (**self).cell(sheet, row, col)
    }

    fn formula_cells(&self, sheet: usize) -> Vec<(u32, u16)> {
        (**self).formula_cells(sheet)
    }

    fn used_extent(&self, sheet: usize) -> Option<CellRange> {
        (**self).used_extent(sheet)
    }

    fn name(&self, name: &str, sheet: usize) -> Option<&str> {
        (**self).name(name, sheet)
    }

    fn date_1904(&self) -> bool {
        (**self).date_1904()
    }

    fn link_table(&self) -> LinkTable {
        (**self).link_table()
    }
}

/// Write access used by the evaluator's setters and by write-back
pub trait WritableWorkbook: EvaluationWorkbook {
    /// Store a literal value, replacing whatever the cell held
    fn set_value(&mut self, sheet: usize, row: u32, col: u16, value: &Value) -> FormulaResult<()>;

    /// Store formula text (without `=`)
    fn set_formula(&mut self, sheet: usize, row: u32, col: u16, text: &str) -> FormulaResult<()>;

    /// Remove a cell
    fn clear_cell(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()>;

    /// Record the result of evaluating a formula cell
    fn store_result(&mut self, sheet: usize, row: u32, col: u16, value: &Value)
        -> FormulaResult<()>;

    /// Remove a whole sheet; later sheets move down by one
    fn remove_sheet(&mut self, sheet: usize) -> FormulaResult<()>;
}

impl TableLookup for Workbook {
    fn table(&self, name: &str) -> Option<(&str, &Table)> {
        let table = Workbook::table(self, name)?;
        let sheet = self.worksheet(table.sheet)?;
        Some((sheet.name(), table))
    }
}

impl EvaluationWorkbook for Workbook {
    fn version(&self) -> SpreadsheetVersion {
        self.settings().version
    }

    fn sheet_count(&self) -> usize {
        Workbook::sheet_count(self)
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        Workbook::sheet_index(self, name)
    }

    fn sheet_name(&self, index: usize) -> Option<&str> {
        self.worksheet(index).map(|ws| ws.name())
    }

    fn cell(&self, sheet: usize, row: u32, col: u16) -> Option<CellContent<'_>> {
        let value = self.worksheet(sheet)?.cell_at(row, col)?;
        Some(match value {
            CellValue::Formula {
                source,
                cached_value,
                array_range,
            } => {
                let cached = cached_value.as_deref().map(Value::from_cell);
                match source {
                    FormulaSource::Text(text) => CellContent::Formula {
                        text,
                        array_range: *array_range,
                        cached,
                    },
                    FormulaSource::Tokens(bytes) => CellContent::Tokens {
                        bytes,
                        array_range: *array_range,
                        cached,
                    },
                }
            }
            other => CellContent::Value(Value::from_cell(other)),
        })
    }

    fn formula_cells(&self, sheet: usize) -> Vec<(u32, u16)> {
        self.worksheet(sheet)
            .map(|ws| ws.formula_cells().map(|(row, col, ..)| (row, col)).collect())
            .unwrap_or_default()
    }

    fn used_extent(&self, sheet: usize) -> Option<CellRange> {
        self.worksheet(sheet)?.used_range()
    }

    fn name(&self, name: &str, sheet: usize) -> Option<&str> {
        self.get_named_range(name, sheet)
            .map(|n| n.refers_to.as_str())
    }

    fn date_1904(&self) -> bool {
        self.settings().date_1904
    }

    fn link_table(&self) -> LinkTable {
        LinkTable::from_workbook(self)
    }
}

impl WritableWorkbook for Workbook {
    fn set_value(&mut self, sheet: usize, row: u32, col: u16, value: &Value) -> FormulaResult<()> {
        let ws = sheet_mut(self, sheet)?;
        ws.set_cell_value_at(row, col, value.to_cell_value())?;
        Ok(())
    }

    fn set_formula(&mut self, sheet: usize, row: u32, col: u16, text: &str) -> FormulaResult<()> {
        sheet_mut(self, sheet)?.set_cell_formula_at(row, col, text)?;
        Ok(())
    }

    fn clear_cell(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<()> {
        sheet_mut(self, sheet)?.clear_cell_at(row, col);
        Ok(())
    }

    fn store_result(
        &mut self,
        sheet: usize,
        row: u32,
        col: u16,
        value: &Value,
    ) -> FormulaResult<()> {
        sheet_mut(self, sheet)?.set_formula_result(row, col, value.to_cell_value())?;
        Ok(())
    }

    fn remove_sheet(&mut self, sheet: usize) -> FormulaResult<()> {
        self.remove_worksheet(sheet)?;
        Ok(())
    }
}

fn sheet_mut(wb: &mut Workbook, sheet: usize) -> FormulaResult<&mut cellgraph_core::Worksheet> {
    let count = wb.sheet_count();
    wb.worksheet_mut(sheet)
        .ok_or(FormulaError::Core(cellgraph_core::Error::SheetOutOfBounds(sheet, count)))
}

/// A1 text of a cell without a sheet qualifier, as used in diagnostics
pub fn cell_label(row: u32, col: u16) -> String {
    CellAddress::new(row, col).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::ErrorCode;
    use pretty_assertions::assert_eq;

    fn sample() -> Workbook {
        let mut wb = Workbook::new();
        let ws = wb.worksheet_mut(0).unwrap();
        ws.set_cell_value("A1", 5.0).unwrap();
        ws.set_cell_value("A2", CellValue::Empty).unwrap();
        ws.set_cell_formula("B1", "=A1*2").unwrap();
        wb.define_name("Rate", "Sheet1!$A$1").unwrap();
        wb
    }

    #[test]
    fn test_cell_content() {
        let wb = sample();
        assert_eq!(wb.cell(0, 0, 0), Some(CellContent::Value(Value::Number(5.0))));
        assert_eq!(wb.cell(0, 1, 0), Some(CellContent::Value(Value::Blank)));
        assert_eq!(wb.cell(0, 2, 0), None);
        assert_eq!(
            wb.cell(0, 0, 1),
            Some(CellContent::Formula {
                text: "A1*2",
                array_range: None,
                cached: None
            })
        );
        assert_eq!(wb.formula_cells(0), vec![(0, 1)]);
        assert_eq!(wb.name("rate", 0), Some("Sheet1!$A$1"));
    }

    #[test]
    fn test_write_back() {
        let mut wb = sample();
        wb.store_result(0, 0, 1, &Value::Number(10.0)).unwrap();
        assert_eq!(
            wb.cell(0, 0, 1).and_then(|c| c.cached_value()),
            Some(Value::Number(10.0))
        );
        assert!(wb.store_result(0, 0, 0, &Value::Number(1.0)).is_err());

        wb.set_value(0, 4, 4, &Value::Error(ErrorCode::Na)).unwrap();
        assert_eq!(wb.cell(0, 4, 4), Some(CellContent::Value(Value::Error(ErrorCode::Na))));
        wb.clear_cell(0, 4, 4).unwrap();
        assert_eq!(wb.cell(0, 4, 4), None);
        assert!(wb.set_value(3, 0, 0, &Value::Blank).is_err());
    }
}
