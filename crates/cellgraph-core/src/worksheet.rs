//! Worksheet type

use crate::cell::{CellAddress, CellRange, CellStorage, CellValue, FormulaSource};
use crate::error::{Error, Result};
use crate::version::SpreadsheetVersion;

/// A single sheet of cells
#[derive(Debug, Clone)]
pub struct Worksheet {
    /// Sheet name
    name: String,
    /// Cell storage
    cells: CellStorage,
    /// Grid bounds enforced on writes
    version: SpreadsheetVersion,
}

impl Worksheet {
    /// Create a new worksheet bounded by the largest grid
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self::with_version(name, SpreadsheetVersion::Excel2007)
    }

    /// Create a new worksheet bounded by `version`
    pub fn with_version<S: Into<String>>(name: S, version: SpreadsheetVersion) -> Self {
        Self {
            name: name.into(),
            cells: CellStorage::new(),
            version,
        }
    }

    /// Get the sheet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the sheet (the workbook validates the name)
    pub(crate) fn set_name<S: Into<String>>(&mut self, name: S) {
        self.name = name.into();
    }

    /// Grid bounds of this sheet
    pub fn version(&self) -> SpreadsheetVersion {
        self.version
    }

    // === Cell Access ===

    /// Stored value at a position; `None` if the cell does not exist
    pub fn cell_at(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(row, col)
    }

    /// Get a cell value by address string, `Empty` for missing cells
    pub fn get_value(&self, address: &str) -> Result<CellValue> {
        let addr = CellAddress::parse_for(address, self.version)?;
        Ok(self.get_value_at(addr.row, addr.col))
    }

    /// Get a cell value by indices, `Empty` for missing cells
    pub fn get_value_at(&self, row: u32, col: u16) -> CellValue {
        self.cells.get(row, col).cloned().unwrap_or_default()
    }

    /// Iterate over all existing cells in row order
    pub fn cells(&self) -> impl Iterator<Item = (u32, u16, &CellValue)> {
        self.cells.iter()
    }

    /// Number of existing cells
    pub fn cell_count(&self) -> usize {
        self.cells.cell_count()
    }

    // === Cell Modification ===

    /// Set a cell value by address string
    pub fn set_cell_value<V: Into<CellValue>>(&mut self, address: &str, value: V) -> Result<()> {
        let addr = CellAddress::parse_for(address, self.version)?;
        self.set_cell_value_at(addr.row, addr.col, value)
    }

    /// Set a cell value by row and column indices. Storing `Empty` creates
    /// a blank cell.
    pub fn set_cell_value_at<V: Into<CellValue>>(
        &mut self,
        row: u32,
        col: u16,
        value: V,
    ) -> Result<()> {
        self.validate_cell_position(row, col)?;
        self.cells.set(row, col, value.into());
        Ok(())
    }

    /// Set a cell formula by address string
    pub fn set_cell_formula(&mut self, address: &str, formula: &str) -> Result<()> {
        let addr = CellAddress::parse_for(address, self.version)?;
        self.set_cell_formula_at(addr.row, addr.col, formula)
    }

    /// Set a cell formula by row and column indices. A leading `=` is optional.
    pub fn set_cell_formula_at(&mut self, row: u32, col: u16, formula: &str) -> Result<()> {
        self.validate_cell_position(row, col)?;
        self.cells.set(row, col, CellValue::formula(formula));
        Ok(())
    }

    /// Store an encoded token stream as a cell formula
    pub fn set_cell_formula_tokens_at(
        &mut self,
        row: u32,
        col: u16,
        tokens: Vec<u8>,
    ) -> Result<()> {
        self.validate_cell_position(row, col)?;
        self.cells.set(row, col, CellValue::formula_tokens(tokens));
        Ok(())
    }

    /// Enter one formula for a whole range as an array formula
    pub fn set_array_formula(&mut self, range: &str, formula: &str) -> Result<()> {
        let range = CellRange::parse(range)?;
        self.validate_cell_position(range.end.row, range.end.col)?;
        for addr in range.cells() {
            let mut value = CellValue::formula(formula);
            if let CellValue::Formula { array_range, .. } = &mut value {
                *array_range = Some(range);
            }
            self.cells.set(addr.row, addr.col, value);
        }
        Ok(())
    }

    /// Remove a cell by address string
    pub fn clear_cell(&mut self, address: &str) -> Result<()> {
        let addr = CellAddress::parse_for(address, self.version)?;
        self.cells.remove(addr.row, addr.col);
        Ok(())
    }

    /// Remove a cell by indices
    pub fn clear_cell_at(&mut self, row: u32, col: u16) -> Option<CellValue> {
        self.cells.remove(row, col)
    }

    /// Bounds of all existing cells
    pub fn used_range(&self) -> Option<CellRange> {
        self.cells
            .used_bounds()
            .map(|(min_row, min_col, max_row, max_col)| {
                CellRange::from_indices(min_row, min_col, max_row, max_col)
            })
    }

    // === Row structure ===

    /// Insert `count` blank rows before `at`
    pub fn insert_rows(&mut self, at: u32, count: u32) -> Result<()> {
        CellAddress::check_row(at, self.version)?;
        self.cells.insert_rows(at, count, self.version.max_rows());
        Ok(())
    }

    /// Delete `count` rows starting at `at`
    pub fn delete_rows(&mut self, at: u32, count: u32) -> Result<()> {
        CellAddress::check_row(at, self.version)?;
        self.cells.delete_rows(at, count);
        Ok(())
    }

    /// Rewrite every text formula on the sheet
    pub fn map_formulas<F>(&mut self, mut rewrite: F)
    where
        F: FnMut(u32, u16, &str) -> Option<String>,
    {
        for (row, col, value) in self.cells.iter_mut() {
            if let CellValue::Formula {
                source: FormulaSource::Text(text),
                ..
            } = value
            {
                if let Some(updated) = rewrite(row, col, text) {
                    *text = updated;
                }
            }
        }
    }

    // === Formulas ===

    /// Iterate over formula cells: (row, col, source, array range)
    pub fn formula_cells(
        &self,
    ) -> impl Iterator<Item = (u32, u16, &FormulaSource, Option<CellRange>)> {
        self.cells.iter().filter_map(|(row, col, value)| match value {
            CellValue::Formula {
                source,
                array_range,
                ..
            } => Some((row, col, source, *array_range)),
            _ => None,
        })
    }

    /// Formula text at a cell position, if it holds a text formula
    pub fn get_formula_at(&self, row: u32, col: u16) -> Option<&str> {
        self.cells.get(row, col).and_then(CellValue::formula_text)
    }

    /// Store the result of evaluating a formula cell
    pub fn set_formula_result(&mut self, row: u32, col: u16, value: CellValue) -> Result<()> {
        let location = CellAddress::new(row, col).to_string();
        match self.cells.get_mut(row, col) {
            Some(CellValue::Formula { cached_value, .. }) => {
                *cached_value = Some(Box::new(value));
                Ok(())
            }
            _ => Err(Error::NotAFormula(location)),
        }
    }

    /// Cached result for formula cells, the stored value otherwise
    pub fn get_calculated_value_at(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.cells.get(row, col).map(CellValue::effective_value)
    }

    fn validate_cell_position(&self, row: u32, col: u16) -> Result<()> {
        CellAddress::check_row(row, self.version)?;
        CellAddress::check_column(col as u32, self.version)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_and_get() {
        let mut ws = Worksheet::new("Data");
        ws.set_cell_value("A1", 5.0).unwrap();
        ws.set_cell_value_at(0, 1, "x").unwrap();
        assert_eq!(ws.get_value("A1").unwrap(), CellValue::Number(5.0));
        assert_eq!(ws.get_value_at(0, 1).as_string(), Some("x"));
        assert_eq!(ws.cell_at(5, 5), None);
        assert_eq!(ws.get_value_at(5, 5), CellValue::Empty);
    }

    #[test]
    fn test_bounds_follow_version() {
        let mut ws = Worksheet::with_version("Old", SpreadsheetVersion::Excel97);
        assert!(ws.set_cell_value_at(65_535, 255, 1.0).is_ok());
        assert_eq!(
            ws.set_cell_value_at(65_536, 0, 1.0),
            Err(Error::RowOutOfBounds(65_536, 65_535))
        );
        assert!(ws.set_cell_value("IW1", 1.0).is_err());
    }

    #[test]
    fn test_formula_result() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_formula("B1", "=A1*2").unwrap();
        assert_eq!(ws.get_formula_at(0, 1), Some("A1*2"));
        ws.set_formula_result(0, 1, CellValue::Error(ErrorCode::Div0))
            .unwrap();
        assert_eq!(
            ws.get_calculated_value_at(0, 1),
            Some(&CellValue::Error(ErrorCode::Div0))
        );
        assert!(ws.set_formula_result(0, 0, CellValue::Empty).is_err());
    }

    #[test]
    fn test_array_formula_covers_range() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_array_formula("C1:C3", "A1:A3*2").unwrap();
        let cells: Vec<_> = ws.formula_cells().map(|(r, c, _, range)| (r, c, range)).collect();
        let range = CellRange::parse("C1:C3").ok();
        assert_eq!(cells, vec![(0, 2, range), (1, 2, range), (2, 2, range)]);
    }

    #[test]
    fn test_map_formulas() {
        let mut ws = Worksheet::new("Sheet1");
        ws.set_cell_formula("A1", "B1+1").unwrap();
        ws.map_formulas(|_, _, text| Some(text.replace("B1", "B2")));
        assert_eq!(ws.get_formula_at(0, 0), Some("B2+1"));
    }
}
