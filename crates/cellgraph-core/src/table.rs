//! Table definitions used by structured references

use crate::cell::CellRange;

/// A table (list object) on a sheet.
///
/// `range` covers the whole table including header and totals rows. The
/// column names are in left-to-right order and match `range` column by
/// column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Table name, unique per workbook (case-insensitive)
    pub name: String,
    /// Index of the sheet holding the table
    pub sheet: usize,
    /// Full extent of the table
    pub range: CellRange,
    /// Number of header rows at the top (0 or 1)
    pub header_rows: u32,
    /// Number of totals rows at the bottom (0 or 1)
    pub totals_rows: u32,
    /// Column names
    pub columns: Vec<String>,
}

impl Table {
    /// A table with one header row and no totals row
    pub fn new(
        name: impl Into<String>,
        sheet: usize,
        range: CellRange,
        columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sheet,
            range,
            header_rows: 1,
            totals_rows: 0,
            columns,
        }
    }

    /// Set the number of totals rows
    pub fn with_totals_rows(mut self, totals_rows: u32) -> Self {
        self.totals_rows = totals_rows;
        self
    }

    /// First row of the body (below the header)
    pub fn data_start_row(&self) -> u32 {
        self.range.start.row + self.header_rows
    }

    /// Last row of the body (above the totals row)
    pub fn data_end_row(&self) -> u32 {
        self.range.end.row.saturating_sub(self.totals_rows)
    }

    /// Sheet column of a named table column (case-insensitive)
    pub fn column_index(&self, column: &str) -> Option<u16> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column.trim()))
            .map(|offset| self.range.start.col + offset as u16)
    }
}
