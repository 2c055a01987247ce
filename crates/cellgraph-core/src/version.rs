//! Spreadsheet format versions and their grid limits

use std::fmt;

/// The file format a workbook is bound to.
///
/// Each version fixes the size of the grid. A reference that falls outside
/// these bounds is rejected when a formula is parsed, never truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpreadsheetVersion {
    /// Legacy binary format (BIFF8): 65,536 rows by 256 columns
    Excel97,
    /// Office Open XML: 1,048,576 rows by 16,384 columns
    #[default]
    Excel2007,
}

impl SpreadsheetVersion {
    /// Number of rows in a sheet
    pub const fn max_rows(self) -> u32 {
        match self {
            SpreadsheetVersion::Excel97 => 0x1_0000,
            SpreadsheetVersion::Excel2007 => 0x10_0000,
        }
    }

    /// Number of columns in a sheet
    pub const fn max_columns(self) -> u32 {
        match self {
            SpreadsheetVersion::Excel97 => 0x100,
            SpreadsheetVersion::Excel2007 => 0x4000,
        }
    }

    /// Zero-based index of the last row
    pub const fn last_row_index(self) -> u32 {
        self.max_rows() - 1
    }

    /// Zero-based index of the last column
    pub const fn last_column_index(self) -> u16 {
        (self.max_columns() - 1) as u16
    }

    /// Letters of the last column (`IV` or `XFD`)
    pub const fn last_column_name(self) -> &'static str {
        match self {
            SpreadsheetVersion::Excel97 => "IV",
            SpreadsheetVersion::Excel2007 => "XFD",
        }
    }

    /// Maximum number of arguments a function call may take
    pub const fn max_function_args(self) -> usize {
        match self {
            SpreadsheetVersion::Excel97 => 30,
            SpreadsheetVersion::Excel2007 => 255,
        }
    }

    /// Whether a zero-based row index fits
    pub fn contains_row(self, row: u32) -> bool {
        row < self.max_rows()
    }

    /// Whether a zero-based column index fits
    pub fn contains_column(self, col: u32) -> bool {
        col < self.max_columns()
    }
}

impl fmt::Display for SpreadsheetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpreadsheetVersion::Excel97 => f.write_str("Excel97"),
            SpreadsheetVersion::Excel2007 => f.write_str("Excel2007"),
        }
    }
}
