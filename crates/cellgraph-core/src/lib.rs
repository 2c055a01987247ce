//! # cellgraph-core
//!
//! Storage model shared by the cellgraph formula engine:
//! - [`CellValue`] / [`ErrorCode`] - stored cell contents and error codes
//! - [`CellAddress`] and [`CellRange`] - A1-style addressing
//! - [`SpreadsheetVersion`] - grid bounds per file format
//! - [`Workbook`], [`Worksheet`] - in-memory sheets, names and tables
//!
//! ## Example
//!
//! ```rust
//! use cellgraph_core::{CellValue, Workbook};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//!
//! sheet.set_cell_value("A1", 5.0).unwrap();
//! sheet.set_cell_formula("B1", "=A1*2").unwrap();
//! assert_eq!(sheet.get_value_at(0, 0), CellValue::Number(5.0));
//! ```

pub mod cell;
pub mod error;
pub mod named_range;
pub mod table;
pub mod version;
pub mod workbook;
pub mod worksheet;

pub use cell::{CellAddress, CellRange, CellValue, ErrorCode, FormulaSource, SharedString};
pub use error::{Error, Result};
pub use named_range::{NameScope, NamedRange, NamedRangeCollection};
pub use table::Table;
pub use version::SpreadsheetVersion;
pub use workbook::{Workbook, WorkbookSettings};
pub use worksheet::Worksheet;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;
