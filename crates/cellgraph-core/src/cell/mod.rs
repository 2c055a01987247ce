//! Cell-related types
//!
//! - [`CellValue`] - what a cell stores (literal or formula)
//! - [`CellAddress`] / [`CellRange`] - A1-style locations
//! - [`CellStorage`] - the sparse grid behind a worksheet

mod address;
mod storage;
mod value;

pub use address::{CellAddress, CellRange, CellRangeIterator};
pub use storage::CellStorage;
pub use value::{CellValue, ErrorCode, FormulaSource, SharedString};
