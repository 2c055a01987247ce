//! # cellgraph
//!
//! A spreadsheet formula engine: parse formulas, evaluate them against an
//! in-memory workbook, and recalculate only what a change affects.
//!
//! ## Features
//!
//! - A1-style formula text and BIFF8 token streams
//! - Evaluation with a result cache and dependency graph
//! - Circular reference detection
//! - Forked evaluators for concurrent what-if scenarios
//! - Pluggable function library
//! - Whole-workbook recalculation and row insertion/deletion
//!
//! ## Example
//!
//! ```rust
//! use cellgraph::prelude::*;
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 5.0).unwrap();
//! sheet.set_cell_formula("B1", "=A1*2").unwrap();
//!
//! let mut evaluator = WorkbookEvaluator::new(workbook).unwrap();
//! assert_eq!(evaluator.evaluate("Sheet1", 0, 1), Ok(Value::Number(10.0)));
//!
//! let mut what_if = evaluator.fork();
//! what_if.update_cell("Sheet1", 0, 0, 21.0).unwrap();
//! assert_eq!(what_if.evaluate("Sheet1", 0, 1), Ok(Value::Number(42.0)));
//! ```

pub mod calculation;
pub mod prelude;
pub mod rows;

// Re-export calculation types
pub use calculation::{CalculationOptions, CalculationStats, WorkbookCalculationExt};
pub use rows::shift_rows;

// Re-export core types
pub use cellgraph_core::{
    CellAddress, CellRange, CellValue, Error, ErrorCode, NameScope, NamedRange, Result,
    SpreadsheetVersion, Table, Workbook, WorkbookSettings, Worksheet, MAX_SHEET_NAME_LEN,
};

// Re-export formula types
pub use cellgraph_formula::{
    compare, parse_formula, parse_formula_with, CellKey, EvaluationCache, EvaluationContext,
    EvaluationListener, EvaluationWorkbook, ExternalWorkbookResolver, FinalSheets, ForkedEvaluator,
    FormulaError, FormulaExpr, FormulaResult, FormulaShifter, FunctionDef, FunctionLibrary,
    LinkTable, ParseContext, RowShift, StabilityClassifier, StaticExternalValues, Value,
    WorkbookEvaluator, WritableWorkbook,
};
