//! # cellgraph-formula
//!
//! Formula engine for cellgraph workbooks.
//!
//! This crate provides:
//! - Formula parsing from A1-style text ([`parse_formula`]) and from
//!   BIFF8 token streams ([`ptg::from_tokens`])
//! - The operand model ([`Value`]) with coercion and comparison rules
//! - A dependency-aware [`WorkbookEvaluator`] that caches results and clears
//!   only what a change affects
//! - [`ForkedEvaluator`]s that evaluate what-if overrides against a shared
//!   master, one per thread if needed
//! - A pluggable [`FunctionLibrary`] of built-in spreadsheet functions
//!
//! ## Example
//!
//! ```rust
//! use cellgraph_core::Workbook;
//! use cellgraph_formula::{Value, WorkbookEvaluator};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 20.0).unwrap();
//! sheet.set_cell_formula("A2", "=SUM(A1,22)").unwrap();
//!
//! let mut evaluator = WorkbookEvaluator::new(workbook).unwrap();
//! assert_eq!(evaluator.evaluate("Sheet1", 1, 0), Ok(Value::Number(42.0)));
//! ```

pub mod ast;
pub mod cache;
pub mod compare;
pub mod error;
pub mod evaluator;
pub mod external;
pub mod fork;
pub mod functions;
pub mod listener;
pub mod operand;
pub mod parser;
pub mod ptg;
pub mod render;
pub mod shifter;
pub mod stability;
mod tracker;
pub mod value;
pub mod workbook;

pub use ast::{
    BinaryOperator, CellReference, FormulaExpr, RangeKind, RangeReference, SheetRef, UnaryOperator,
};
pub use cache::{CellKey, Cleared, EvaluationCache};
pub use compare::compare;
pub use error::{FormulaError, FormulaResult};
pub use evaluator::WorkbookEvaluator;
pub use external::{ExternalWorkbookResolver, StaticExternalValues};
pub use fork::ForkedEvaluator;
pub use functions::{EvaluationContext, FunctionDef, FunctionImpl, FunctionLibrary};
pub use listener::EvaluationListener;
pub use parser::{parse_formula, parse_formula_with, ParseContext};
pub use ptg::LinkTable;
pub use shifter::{FormulaShifter, RowShift};
pub use stability::{FinalSheets, StabilityClassifier};
pub use value::{AreaValue, ArrayValue, EvalResult, Interrupt, RefValue, SheetRange, Value};
pub use workbook::{CellContent, EvaluationWorkbook, TableLookup, WritableWorkbook};
