//! Whole-workbook calculation
//!
//! Evaluates every formula cell and stores each result as the cell's
//! cached value, so later readers (and `ignore_missing_workbooks`
//! fallbacks) see up-to-date results without an evaluator.
//!
//! # Example
//!
//! ```rust
//! use cellgraph::prelude::*;
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 10.0).unwrap();
//! sheet.set_cell_value("A2", 20.0).unwrap();
//! sheet.set_cell_formula("A3", "=A1+A2").unwrap();
//!
//! let stats = workbook.calculate().unwrap();
//! assert_eq!(stats.cells_calculated, 1);
//! ```

use cellgraph_core::{ErrorCode, Workbook};
use cellgraph_formula::workbook::cell_label;
use cellgraph_formula::{
    CellKey, EvaluationWorkbook, FormulaResult, FunctionLibrary, Value, WorkbookEvaluator,
    WritableWorkbook,
};

/// Options for workbook calculation
#[derive(Debug, Clone)]
pub struct CalculationOptions {
    /// Use stored results for formulas whose external workbooks cannot be
    /// resolved instead of failing
    pub ignore_missing_workbooks: bool,
    /// Keep going after a cell fails to evaluate. Failed cells keep their
    /// previous cached value and are counted in [`CalculationStats::faults`].
    pub continue_on_fault: bool,
    /// Function library to evaluate with; the built-ins when `None`
    pub functions: Option<FunctionLibrary>,
}

impl Default for CalculationOptions {
    fn default() -> Self {
        Self {
            ignore_missing_workbooks: false,
            continue_on_fault: true,
            functions: None,
        }
    }
}

/// Statistics from a calculation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculationStats {
    /// Total number of formula cells
    pub formula_count: usize,
    /// Number of cells whose result was stored
    pub cells_calculated: usize,
    /// Cells that evaluated to the circular-reference error
    pub circular_references: usize,
    /// Cells that evaluated to any other error value
    pub errors: usize,
    /// Cells that could not be evaluated at all
    pub faults: usize,
}

/// Extension trait for Workbook to add calculation methods
pub trait WorkbookCalculationExt {
    /// Calculate all formulas in the workbook with default options
    fn calculate(&mut self) -> FormulaResult<CalculationStats>;

    /// Calculate all formulas with custom options
    fn calculate_with_options(
        &mut self,
        options: &CalculationOptions,
    ) -> FormulaResult<CalculationStats>;
}

impl WorkbookCalculationExt for Workbook {
    fn calculate(&mut self) -> FormulaResult<CalculationStats> {
        self.calculate_with_options(&CalculationOptions::default())
    }

    fn calculate_with_options(
        &mut self,
        options: &CalculationOptions,
    ) -> FormulaResult<CalculationStats> {
        let mut stats = CalculationStats::default();
        let results = evaluate_formulas(self, options, &mut stats)?;

        for (key, value) in results {
            match &value {
                Value::Error(ErrorCode::CircularRef) => stats.circular_references += 1,
                Value::Error(_) => stats.errors += 1,
                _ => {}
            }
            self.store_result(key.sheet, key.row, key.col, &value)?;
            stats.cells_calculated += 1;
        }

        log::info!(
            "calculated {} of {} formula cells ({} errors, {} circular, {} faults)",
            stats.cells_calculated,
            stats.formula_count,
            stats.errors,
            stats.circular_references,
            stats.faults
        );
        Ok(stats)
    }
}

fn evaluate_formulas(
    workbook: &Workbook,
    options: &CalculationOptions,
    stats: &mut CalculationStats,
) -> FormulaResult<Vec<(CellKey, Value)>> {
    let mut evaluator = WorkbookEvaluator::new(workbook)?
        .ignore_missing_workbooks(options.ignore_missing_workbooks);
    if let Some(functions) = &options.functions {
        evaluator = evaluator.with_functions(functions.clone());
    }

    let mut results = Vec::new();
    for sheet in 0..workbook.sheet_count() {
        let mut cells = workbook.formula_cells(sheet);
        cells.sort_unstable();
        stats.formula_count += cells.len();
        for (row, col) in cells {
            match evaluator.evaluate_at(sheet, row, col) {
                Ok(value) => results.push((CellKey::new(sheet, row, col), value)),
                Err(fault) if options.continue_on_fault => {
                    log::warn!(
                        "{}!{}: {}",
                        sheet_name(workbook, sheet),
                        cell_label(row, col),
                        fault
                    );
                    stats.faults += 1;
                }
                Err(fault) => return Err(fault),
            }
        }
    }
    Ok(results)
}

fn sheet_name(workbook: &Workbook, sheet: usize) -> &str {
    EvaluationWorkbook::sheet_name(workbook, sheet).unwrap_or("?")
}
