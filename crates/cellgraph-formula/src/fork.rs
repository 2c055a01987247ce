//! Forked evaluators
//!
//! A fork reads the master evaluator's workbook and parsed formulas but
//! keeps its own cell overrides and its own result cache. The master is
//! borrowed immutably, so any number of forks can run side by side on
//! different threads:
//!
//! ```rust
//! use cellgraph_core::Workbook;
//! use cellgraph_formula::{Value, WorkbookEvaluator};
//!
//! let mut workbook = Workbook::new();
//! let sheet = workbook.worksheet_mut(0).unwrap();
//! sheet.set_cell_value("A1", 2.0).unwrap();
//! sheet.set_cell_formula("B1", "=A1*10").unwrap();
//! let master = WorkbookEvaluator::new(workbook).unwrap();
//!
//! let mut fork = master.fork();
//! fork.update_cell("Sheet1", 0, 0, 3.0).unwrap();
//! assert_eq!(fork.evaluate("Sheet1", 0, 1), Ok(Value::Number(30.0)));
//! ```

use ahash::AHashMap;

use crate::cache::{CellKey, EvaluationCache};
use crate::error::{FormulaError, FormulaResult};
use crate::evaluator::Environment;
use crate::value::Value;
use crate::workbook::{cell_label, EvaluationWorkbook, WritableWorkbook};

/// Evaluator over a master workbook plus private overrides. Created by
/// [`WorkbookEvaluator::fork`](crate::WorkbookEvaluator::fork).
pub struct ForkedEvaluator<'a, W> {
    env: &'a Environment<W>,
    cache: EvaluationCache,
    overrides: AHashMap<CellKey, Value>,
    generation: u64,
}

impl<'a, W: EvaluationWorkbook> ForkedEvaluator<'a, W> {
    pub(crate) fn new(env: &'a Environment<W>) -> Self {
        Self {
            env,
            cache: EvaluationCache::new(),
            overrides: AHashMap::new(),
            generation: 0,
        }
    }

    /// Give a cell a new value in this fork only. The cell must exist in
    /// the master workbook; a formula cell overridden this way stops being
    /// evaluated in the fork.
    pub fn update_cell(
        &mut self,
        sheet: &str,
        row: u32,
        col: u16,
        value: impl Into<Value>,
    ) -> FormulaResult<()> {
        let index = self.env.sheet_index(sheet)?;
        if self.env.workbook().cell(index, row, col).is_none() {
            return Err(FormulaError::MissingCell(cell_label(row, col)));
        }
        let key = CellKey::new(index, row, col);
        self.overrides.insert(key, value.into());
        let cleared = self.cache.invalidate(key);
        self.env.report_cleared(key, &cleared);
        Ok(())
    }

    /// Value of a cell as seen by this fork
    pub fn evaluate(&mut self, sheet: &str, row: u32, col: u16) -> FormulaResult<Value> {
        let index = self.env.sheet_index(sheet)?;
        self.evaluate_at(index, row, col)
    }

    /// [`evaluate`](Self::evaluate) by sheet index
    pub fn evaluate_at(&mut self, sheet: usize, row: u32, col: u16) -> FormulaResult<Value> {
        self.generation += 1;
        self.env.evaluate_cell(
            &mut self.cache,
            Some(&self.overrides),
            self.generation,
            CellKey::new(sheet, row, col),
        )
    }

    /// The overridden cells and their values, in sheet, row, column order
    pub fn updated_cells(&self) -> Vec<(CellKey, &Value)> {
        let mut cells: Vec<(CellKey, &Value)> =
            self.overrides.iter().map(|(k, v)| (*k, v)).collect();
        cells.sort_by_key(|(k, _)| *k);
        cells
    }

    /// Write every override into `target`, typically a copy of the master
    /// workbook
    pub fn copy_updated_cells<T: WritableWorkbook>(&self, target: &mut T) -> FormulaResult<()> {
        for (key, value) in self.updated_cells() {
            target.set_value(key.sheet, key.row, key.col, value)?;
        }
        log::debug!("copied {} updated cells", self.overrides.len());
        Ok(())
    }
}

impl<'a, W> std::fmt::Debug for ForkedEvaluator<'a, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkedEvaluator")
            .field("overrides", &self.overrides.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::WorkbookEvaluator;
    use cellgraph_core::Workbook;
    use pretty_assertions::assert_eq;

    fn model() -> Workbook {
        let mut wb = Workbook::empty();
        let inputs = wb.add_worksheet_with_name("Inputs").unwrap();
        let calcs = wb.add_worksheet_with_name("Calculations").unwrap();
        let ws = wb.worksheet_mut(inputs).unwrap();
        ws.set_cell_value("A1", 2.0).unwrap();
        ws.set_cell_value("B1", 3.0).unwrap();
        let ws = wb.worksheet_mut(calcs).unwrap();
        ws.set_cell_value("B1", 5.0).unwrap();
        ws.set_cell_formula("A1", "=B1*Inputs!A1-Inputs!B1").unwrap();
        wb
    }

    fn number(value: FormulaResult<Value>) -> f64 {
        match value {
            Ok(Value::Number(n)) => n,
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn test_forks_are_isolated() {
        let mut master = WorkbookEvaluator::new(model()).unwrap();
        assert_eq!(number(master.evaluate("Calculations", 0, 0)), 7.0);

        let mut first = master.fork();
        first.update_cell("Inputs", 0, 0, 4.0).unwrap();
        first.update_cell("Inputs", 0, 1, 1.1).unwrap();

        let mut second = master.fork();
        second.update_cell("Inputs", 0, 0, 1.2).unwrap();
        second.update_cell("Inputs", 0, 1, 2.0).unwrap();

        assert!((number(first.evaluate("Calculations", 0, 0)) - 18.9).abs() < 1e-9);
        assert!((number(second.evaluate("Calculations", 0, 0)) - 4.0).abs() < 1e-9);
        assert_eq!(number(first.evaluate("Inputs", 0, 1)), 1.1);
        drop((first, second));

        assert_eq!(number(master.evaluate("Calculations", 0, 0)), 7.0);
    }

    #[test]
    fn test_missing_cell_cannot_be_overridden() {
        let master = WorkbookEvaluator::new(model()).unwrap();
        let mut fork = master.fork();
        let err = fork.update_cell("Inputs", 1, 0, 1.0).unwrap_err();
        assert_eq!(err.to_string(), "Underlying cell 'A2' is missing in master sheet.");
        assert!(fork.update_cell("Nowhere", 0, 0, 1.0).is_err());
    }

    #[test]
    fn test_repeated_updates_invalidate_fork_cache() {
        let master = WorkbookEvaluator::new(model()).unwrap();
        let mut fork = master.fork();
        fork.update_cell("Inputs", 0, 0, 10.0).unwrap();
        assert_eq!(number(fork.evaluate("Calculations", 0, 0)), 47.0);
        fork.update_cell("Inputs", 0, 0, 1.0).unwrap();
        assert_eq!(number(fork.evaluate("Calculations", 0, 0)), 2.0);
    }

    #[test]
    fn test_overriding_a_formula_cell() {
        let master = WorkbookEvaluator::new(model()).unwrap();
        let mut fork = master.fork();
        fork.update_cell("Calculations", 0, 0, "fixed").unwrap();
        assert_eq!(fork.evaluate("Calculations", 0, 0), Ok(Value::text("fixed")));
    }

    #[test]
    fn test_forks_on_threads() {
        let master = WorkbookEvaluator::new(model()).unwrap();
        let results: Vec<f64> = std::thread::scope(|s| {
            let handles: Vec<_> = (1..=4)
                .map(|i| {
                    let master = &master;
                    s.spawn(move || {
                        let mut fork = master.fork();
                        fork.update_cell("Inputs", 0, 0, f64::from(i)).unwrap();
                        number(fork.evaluate("Calculations", 0, 0))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results, vec![2.0, 7.0, 12.0, 17.0]);
    }

    #[test]
    fn test_copy_updated_cells() {
        let master = WorkbookEvaluator::new(model()).unwrap();
        let mut fork = master.fork();
        fork.update_cell("Inputs", 0, 1, 0.5).unwrap();
        fork.update_cell("Inputs", 0, 0, 8.0).unwrap();
        assert_eq!(
            fork.updated_cells(),
            vec![
                (CellKey::new(0, 0, 0), &Value::Number(8.0)),
                (CellKey::new(0, 0, 1), &Value::Number(0.5)),
            ]
        );

        let mut copy = master.workbook().clone();
        fork.copy_updated_cells(&mut copy).unwrap();
        let mut updated = WorkbookEvaluator::new(copy).unwrap();
        assert_eq!(number(updated.evaluate("Calculations", 0, 0)), 39.5);
    }
}
