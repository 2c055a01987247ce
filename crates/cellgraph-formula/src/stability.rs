//! Marking input cells whose values never change

/// Tells the evaluator which plain-value cells are fixed for the lifetime of
/// an evaluator.
///
/// Reads of a final cell are not recorded as dependency edges, which keeps
/// the graph small when a large block of constant inputs feeds many
/// formulas. Changing a cell the classifier reported as final leaves stale
/// results behind; call `clear_all_cached_results` if that happens.
pub trait StabilityClassifier: Send + Sync {
    /// Whether the cell at (sheet, row, col) will never change
    fn is_cell_final(&self, sheet: usize, row: u32, col: u16) -> bool;
}

/// Classifier that treats every cell on the listed sheets as final
#[derive(Debug, Clone, Default)]
pub struct FinalSheets {
    sheets: Vec<usize>,
}

impl FinalSheets {
    /// Treat the given sheet indices as constant
    pub fn new(sheets: impl IntoIterator<Item = usize>) -> Self {
        Self {
            sheets: sheets.into_iter().collect(),
        }
    }
}

impl StabilityClassifier for FinalSheets {
    fn is_cell_final(&self, sheet: usize, _row: u32, _col: u16) -> bool {
        self.sheets.contains(&sheet)
    }
}

impl<F> StabilityClassifier for F
where
    F: Fn(usize, u32, u16) -> bool + Send + Sync,
{
    fn is_cell_final(&self, sheet: usize, row: u32, col: u16) -> bool {
        self(sheet, row, col)
    }
}
