//! Sparse cell storage
//!
//! Only cells that exist are stored, in a row-based BTreeMap. A blank cell
//! that was explicitly created is kept (as [`CellValue::Empty`]) so callers
//! can tell "blank" apart from "missing".

use std::collections::BTreeMap;

use super::CellValue;

/// Row-major sparse grid of cell values
#[derive(Debug, Clone, Default)]
pub struct CellStorage {
    rows: BTreeMap<u32, BTreeMap<u16, CellValue>>,
}

impl CellStorage {
    /// Create a new empty cell storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cell value, `None` if the cell does not exist
    pub fn get(&self, row: u32, col: u16) -> Option<&CellValue> {
        self.rows.get(&row).and_then(|r| r.get(&col))
    }

    /// Get a mutable cell value
    pub fn get_mut(&mut self, row: u32, col: u16) -> Option<&mut CellValue> {
        self.rows.get_mut(&row).and_then(|r| r.get_mut(&col))
    }

    /// Store a value, creating the cell if needed
    pub fn set(&mut self, row: u32, col: u16, value: CellValue) {
        self.rows.entry(row).or_default().insert(col, value);
    }

    /// Remove a cell entirely
    pub fn remove(&mut self, row: u32, col: u16) -> Option<CellValue> {
        let row_map = self.rows.get_mut(&row)?;
        let removed = row_map.remove(&col);
        if row_map.is_empty() {
            self.rows.remove(&row);
        }
        removed
    }

    /// Remove every cell
    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Number of stored cells
    pub fn cell_count(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    /// Check if storage is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Bounds of the stored cells as (min_row, min_col, max_row, max_col)
    pub fn used_bounds(&self) -> Option<(u32, u16, u32, u16)> {
        let min_row = *self.rows.keys().next()?;
        let max_row = *self.rows.keys().next_back()?;
        let (min_col, max_col) = self
            .rows
            .values()
            .filter_map(|cols| Some((*cols.keys().next()?, *cols.keys().next_back()?)))
            .fold((u16::MAX, 0), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
        Some((min_row, min_col, max_row, max_col))
    }

    /// Iterate over all cells in row order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u16, &CellValue)> {
        self.rows
            .iter()
            .flat_map(|(&row, cols)| cols.iter().map(move |(&col, v)| (row, col, v)))
    }

    /// Iterate over all cells mutably in row order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, u16, &mut CellValue)> {
        self.rows
            .iter_mut()
            .flat_map(|(&row, cols)| cols.iter_mut().map(move |(&col, v)| (row, col, v)))
    }

    /// Insert `count` empty rows before `at`; rows at or below move down.
    /// Rows pushed past `max_rows` are dropped.
    pub fn insert_rows(&mut self, at: u32, count: u32, max_rows: u32) {
        let moved = self.rows.split_off(&at);
        for (row, cols) in moved {
            if let Some(target) = row.checked_add(count).filter(|r| *r < max_rows) {
                self.rows.insert(target, cols);
            }
        }
    }

    /// Delete `count` rows starting at `at`; rows below move up.
    pub fn delete_rows(&mut self, at: u32, count: u32) {
        let mut tail = self.rows.split_off(&at);
        let kept = tail.split_off(&at.saturating_add(count));
        for (row, cols) in kept {
            self.rows.insert(row - count, cols);
        }
    }
}
