//! Hooks for observing what the evaluator does

use crate::cache::CellKey;
use crate::value::Value;

/// Receives notifications from an evaluator. Every method has an empty
/// default so implementors only override what they need.
pub trait EvaluationListener: Send + Sync {
    /// A formula cell is about to be evaluated
    fn on_start_evaluate(&self, _cell: CellKey) {}

    /// A formula cell finished evaluating
    fn on_end_evaluate(&self, _cell: CellKey, _result: &Value) {}

    /// A cached result was used instead of evaluating
    fn on_cache_hit(&self, _cell: CellKey, _result: &Value) {}

    /// Every cached result was dropped
    fn on_clear_whole_cache(&self) {}

    /// The cached result of a changed cell was dropped
    fn on_clear_cached_value(&self, _cell: CellKey) {}

    /// The cached result of a cell depending on a changed cell was dropped.
    /// `depth` is 1 for direct dependents.
    fn on_clear_dependent_cached_value(&self, _cell: CellKey, _depth: usize) {}
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::*;

    /// Listener that records events as short strings
    #[derive(Debug, Default)]
    pub struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        pub fn take(&self) -> Vec<String> {
            self.events
                .lock()
                .map(|mut e| std::mem::take(&mut *e))
                .unwrap_or_default()
        }

        fn push(&self, event: String) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    fn label(cell: CellKey) -> String {
        format!("{}!{}", cell.sheet, crate::workbook::cell_label(cell.row, cell.col))
    }

    impl EvaluationListener for RecordingListener {
        fn on_start_evaluate(&self, cell: CellKey) {
            self.push(format!("start {}", label(cell)));
        }

        fn on_end_evaluate(&self, cell: CellKey, result: &Value) {
            self.push(format!("end {} = {}", label(cell), result));
        }

        fn on_cache_hit(&self, cell: CellKey, result: &Value) {
            self.push(format!("hit {} = {}", label(cell), result));
        }

        fn on_clear_whole_cache(&self) {
            self.push("clear all".to_string());
        }

        fn on_clear_cached_value(&self, cell: CellKey) {
            self.push(format!("clear {}", label(cell)));
        }

        fn on_clear_dependent_cached_value(&self, cell: CellKey, depth: usize) {
            self.push(format!("clear dependent {} depth {}", label(cell), depth));
        }
    }
}
